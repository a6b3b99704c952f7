use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub metrics_auth: String,
    pub store_backend: StoreBackend,
    /// JSON file with activities and learners, loaded by the in-memory backend.
    pub catalog_seed_path: Option<String>,
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Mongo,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "mongo" | "mongodb" => Ok(StoreBackend::Mongo),
            "memory" | "in_memory" => Ok(StoreBackend::Memory),
            other => Err(format!("unknown store backend: {}", other)),
        }
    }
}

/// Server-side cap on events per heartbeat unless configured otherwise.
/// Trackers never send larger batches.
pub const DEFAULT_MAX_EVENTS_PER_HEARTBEAT: usize = 200;

/// Tunables of the heartbeat gate and the certificate issuer.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineSettings {
    /// Seconds credited per accepted heartbeat (matches the client period).
    pub heartbeat_increment_seconds: u64,
    /// Heartbeats closer than this to the last accepted one are rejected.
    pub min_heartbeat_gap_seconds: u64,
    pub max_events_per_heartbeat: usize,
    pub certificate_prefix: String,
    pub certificate_max_attempts: u32,
    pub catalog_cache_ttl_seconds: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            heartbeat_increment_seconds: 30,
            min_heartbeat_gap_seconds: 10,
            max_events_per_heartbeat: DEFAULT_MAX_EVENTS_PER_HEARTBEAT,
            certificate_prefix: "NCA".to_string(),
            certificate_max_attempts: 5,
            catalog_cache_ttl_seconds: 300,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), local .env as fallback
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let store_backend = lookup_string(&settings, "storage.backend", "STORE_BACKEND")
            .map(|value| value.parse::<StoreBackend>())
            .transpose()
            .map_err(config::ConfigError::Message)?
            .unwrap_or(StoreBackend::Mongo);

        let mongo_uri = lookup_string(&settings, "database.mongo_uri", "MONGO_URI")
            .unwrap_or_else(|| "mongodb://localhost:27017/?replicaSet=rs0".to_string());

        let redis_uri = lookup_string(&settings, "redis.uri", "REDIS_URI")
            .unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string());

        let mongo_database = lookup_string(&settings, "database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "ce_compliance".to_string());

        let bind_addr = lookup_string(&settings, "server.bind_addr", "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8081".to_string());

        let metrics_auth = match lookup_string(&settings, "metrics.auth", "METRICS_AUTH") {
            Some(value) => value,
            None if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "METRICS_AUTH must be set in production".to_string(),
                ))
            }
            None => {
                eprintln!("WARNING: Using default METRICS_AUTH (dev mode only!)");
                "admin:changeme".to_string()
            }
        };

        let catalog_seed_path = lookup_string(&settings, "storage.catalog_seed", "CATALOG_SEED_PATH");

        let defaults = EngineSettings::default();
        let engine = EngineSettings {
            heartbeat_increment_seconds: lookup_parsed(
                &settings,
                "engine.heartbeat_increment_seconds",
                "HEARTBEAT_INCREMENT_SECONDS",
            )?
            .unwrap_or(defaults.heartbeat_increment_seconds),
            min_heartbeat_gap_seconds: lookup_parsed(
                &settings,
                "engine.min_heartbeat_gap_seconds",
                "HEARTBEAT_MIN_GAP_SECONDS",
            )?
            .unwrap_or(defaults.min_heartbeat_gap_seconds),
            max_events_per_heartbeat: lookup_parsed(
                &settings,
                "engine.max_events_per_heartbeat",
                "HEARTBEAT_MAX_EVENTS",
            )?
            .unwrap_or(defaults.max_events_per_heartbeat),
            certificate_prefix: lookup_string(
                &settings,
                "engine.certificate_prefix",
                "CERTIFICATE_PREFIX",
            )
            .unwrap_or(defaults.certificate_prefix),
            certificate_max_attempts: lookup_parsed(
                &settings,
                "engine.certificate_max_attempts",
                "CERTIFICATE_MAX_ATTEMPTS",
            )?
            .filter(|attempts| *attempts > 0)
            .unwrap_or(defaults.certificate_max_attempts),
            catalog_cache_ttl_seconds: lookup_parsed(
                &settings,
                "engine.catalog_cache_ttl_seconds",
                "CATALOG_CACHE_TTL_SECONDS",
            )?
            .unwrap_or(defaults.catalog_cache_ttl_seconds),
        };

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            bind_addr,
            metrics_auth,
            store_backend,
            catalog_seed_path,
            engine,
        })
    }

    /// Configuration for tests and local runs without MongoDB/Redis.
    pub fn in_memory() -> Self {
        Config {
            mongo_uri: String::new(),
            redis_uri: String::new(),
            mongo_database: "ce_compliance_test".to_string(),
            bind_addr: "127.0.0.1:0".to_string(),
            metrics_auth: "admin:changeme".to_string(),
            store_backend: StoreBackend::Memory,
            catalog_seed_path: None,
            engine: EngineSettings::default(),
        }
    }
}

/// Plain env var first, then the layered file/`APP__` settings.
fn lookup_string(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    env::var(env_key)
        .ok()
        .filter(|value| !value.trim().is_empty())
        .or_else(|| settings.get_string(key).ok())
        .filter(|value| !value.trim().is_empty())
}

fn lookup_parsed<T: FromStr>(
    settings: &config::Config,
    key: &str,
    env_key: &str,
) -> Result<Option<T>, config::ConfigError> {
    match lookup_string(settings, key, env_key) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| {
            config::ConfigError::Message(format!("invalid value for {}: {}", env_key, raw))
        }),
        None => Ok(None),
    }
}
