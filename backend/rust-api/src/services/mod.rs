use crate::config::Config;
use mongodb::Client as MongoClient;
use redis::aio::ConnectionManager;
use std::sync::Arc;

use catalog::{ActivityCatalog, InMemoryCatalog, LearnerDirectory, MongoCatalog};
use store::{MemorySessionStore, MongoSessionStore, SessionStore};

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SessionStore>,
    pub catalog: Arc<dyn ActivityCatalog>,
    pub learners: Arc<dyn LearnerDirectory>,
}

impl AppState {
    /// Production wiring: MongoDB for sessions and catalog, Redis for the
    /// catalog cache.
    pub async fn connect(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let store = MongoSessionStore::new(mongo_client, mongo.clone());
        store.ensure_indexes().await?;

        let catalog = Arc::new(MongoCatalog::new(
            mongo,
            redis,
            config.engine.catalog_cache_ttl_seconds,
        ));

        Ok(Self {
            config,
            store: Arc::new(store),
            catalog: catalog.clone(),
            learners: catalog,
        })
    }

    /// Process-local wiring with no external dependencies.
    pub fn in_memory(config: Config, catalog: Arc<InMemoryCatalog>) -> Self {
        Self {
            config,
            store: Arc::new(MemorySessionStore::new()),
            catalog: catalog.clone(),
            learners: catalog,
        }
    }
}

pub mod catalog;
pub mod completion_service;
pub mod criteria;
pub mod evaluation_service;
pub mod heartbeat_service;
pub mod session_service;
pub mod store;
