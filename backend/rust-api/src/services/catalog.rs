//! Read-only collaborators: the activity catalog and the learner directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::Database;
use redis::aio::ConnectionManager;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

use crate::metrics::{record_cache_hit, record_cache_miss, track_cache_operation};
use crate::models::{Activity, CatalogSeed, LearnerProfile};

const ACTIVITIES: &str = "activities";
const LEARNERS: &str = "learners";

#[async_trait]
pub trait ActivityCatalog: Send + Sync {
    async fn find_activity(&self, activity_id: &str) -> Result<Option<Activity>>;

    async fn health_check(&self) -> Result<()>;
}

#[async_trait]
pub trait LearnerDirectory: Send + Sync {
    async fn find_learner(&self, learner_id: &str) -> Result<Option<LearnerProfile>>;
}

/// Catalog and directory backed by MongoDB, with activities cached in Redis.
/// Cache failures fall through to the database.
pub struct MongoCatalog {
    mongo: Database,
    redis: ConnectionManager,
    cache_ttl_seconds: u64,
}

impl MongoCatalog {
    pub fn new(mongo: Database, redis: ConnectionManager, cache_ttl_seconds: u64) -> Self {
        Self {
            mongo,
            redis,
            cache_ttl_seconds,
        }
    }

    fn cache_key(activity_id: &str) -> String {
        format!("catalog:activity:{}", activity_id)
    }

    async fn cached_activity(&self, activity_id: &str) -> Result<Option<Activity>> {
        let mut conn = self.redis.clone();
        let key = Self::cache_key(activity_id);

        let cached = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&key)
                .query_async::<Option<String>>(&mut conn)
                .await
                .context("Failed to read activity from Redis")
        })
        .await?;

        match cached {
            Some(json) => Ok(Some(
                serde_json::from_str(&json).context("Failed to parse cached activity")?,
            )),
            None => Ok(None),
        }
    }

    async fn cache_activity(&self, activity: &Activity) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = Self::cache_key(&activity.id);
        let json = serde_json::to_string(activity)?;

        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&key)
                .arg(self.cache_ttl_seconds)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to cache activity in Redis")
        })
        .await
    }
}

#[async_trait]
impl ActivityCatalog for MongoCatalog {
    async fn find_activity(&self, activity_id: &str) -> Result<Option<Activity>> {
        match self.cached_activity(activity_id).await {
            Ok(Some(activity)) => {
                record_cache_hit();
                return Ok(Some(activity));
            }
            Ok(None) => record_cache_miss(),
            Err(e) => {
                record_cache_miss();
                tracing::warn!("Activity cache read failed for {}: {:#}", activity_id, e);
            }
        }

        let activity = self
            .mongo
            .collection::<Activity>(ACTIVITIES)
            .find_one(doc! { "_id": activity_id })
            .await
            .context("Failed to load activity")?;

        if let Some(activity) = &activity {
            if let Err(e) = self.cache_activity(activity).await {
                tracing::warn!("Activity cache write failed for {}: {:#}", activity_id, e);
            }
        }

        Ok(activity)
    }

    async fn health_check(&self) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .context("Redis ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl LearnerDirectory for MongoCatalog {
    async fn find_learner(&self, learner_id: &str) -> Result<Option<LearnerProfile>> {
        self.mongo
            .collection::<LearnerProfile>(LEARNERS)
            .find_one(doc! { "_id": learner_id })
            .await
            .context("Failed to load learner profile")
    }
}

/// Process-local catalog for tests and single-node runs.
#[derive(Default)]
pub struct InMemoryCatalog {
    activities: RwLock<HashMap<String, Activity>>,
    learners: RwLock<HashMap<String, LearnerProfile>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: CatalogSeed) -> Self {
        Self {
            activities: RwLock::new(
                seed.activities
                    .into_iter()
                    .map(|a| (a.id.clone(), a))
                    .collect(),
            ),
            learners: RwLock::new(
                seed.learners
                    .into_iter()
                    .map(|l| (l.id.clone(), l))
                    .collect(),
            ),
        }
    }

    pub async fn from_seed_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read catalog seed {}", path.display()))?;
        let seed: CatalogSeed = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse catalog seed {}", path.display()))?;
        tracing::info!(
            "Loaded catalog seed: {} activities, {} learners",
            seed.activities.len(),
            seed.learners.len()
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn insert_activity(&self, activity: Activity) {
        self.activities
            .write()
            .await
            .insert(activity.id.clone(), activity);
    }

    pub async fn insert_learner(&self, learner: LearnerProfile) {
        self.learners
            .write()
            .await
            .insert(learner.id.clone(), learner);
    }
}

#[async_trait]
impl ActivityCatalog for InMemoryCatalog {
    async fn find_activity(&self, activity_id: &str) -> Result<Option<Activity>> {
        Ok(self.activities.read().await.get(activity_id).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl LearnerDirectory for InMemoryCatalog {
    async fn find_learner(&self, learner_id: &str) -> Result<Option<LearnerProfile>> {
        Ok(self.learners.read().await.get(learner_id).cloned())
    }
}
