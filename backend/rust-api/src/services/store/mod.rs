//! Session persistence.
//!
//! Every method is an atomic unit keyed by session id: the heartbeat gate and
//! counter update, the event append that accompanies it, and the completion
//! insert together with the terminal status flip each land entirely or not at
//! all.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;

use crate::models::{
    ActivityEvent, CompletionRecord, CourseEvaluation, NewActivityEvent, NewSession,
    SaveProgressRequest, Session,
};

pub mod memory;
pub mod mongo;

pub use memory::MemorySessionStore;
pub use mongo::MongoSessionStore;

/// Everything an accepted heartbeat writes.
#[derive(Debug, Clone)]
pub struct HeartbeatUpdate {
    pub received_at: DateTime<Utc>,
    pub min_gap: Duration,
    pub increment_seconds: u64,
    pub is_active: bool,
    pub phase_timings: Option<HashMap<String, u64>>,
    pub events: Vec<NewActivityEvent>,
}

impl HeartbeatUpdate {
    /// Gate check shared by the store implementations.
    pub fn too_soon_after(&self, last_heartbeat_at: Option<DateTime<Utc>>) -> bool {
        match last_heartbeat_at {
            Some(last) => self.received_at - last < self.min_gap,
            None => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatWrite {
    Accepted { active_seconds: u64, idle_seconds: u64 },
    TooFrequent { active_seconds: u64 },
    NotFound,
    NotInProgress,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressWrite {
    Updated(Box<Session>),
    NotFound,
    NotInProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationWrite {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionWrite {
    Issued,
    AlreadyIssued(Box<CompletionRecord>),
    CertificateNumberTaken,
    NotFound,
    NotInProgress,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Inserts a session, assigning the next attempt number for learner+activity.
    async fn insert_session(&self, new: NewSession) -> Result<Session>;

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>>;

    /// Newest first.
    async fn list_sessions(&self, learner_id: &str, activity_id: &str) -> Result<Vec<Session>>;

    async fn record_heartbeat(&self, session_id: &str, update: HeartbeatUpdate)
        -> Result<HeartbeatWrite>;

    async fn save_progress(
        &self,
        session_id: &str,
        update: &SaveProgressRequest,
    ) -> Result<ProgressWrite>;

    /// Insertion order.
    async fn list_events(&self, session_id: &str) -> Result<Vec<ActivityEvent>>;

    async fn insert_evaluation(&self, evaluation: &CourseEvaluation) -> Result<EvaluationWrite>;

    async fn find_evaluation(&self, session_id: &str) -> Result<Option<CourseEvaluation>>;

    async fn find_completion(&self, session_id: &str) -> Result<Option<CompletionRecord>>;

    /// Most recently issued record for learner+activity.
    async fn find_latest_completion(
        &self,
        learner_id: &str,
        activity_id: &str,
    ) -> Result<Option<CompletionRecord>>;

    /// Inserts the record and marks the session completed in one unit. The
    /// session id is the idempotency key; a second caller gets the first
    /// caller's record back.
    async fn insert_completion(&self, record: &CompletionRecord) -> Result<CompletionWrite>;

    async fn health_check(&self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update_at(received_at: DateTime<Utc>) -> HeartbeatUpdate {
        HeartbeatUpdate {
            received_at,
            min_gap: Duration::seconds(10),
            increment_seconds: 30,
            is_active: true,
            phase_timings: None,
            events: Vec::new(),
        }
    }

    #[test]
    fn first_heartbeat_is_never_too_soon() {
        assert!(!update_at(Utc::now()).too_soon_after(None));
    }

    #[test]
    fn gap_boundary_is_inclusive() {
        let last = Utc::now();
        assert!(update_at(last + Duration::seconds(9)).too_soon_after(Some(last)));
        assert!(!update_at(last + Duration::seconds(10)).too_soon_after(Some(last)));
    }
}
