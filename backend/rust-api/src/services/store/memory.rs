use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::{
    CompletionWrite, EvaluationWrite, HeartbeatUpdate, HeartbeatWrite, ProgressWrite,
    SessionStore,
};
use crate::models::{
    ActivityEvent, CompletionRecord, CourseEvaluation, NewSession, SaveProgressRequest, Session,
    SessionStatus,
};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, Session>,
    events: Vec<ActivityEvent>,
    evaluations: HashMap<String, CourseEvaluation>,
    completions: HashMap<String, CompletionRecord>,
    next_event_id: u64,
}

/// Single-process store. One lock guards all collections, so every trait
/// method observes and mutates a consistent snapshot.
#[derive(Default)]
pub struct MemorySessionStore {
    state: Mutex<MemoryState>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn insert_session(&self, new: NewSession) -> Result<Session> {
        let mut state = self.state.lock().await;

        let prior_attempts = state
            .sessions
            .values()
            .filter(|s| s.learner_id == new.learner_id && s.activity_id == new.activity_id)
            .count() as u32;

        let session = Session::start(new, prior_attempts + 1);
        if state.sessions.contains_key(&session.id) {
            anyhow::bail!("Session id {} already exists", session.id);
        }
        state.sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn find_session(&self, session_id: &str) -> Result<Option<Session>> {
        let state = self.state.lock().await;
        Ok(state.sessions.get(session_id).cloned())
    }

    async fn list_sessions(&self, learner_id: &str, activity_id: &str) -> Result<Vec<Session>> {
        let state = self.state.lock().await;
        let mut sessions: Vec<Session> = state
            .sessions
            .values()
            .filter(|s| s.learner_id == learner_id && s.activity_id == activity_id)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.attempt_number.cmp(&a.attempt_number));
        Ok(sessions)
    }

    async fn record_heartbeat(
        &self,
        session_id: &str,
        update: HeartbeatUpdate,
    ) -> Result<HeartbeatWrite> {
        let mut state = self.state.lock().await;

        let session = match state.sessions.get_mut(session_id) {
            Some(session) => session,
            None => return Ok(HeartbeatWrite::NotFound),
        };
        if !session.is_in_progress() {
            return Ok(HeartbeatWrite::NotInProgress);
        }
        if update.too_soon_after(session.last_heartbeat_at) {
            return Ok(HeartbeatWrite::TooFrequent {
                active_seconds: session.active_seconds,
            });
        }

        if update.is_active {
            session.active_seconds += update.increment_seconds;
        } else {
            session.idle_seconds += update.increment_seconds;
        }
        session.last_heartbeat_at = Some(update.received_at);
        if let Some(timings) = update.phase_timings {
            session.phase_timings = timings;
        }
        let write = HeartbeatWrite::Accepted {
            active_seconds: session.active_seconds,
            idle_seconds: session.idle_seconds,
        };

        for event in update.events {
            state.next_event_id += 1;
            let id = format!("evt-{:08}", state.next_event_id);
            state.events.push(ActivityEvent {
                id,
                session_id: event.session_id,
                event_type: event.event_type,
                phase: event.phase,
                metadata: event.metadata,
                timestamp: event.timestamp,
            });
        }

        Ok(write)
    }

    async fn save_progress(
        &self,
        session_id: &str,
        update: &SaveProgressRequest,
    ) -> Result<ProgressWrite> {
        let mut state = self.state.lock().await;

        let session = match state.sessions.get_mut(session_id) {
            Some(session) => session,
            None => return Ok(ProgressWrite::NotFound),
        };
        if !session.is_in_progress() {
            return Ok(ProgressWrite::NotInProgress);
        }
        session.apply_progress(update);
        Ok(ProgressWrite::Updated(Box::new(session.clone())))
    }

    async fn list_events(&self, session_id: &str) -> Result<Vec<ActivityEvent>> {
        let state = self.state.lock().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.session_id == session_id)
            .cloned()
            .collect())
    }

    async fn insert_evaluation(&self, evaluation: &CourseEvaluation) -> Result<EvaluationWrite> {
        let mut state = self.state.lock().await;
        if state.evaluations.contains_key(&evaluation.session_id) {
            return Ok(EvaluationWrite::AlreadyExists);
        }
        state
            .evaluations
            .insert(evaluation.session_id.clone(), evaluation.clone());
        Ok(EvaluationWrite::Created)
    }

    async fn find_evaluation(&self, session_id: &str) -> Result<Option<CourseEvaluation>> {
        let state = self.state.lock().await;
        Ok(state.evaluations.get(session_id).cloned())
    }

    async fn find_completion(&self, session_id: &str) -> Result<Option<CompletionRecord>> {
        let state = self.state.lock().await;
        Ok(state.completions.get(session_id).cloned())
    }

    async fn find_latest_completion(
        &self,
        learner_id: &str,
        activity_id: &str,
    ) -> Result<Option<CompletionRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .completions
            .values()
            .filter(|c| c.learner_id == learner_id && c.activity_id == activity_id)
            .max_by_key(|c| c.issued_at)
            .cloned())
    }

    async fn insert_completion(&self, record: &CompletionRecord) -> Result<CompletionWrite> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.completions.get(&record.session_id) {
            return Ok(CompletionWrite::AlreadyIssued(Box::new(existing.clone())));
        }
        if state
            .completions
            .values()
            .any(|c| c.certificate_number == record.certificate_number)
        {
            return Ok(CompletionWrite::CertificateNumberTaken);
        }

        let session = match state.sessions.get_mut(&record.session_id) {
            Some(session) => session,
            None => return Ok(CompletionWrite::NotFound),
        };
        if !session.is_in_progress() {
            return Ok(CompletionWrite::NotInProgress);
        }
        session.status = SessionStatus::Completed;
        session.completed_at = Some(record.issued_at);

        state
            .completions
            .insert(record.session_id.clone(), record.clone());
        Ok(CompletionWrite::Issued)
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NewActivityEvent;
    use chrono::{Duration, Utc};

    fn new_session(id: &str) -> NewSession {
        NewSession {
            id: id.to_string(),
            learner_id: "learner-1".to_string(),
            activity_id: "case-001".to_string(),
            ce_eligible: true,
            disclaimer_accepted_at: Some(Utc::now()),
            started_at: Utc::now(),
        }
    }

    fn heartbeat(at: chrono::DateTime<Utc>, is_active: bool) -> HeartbeatUpdate {
        HeartbeatUpdate {
            received_at: at,
            min_gap: Duration::seconds(10),
            increment_seconds: 30,
            is_active,
            phase_timings: None,
            events: Vec::new(),
        }
    }

    fn record(session_id: &str, certificate_number: &str) -> CompletionRecord {
        CompletionRecord {
            certificate_number: certificate_number.to_string(),
            session_id: session_id.to_string(),
            learner_id: "learner-1".to_string(),
            activity_id: "case-001".to_string(),
            learner_name: "Alice".to_string(),
            learner_license: None,
            activity_title: "Case".to_string(),
            activity_version: "1.0".to_string(),
            credit_hours: 1.0,
            duration_minutes: 50,
            issued_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn attempt_numbers_count_up_per_learner_and_activity() {
        let store = MemorySessionStore::new();
        let first = store.insert_session(new_session("s-1")).await.unwrap();
        let second = store.insert_session(new_session("s-2")).await.unwrap();
        assert_eq!(first.attempt_number, 1);
        assert_eq!(second.attempt_number, 2);

        let listed = store.list_sessions("learner-1", "case-001").await.unwrap();
        assert_eq!(listed[0].id, "s-2");
    }

    #[tokio::test]
    async fn heartbeat_gate_rejects_without_mutation() {
        let store = MemorySessionStore::new();
        store.insert_session(new_session("s-1")).await.unwrap();
        let t0 = Utc::now();

        let first = store.record_heartbeat("s-1", heartbeat(t0, true)).await.unwrap();
        assert_eq!(
            first,
            HeartbeatWrite::Accepted {
                active_seconds: 30,
                idle_seconds: 0
            }
        );

        let mut early = heartbeat(t0 + Duration::seconds(5), false);
        early.events.push(NewActivityEvent {
            session_id: "s-1".to_string(),
            event_type: "idle_start".to_string(),
            phase: None,
            metadata: None,
            timestamp: t0,
        });
        let rejected = store.record_heartbeat("s-1", early).await.unwrap();
        assert_eq!(rejected, HeartbeatWrite::TooFrequent { active_seconds: 30 });

        let session = store.find_session("s-1").await.unwrap().unwrap();
        assert_eq!(session.idle_seconds, 0);
        assert_eq!(session.last_heartbeat_at, Some(t0));
        assert!(store.list_events("s-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn completion_is_idempotent_per_session() {
        let store = MemorySessionStore::new();
        store.insert_session(new_session("s-1")).await.unwrap();

        let first = store.insert_completion(&record("s-1", "NCA-1")).await.unwrap();
        assert_eq!(first, CompletionWrite::Issued);

        let second = store.insert_completion(&record("s-1", "NCA-2")).await.unwrap();
        match second {
            CompletionWrite::AlreadyIssued(existing) => {
                assert_eq!(existing.certificate_number, "NCA-1")
            }
            other => panic!("unexpected write outcome: {:?}", other),
        }

        let session = store.find_session("s-1").await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn duplicate_certificate_number_is_reported() {
        let store = MemorySessionStore::new();
        store.insert_session(new_session("s-1")).await.unwrap();
        store.insert_session(new_session("s-2")).await.unwrap();

        store.insert_completion(&record("s-1", "NCA-1")).await.unwrap();
        let clash = store.insert_completion(&record("s-2", "NCA-1")).await.unwrap();
        assert_eq!(clash, CompletionWrite::CertificateNumberTaken);

        let session = store.find_session("s-2").await.unwrap().unwrap();
        assert!(session.is_in_progress());
    }
}
