use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ComplianceError, ComplianceResult};
use crate::metrics::SESSIONS_STARTED_TOTAL;
use crate::models::{
    ActivityEvent, AttemptList, AttemptSummary, CreateSessionRequest, NewSession,
    SaveProgressRequest, Session,
};
use crate::services::catalog::ActivityCatalog;
use crate::services::store::{ProgressWrite, SessionStore};

pub struct SessionService {
    store: Arc<dyn SessionStore>,
    catalog: Arc<dyn ActivityCatalog>,
}

impl SessionService {
    pub fn new(store: Arc<dyn SessionStore>, catalog: Arc<dyn ActivityCatalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn create_session(
        &self,
        activity_id: &str,
        req: CreateSessionRequest,
    ) -> ComplianceResult<Session> {
        req.validate()?;
        if req.ce_eligible && req.disclaimer_accepted_at.is_none() {
            return Err(ComplianceError::Validation(
                "disclaimerAcceptedAt is required for CE-eligible sessions".to_string(),
            ));
        }

        if self.catalog.find_activity(activity_id).await?.is_none() {
            return Err(ComplianceError::NotFound("Activity not found".to_string()));
        }

        let session = self
            .store
            .insert_session(NewSession {
                id: Uuid::new_v4().to_string(),
                learner_id: req.learner_id,
                activity_id: activity_id.to_string(),
                ce_eligible: req.ce_eligible,
                disclaimer_accepted_at: req.disclaimer_accepted_at,
                started_at: Utc::now(),
            })
            .await?;

        SESSIONS_STARTED_TOTAL
            .with_label_values(&[if session.ce_eligible { "true" } else { "false" }])
            .inc();

        tracing::info!(
            "Session created: {} for learner: {} on activity: {} (attempt {})",
            session.id,
            session.learner_id,
            session.activity_id,
            session.attempt_number
        );

        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> ComplianceResult<Session> {
        self.store
            .find_session(session_id)
            .await?
            .ok_or_else(ComplianceError::session_not_found)
    }

    /// Every attempt of a learner on an activity, newest first, with its
    /// evaluation and completion record attached.
    pub async fn list_attempts(
        &self,
        activity_id: &str,
        learner_id: &str,
    ) -> ComplianceResult<AttemptList> {
        let sessions = self.store.list_sessions(learner_id, activity_id).await?;

        let mut attempts = Vec::with_capacity(sessions.len());
        for session in sessions {
            let evaluation = self.store.find_evaluation(&session.id).await?;
            let completion = self.store.find_completion(&session.id).await?;
            attempts.push(AttemptSummary {
                session,
                evaluation,
                completion,
            });
        }

        Ok(AttemptList { sessions: attempts })
    }

    pub async fn save_progress(
        &self,
        session_id: &str,
        req: SaveProgressRequest,
    ) -> ComplianceResult<Session> {
        req.validate()?;

        match self.store.save_progress(session_id, &req).await? {
            ProgressWrite::Updated(session) => {
                tracing::debug!(
                    "Progress saved for session {}: {} responses, {} answered",
                    session.id,
                    session.question_responses.len(),
                    session.questions_answered
                );
                Ok(*session)
            }
            ProgressWrite::NotFound => Err(ComplianceError::session_not_found()),
            ProgressWrite::NotInProgress => {
                tracing::warn!("Progress save rejected for closed session {}", session_id);
                Err(ComplianceError::not_in_progress())
            }
        }
    }

    pub async fn list_events(&self, session_id: &str) -> ComplianceResult<Vec<ActivityEvent>> {
        if self.store.find_session(session_id).await?.is_none() {
            return Err(ComplianceError::session_not_found());
        }
        Ok(self.store.list_events(session_id).await?)
    }
}
