use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::{ComplianceError, ComplianceResult};
use crate::models::{CourseEvaluation, SubmitEvaluationRequest};
use crate::services::store::{EvaluationWrite, SessionStore};

pub struct EvaluationService {
    store: Arc<dyn SessionStore>,
}

impl EvaluationService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub async fn submit(
        &self,
        session_id: &str,
        req: SubmitEvaluationRequest,
    ) -> ComplianceResult<CourseEvaluation> {
        req.validate()?;

        let session = self
            .store
            .find_session(session_id)
            .await?
            .ok_or_else(ComplianceError::session_not_found)?;

        let evaluation = req.into_evaluation(
            Uuid::new_v4().to_string(),
            &session.id,
            &session.learner_id,
            &session.activity_id,
            Utc::now(),
        );

        match self.store.insert_evaluation(&evaluation).await? {
            EvaluationWrite::Created => {
                tracing::info!(
                    "Evaluation {} submitted for session {}",
                    evaluation.id,
                    session_id
                );
                Ok(evaluation)
            }
            EvaluationWrite::AlreadyExists => Err(ComplianceError::AlreadySubmitted(
                "Evaluation already submitted for this session".to_string(),
            )),
        }
    }
}
