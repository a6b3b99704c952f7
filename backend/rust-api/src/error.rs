use thiserror::Error;

use crate::models::CompletionRecord;

/// Error body of a write against a session that has left `in_progress`.
pub const NOT_IN_PROGRESS: &str = "Session is not in progress";

/// Outcomes the engine surfaces to callers. Storage and collaborator failures
/// arrive as `Internal`.
#[derive(Debug, Error)]
pub enum ComplianceError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("Heartbeat too frequent")]
    RateLimited { active_seconds: u64 },

    #[error("Completion criteria not met: {}", .0.join("; "))]
    CriteriaNotMet(Vec<String>),

    #[error("CE credit already issued for this session")]
    AlreadyIssued(Box<CompletionRecord>),

    #[error("This session was not opted in for CE credit")]
    NotEligible,

    #[error("{0}")]
    AlreadySubmitted(String),

    #[error("{0}")]
    Validation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ComplianceError {
    pub fn session_not_found() -> Self {
        ComplianceError::NotFound("Session not found".to_string())
    }

    pub fn not_in_progress() -> Self {
        ComplianceError::InvalidState(NOT_IN_PROGRESS.to_string())
    }
}

impl From<validator::ValidationErrors> for ComplianceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ComplianceError::Validation(errors.to_string())
    }
}

pub type ComplianceResult<T> = Result<T, ComplianceError>;
