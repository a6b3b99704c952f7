use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationError};

use super::completion::CompletionRecord;
use super::evaluation::CourseEvaluation;

/// One learner's pass through a graded activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub learner_id: String,
    pub activity_id: String,
    pub attempt_number: u32,
    pub ce_eligible: bool,
    pub disclaimer_accepted_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub active_seconds: u64,
    pub idle_seconds: u64,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub phase_timings: HashMap<String, u64>,
    pub question_responses: Vec<QuestionResponse>,
    pub questions_answered: u32,
    pub self_assessment_ratings: HashMap<String, u8>,
    pub notes: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Fresh `in_progress` session with zeroed counters.
    pub fn start(new: NewSession, attempt_number: u32) -> Self {
        Self {
            id: new.id,
            learner_id: new.learner_id,
            activity_id: new.activity_id,
            attempt_number,
            ce_eligible: new.ce_eligible,
            disclaimer_accepted_at: new.disclaimer_accepted_at,
            status: SessionStatus::InProgress,
            active_seconds: 0,
            idle_seconds: 0,
            last_heartbeat_at: None,
            phase_timings: HashMap::new(),
            question_responses: Vec::new(),
            questions_answered: 0,
            self_assessment_ratings: HashMap::new(),
            notes: None,
            started_at: new.started_at,
            completed_at: None,
        }
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == SessionStatus::InProgress
    }

    /// Whole minutes of attended time, rounded down.
    pub fn active_minutes(&self) -> u64 {
        self.active_seconds / 60
    }

    pub fn apply_progress(&mut self, update: &SaveProgressRequest) {
        if let Some(responses) = &update.question_responses {
            self.question_responses = responses.clone();
        }
        if let Some(answered) = update.questions_answered {
            self.questions_answered = answered;
        }
        if let Some(ratings) = &update.self_assessment_ratings {
            self.self_assessment_ratings = ratings.clone();
        }
        if let Some(notes) = &update.notes {
            self.notes = Some(notes.clone());
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    InProgress,
    Completed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::InProgress => "in_progress",
            SessionStatus::Completed => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct QuestionResponse {
    #[validate(length(min = 1, max = 200))]
    pub question_id: String,
    #[serde(default)]
    pub phase: Option<String>,
    #[validate(length(max = 20000))]
    pub user_response: String,
    pub response_length: u32,
    pub time_spent_sec: u32,
    pub hints_viewed: u32,
    pub answer_revealed: bool,
    pub revealed_before_attempt: bool,
    #[serde(default)]
    #[validate(range(min = 1, max = 5))]
    pub self_confidence: Option<u8>,
}

/// Identity and opt-in data handed to the store, which assigns the attempt number.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub id: String,
    pub learner_id: String,
    pub activity_id: String,
    pub ce_eligible: bool,
    pub disclaimer_accepted_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 200))]
    pub learner_id: String,
    #[serde(default)]
    pub ce_eligible: bool,
    pub disclaimer_accepted_at: Option<DateTime<Utc>>,
}

/// Incremental progress save. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SaveProgressRequest {
    #[validate(nested)]
    pub question_responses: Option<Vec<QuestionResponse>>,
    pub questions_answered: Option<u32>,
    #[validate(custom(function = "validate_ratings"))]
    pub self_assessment_ratings: Option<HashMap<String, u8>>,
    #[validate(length(max = 10000))]
    pub notes: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptSummary {
    #[serde(flatten)]
    pub session: Session,
    pub evaluation: Option<CourseEvaluation>,
    pub completion: Option<CompletionRecord>,
}

#[derive(Debug, Serialize)]
pub struct AttemptList {
    pub sessions: Vec<AttemptSummary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearnerQuery {
    pub learner_id: String,
}

/// Likert-style ratings keyed by objective id must be within 1..=5.
pub fn validate_ratings(ratings: &HashMap<String, u8>) -> Result<(), ValidationError> {
    if ratings.values().all(|rating| (1..=5).contains(rating)) {
        Ok(())
    } else {
        let mut error = ValidationError::new("rating_range");
        error.message = Some("ratings must be between 1 and 5".into());
        Err(error)
    }
}
