use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Issued certificate of credit. Learner and activity fields are snapshots
/// taken at issuance and never follow later profile or catalog edits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRecord {
    pub certificate_number: String,
    pub session_id: String,
    pub learner_id: String,
    pub activity_id: String,
    pub learner_name: String,
    pub learner_license: Option<String>,
    pub activity_title: String,
    pub activity_version: String,
    pub credit_hours: f64,
    pub duration_minutes: u64,
    pub issued_at: DateTime<Utc>,
}

/// Read-only view of where a session stands against its rubric.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CriteriaReport {
    pub session_id: String,
    pub ce_eligible: bool,
    pub already_issued: bool,
    pub satisfied: bool,
    pub criteria: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionLookup {
    pub completed: bool,
    pub completion: Option<CompletionRecord>,
}
