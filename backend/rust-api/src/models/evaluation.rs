use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use super::session::validate_ratings;

/// Post-activity evaluation, at most one per session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseEvaluation {
    pub id: String,
    pub session_id: String,
    pub learner_id: String,
    pub activity_id: String,
    pub objectives_met: u8,
    pub content_relevance: u8,
    pub content_evidence: u8,
    pub material_quality: u8,
    pub time_appropriate: u8,
    pub would_recommend: u8,
    pub most_valuable: Option<String>,
    pub least_valuable: Option<String>,
    pub suggested_improvements: Option<String>,
    pub objective_ratings: Option<HashMap<String, u8>>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEvaluationRequest {
    #[validate(range(min = 1, max = 5))]
    pub objectives_met: u8,
    #[validate(range(min = 1, max = 5))]
    pub content_relevance: u8,
    #[validate(range(min = 1, max = 5))]
    pub content_evidence: u8,
    #[validate(range(min = 1, max = 5))]
    pub material_quality: u8,
    #[validate(range(min = 1, max = 5))]
    pub time_appropriate: u8,
    #[validate(range(min = 1, max = 5))]
    pub would_recommend: u8,
    #[validate(length(max = 5000))]
    pub most_valuable: Option<String>,
    #[validate(length(max = 5000))]
    pub least_valuable: Option<String>,
    #[validate(length(max = 5000))]
    pub suggested_improvements: Option<String>,
    #[validate(custom(function = "validate_ratings"))]
    pub objective_ratings: Option<HashMap<String, u8>>,
}

impl SubmitEvaluationRequest {
    pub fn into_evaluation(
        self,
        id: String,
        session_id: &str,
        learner_id: &str,
        activity_id: &str,
        submitted_at: DateTime<Utc>,
    ) -> CourseEvaluation {
        CourseEvaluation {
            id,
            session_id: session_id.to_string(),
            learner_id: learner_id.to_string(),
            activity_id: activity_id.to_string(),
            objectives_met: self.objectives_met,
            content_relevance: self.content_relevance,
            content_evidence: self.content_evidence,
            material_quality: self.material_quality,
            time_appropriate: self.time_appropriate,
            would_recommend: self.would_recommend,
            most_valuable: non_blank(self.most_valuable),
            least_valuable: non_blank(self.least_valuable),
            suggested_improvements: non_blank(self.suggested_improvements),
            objective_ratings: self.objective_ratings,
            submitted_at,
        }
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|text| !text.trim().is_empty())
}
