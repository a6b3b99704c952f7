use serde::{Deserialize, Serialize};

const DEFAULT_MINIMUM_ACTIVE_MINUTES: u32 = 50;
const DEFAULT_CREDIT_HOURS: f64 = 1.0;

/// Activity catalog entry. Read-only for the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub version: String,
    #[serde(default)]
    pub default_credit_hours: Option<f64>,
    #[serde(default)]
    pub ce_metadata: Option<CeMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeMetadata {
    #[serde(default)]
    pub learning_objectives: Vec<String>,
    #[serde(default)]
    pub credit_hours: Option<f64>,
    pub completion_criteria: CompletionCriteria,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionCriteria {
    pub minimum_active_minutes: u32,
    #[serde(default)]
    pub all_questions_answered: bool,
    #[serde(default)]
    pub self_assessment_required: bool,
    #[serde(default)]
    pub post_activity_evaluation_required: bool,
}

impl Default for CompletionCriteria {
    fn default() -> Self {
        Self {
            minimum_active_minutes: DEFAULT_MINIMUM_ACTIVE_MINUTES,
            all_questions_answered: false,
            self_assessment_required: false,
            post_activity_evaluation_required: false,
        }
    }
}

/// Criteria plus the objective count the self-assessment is measured against.
#[derive(Debug, Clone, PartialEq)]
pub struct Rubric {
    pub criteria: CompletionCriteria,
    pub objective_count: usize,
}

impl Activity {
    pub fn rubric(&self) -> Rubric {
        match &self.ce_metadata {
            Some(meta) => Rubric {
                criteria: meta.completion_criteria.clone(),
                objective_count: meta.learning_objectives.len(),
            },
            None => Rubric {
                criteria: CompletionCriteria::default(),
                objective_count: 0,
            },
        }
    }

    /// CE metadata first, then the activity default, then one hour.
    pub fn credit_hours(&self) -> f64 {
        self.ce_metadata
            .as_ref()
            .and_then(|meta| meta.credit_hours)
            .or(self.default_credit_hours)
            .unwrap_or(DEFAULT_CREDIT_HOURS)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerProfile {
    #[serde(rename = "_id")]
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub license_type: Option<String>,
    #[serde(default)]
    pub license_number: Option<String>,
    #[serde(default)]
    pub license_state: Option<String>,
}

impl LearnerProfile {
    /// "type number (state)" when a license number is on file.
    pub fn license_display(&self) -> Option<String> {
        let number = self
            .license_number
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())?;

        let mut display = match self.license_type.as_deref().map(str::trim) {
            Some(kind) if !kind.is_empty() => format!("{} {}", kind, number),
            _ => number.to_string(),
        };
        if let Some(state) = self
            .license_state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            display.push_str(&format!(" ({})", state));
        }
        Some(display)
    }
}

/// Shape of the JSON file loaded by the in-memory catalog.
#[derive(Debug, Default, Deserialize)]
pub struct CatalogSeed {
    #[serde(default)]
    pub activities: Vec<Activity>,
    #[serde(default)]
    pub learners: Vec<LearnerProfile>,
}
