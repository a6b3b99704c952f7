use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Tags the tracker emits. The log accepts any tag; these are the ones the
/// tracker itself produces.
pub mod event_types {
    pub const PHASE_ENTERED: &str = "phase_entered";
    pub const PHASE_EXITED: &str = "phase_exited";
    pub const IDLE_START: &str = "idle_start";
    pub const IDLE_END: &str = "idle_end";
    pub const TAB_HIDDEN: &str = "tab_hidden";
    pub const TAB_VISIBLE: &str = "tab_visible";
}

/// Append-only audit entry owned by a single session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub id: String,
    pub session_id: String,
    pub event_type: String,
    pub phase: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Event as handed to the store; the store assigns the id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewActivityEvent {
    pub session_id: String,
    pub event_type: String,
    pub phase: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// Event as reported by the client inside a heartbeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEventInput {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ActivityEventInput {
    /// Missing phase falls back to the heartbeat's phase, missing timestamp to receipt time.
    pub fn into_new_event(
        self,
        session_id: &str,
        current_phase: Option<&str>,
        received_at: DateTime<Utc>,
    ) -> NewActivityEvent {
        NewActivityEvent {
            session_id: session_id.to_string(),
            event_type: self.event_type,
            phase: self.phase.or_else(|| current_phase.map(str::to_string)),
            metadata: self.metadata,
            timestamp: self.timestamp.unwrap_or(received_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRequest {
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<ActivityEventInput>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_timings: Option<HashMap<String, u64>>,
}

// An empty body is a bare "still here" ping.
impl Default for HeartbeatRequest {
    fn default() -> Self {
        Self {
            is_active: true,
            current_phase: None,
            events: Vec::new(),
            phase_timings: None,
        }
    }
}

fn default_is_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatResponse {
    pub active_seconds: u64,
    pub idle_seconds: u64,
}

/// Body of a 429 so the client can resynchronise its display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatRejection {
    pub error: String,
    pub active_seconds: u64,
}

#[derive(Debug, Serialize)]
pub struct EventList {
    pub events: Vec<ActivityEvent>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn heartbeat_defaults_to_active() {
        let request: HeartbeatRequest = serde_json::from_value(json!({})).unwrap();
        assert!(request.is_active);
        assert!(request.events.is_empty());
        assert!(request.phase_timings.is_none());
    }

    #[test]
    fn heartbeat_parses_camel_case_body() {
        let request: HeartbeatRequest = serde_json::from_value(json!({
            "isActive": false,
            "currentPhase": "case-work",
            "events": [{ "eventType": "hint_viewed", "metadata": { "questionId": "q1" } }],
            "phaseTimings": { "case-work": 42 }
        }))
        .unwrap();
        assert!(!request.is_active);
        assert_eq!(request.current_phase.as_deref(), Some("case-work"));
        assert_eq!(request.events.len(), 1);
        assert_eq!(request.phase_timings.unwrap()["case-work"], 42);
    }

    #[test]
    fn event_input_inherits_heartbeat_phase_and_receipt_time() {
        let received_at = Utc::now();
        let input = ActivityEventInput {
            event_type: "hint_viewed".to_string(),
            phase: None,
            metadata: None,
            timestamp: None,
        };
        let event = input.into_new_event("s-1", Some("case-work"), received_at);
        assert_eq!(event.phase.as_deref(), Some("case-work"));
        assert_eq!(event.timestamp, received_at);
        assert_eq!(event.session_id, "s-1");
    }

    #[test]
    fn event_input_keeps_its_own_phase() {
        let input = ActivityEventInput {
            event_type: event_types::PHASE_EXITED.to_string(),
            phase: Some("presentation".to_string()),
            metadata: None,
            timestamp: None,
        };
        let event = input.into_new_event("s-1", Some("case-work"), Utc::now());
        assert_eq!(event.phase.as_deref(), Some("presentation"));
    }
}
