use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::config::EngineSettings;
use crate::error::{ComplianceError, ComplianceResult};
use crate::metrics::{CREDITED_SECONDS_TOTAL, HEARTBEATS_TOTAL, HEARTBEAT_EVENTS_TOTAL};
use crate::models::{HeartbeatRequest, HeartbeatResponse, NewActivityEvent};
use crate::services::store::{HeartbeatUpdate, HeartbeatWrite, SessionStore};

/// Server side of the heartbeat protocol: cadence gate, counter credit and
/// event append.
pub struct HeartbeatService {
    store: Arc<dyn SessionStore>,
    settings: EngineSettings,
}

impl HeartbeatService {
    pub fn new(store: Arc<dyn SessionStore>, settings: EngineSettings) -> Self {
        Self { store, settings }
    }

    pub async fn advance(
        &self,
        session_id: &str,
        req: HeartbeatRequest,
    ) -> ComplianceResult<HeartbeatResponse> {
        self.advance_at(session_id, req, Utc::now()).await
    }

    /// `advance` with an explicit receipt time.
    pub async fn advance_at(
        &self,
        session_id: &str,
        req: HeartbeatRequest,
        received_at: DateTime<Utc>,
    ) -> ComplianceResult<HeartbeatResponse> {
        let HeartbeatRequest {
            is_active,
            current_phase,
            events,
            phase_timings,
        } = req;

        if events.len() > self.settings.max_events_per_heartbeat {
            return Err(ComplianceError::Validation(format!(
                "At most {} events may be sent per heartbeat",
                self.settings.max_events_per_heartbeat
            )));
        }

        let events: Vec<NewActivityEvent> = events
            .into_iter()
            .map(|event| event.into_new_event(session_id, current_phase.as_deref(), received_at))
            .collect();
        let event_count = events.len() as u64;
        let increment = self.settings.heartbeat_increment_seconds;

        let update = HeartbeatUpdate {
            received_at,
            min_gap: Duration::seconds(self.settings.min_heartbeat_gap_seconds as i64),
            increment_seconds: increment,
            is_active,
            phase_timings,
            events,
        };

        match self.store.record_heartbeat(session_id, update).await? {
            HeartbeatWrite::Accepted {
                active_seconds,
                idle_seconds,
            } => {
                let kind = if is_active { "active" } else { "idle" };
                HEARTBEATS_TOTAL.with_label_values(&["accepted"]).inc();
                CREDITED_SECONDS_TOTAL
                    .with_label_values(&[kind])
                    .inc_by(increment as f64);
                HEARTBEAT_EVENTS_TOTAL.inc_by(event_count);

                tracing::debug!(
                    "Heartbeat accepted for session {} ({}): active={}s idle={}s, {} events",
                    session_id,
                    kind,
                    active_seconds,
                    idle_seconds,
                    event_count
                );

                Ok(HeartbeatResponse {
                    active_seconds,
                    idle_seconds,
                })
            }
            HeartbeatWrite::TooFrequent { active_seconds } => {
                HEARTBEATS_TOTAL.with_label_values(&["rate_limited"]).inc();
                tracing::warn!(
                    "Heartbeat too frequent for session {} (active={}s)",
                    session_id,
                    active_seconds
                );
                Err(ComplianceError::RateLimited { active_seconds })
            }
            HeartbeatWrite::NotFound => {
                HEARTBEATS_TOTAL.with_label_values(&["not_found"]).inc();
                Err(ComplianceError::session_not_found())
            }
            HeartbeatWrite::NotInProgress => {
                HEARTBEATS_TOTAL.with_label_values(&["closed"]).inc();
                tracing::warn!("Heartbeat for closed session {}", session_id);
                Err(ComplianceError::not_in_progress())
            }
        }
    }
}
