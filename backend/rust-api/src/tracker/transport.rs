use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::error::NOT_IN_PROGRESS;
use crate::models::{HeartbeatRejection, HeartbeatRequest, HeartbeatResponse};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("heartbeat too frequent (server has {active_seconds}s active)")]
    RateLimited { active_seconds: u64 },

    #[error("heartbeat rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("heartbeat delivery failed: {0}")]
    Delivery(String),
}

impl TransportError {
    /// The session is gone or no longer accepts heartbeats. Other 400s
    /// (oversized or malformed batches) leave the session open.
    pub fn is_terminal(&self) -> bool {
        match self {
            TransportError::Rejected { status: 404, .. } => true,
            TransportError::Rejected {
                status: 400,
                message,
            } => message == NOT_IN_PROGRESS,
            _ => false,
        }
    }
}

#[async_trait]
pub trait HeartbeatTransport: Send + Sync {
    async fn send(
        &self,
        session_id: &str,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError>;
}

/// Posts heartbeats to `{base_url}/api/v1/sessions/{id}/heartbeat`.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> anyhow::Result<Self> {
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self { client, base_url })
    }

    pub fn endpoint(&self, session_id: &str) -> Result<Url, TransportError> {
        self.base_url
            .join(&format!("api/v1/sessions/{}/heartbeat", session_id))
            .map_err(|e| TransportError::Delivery(format!("invalid heartbeat url: {}", e)))
    }
}

#[async_trait]
impl HeartbeatTransport for HttpTransport {
    async fn send(
        &self,
        session_id: &str,
        request: &HeartbeatRequest,
    ) -> Result<HeartbeatResponse, TransportError> {
        let response = self
            .client
            .post(self.endpoint(session_id)?)
            .json(request)
            .send()
            .await
            .map_err(|e| TransportError::Delivery(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return response
                .json::<HeartbeatResponse>()
                .await
                .map_err(|e| TransportError::Delivery(format!("bad heartbeat response: {}", e)));
        }

        if status == StatusCode::TOO_MANY_REQUESTS {
            let rejection = response
                .json::<HeartbeatRejection>()
                .await
                .map_err(|e| TransportError::Delivery(format!("bad 429 body: {}", e)))?;
            return Err(TransportError::RateLimited {
                active_seconds: rejection.active_seconds,
            });
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
            .unwrap_or(body);
        Err(TransportError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_keeps_base_path() {
        let transport = HttpTransport::new("https://ce.example.org/app").unwrap();
        assert_eq!(
            transport.endpoint("abc").unwrap().as_str(),
            "https://ce.example.org/app/api/v1/sessions/abc/heartbeat"
        );
    }

    #[test]
    fn only_missing_or_closed_sessions_are_terminal() {
        let rejected = |status, message: &str| TransportError::Rejected {
            status,
            message: message.to_string(),
        };
        assert!(rejected(404, "Session not found").is_terminal());
        assert!(rejected(400, NOT_IN_PROGRESS).is_terminal());
        assert!(!rejected(400, "At most 200 events may be sent per heartbeat").is_terminal());
        assert!(!rejected(400, "Failed to parse JSON request body: EOF").is_terminal());
        assert!(!rejected(503, "").is_terminal());
        assert!(!TransportError::Delivery("reset".into()).is_terminal());
        assert!(!TransportError::RateLimited { active_seconds: 30 }.is_terminal());
    }
}
