use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;

use crate::error::ComplianceError;
use crate::metrics;
use crate::services::AppState;

/// Maps engine errors onto JSON responses.
#[derive(Debug)]
pub struct ApiError(pub ComplianceError);

impl From<ComplianceError> for ApiError {
    fn from(err: ComplianceError) -> Self {
        ApiError(err)
    }
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError(ComplianceError::Validation(message.into()))
    }

    pub fn malformed_body(detail: impl std::fmt::Display) -> Self {
        Self::bad_request(format!("Failed to parse JSON request body: {}", detail))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.0.to_string();
        let (status, body) = match self.0 {
            ComplianceError::NotFound(_) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ComplianceError::InvalidState(_) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ComplianceError::RateLimited { active_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                json!({ "error": message, "activeSeconds": active_seconds }),
            ),
            ComplianceError::CriteriaNotMet(criteria) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Completion criteria not met", "criteria": criteria }),
            ),
            ComplianceError::AlreadyIssued(completion) => (
                StatusCode::CONFLICT,
                json!({ "error": message, "completion": completion }),
            ),
            ComplianceError::NotEligible => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ComplianceError::AlreadySubmitted(_) => {
                (StatusCode::CONFLICT, json!({ "error": message }))
            }
            ComplianceError::Validation(_) => {
                (StatusCode::BAD_REQUEST, json!({ "error": message }))
            }
            ComplianceError::Internal(e) => {
                tracing::error!("Internal error: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut status = "healthy";
    let mut dependencies = serde_json::Map::new();
    let mut all_healthy = true;

    let store_health = check_dependency("Session store", state.store.health_check()).await;
    dependencies.insert("store".to_string(), json!(store_health));
    if store_health.get("status").and_then(|v| v.as_str()) != Some("healthy") {
        all_healthy = false;
        status = "degraded";
    }

    let catalog_health = check_dependency("Activity catalog", state.catalog.health_check()).await;
    dependencies.insert("catalog".to_string(), json!(catalog_health));
    if catalog_health.get("status").and_then(|v| v.as_str()) != Some("healthy") {
        all_healthy = false;
        status = "degraded";
    }

    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "service": "ce-compliance-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": dependencies
        })),
    )
}

async fn check_dependency<F>(name: &str, check: F) -> serde_json::Map<String, serde_json::Value>
where
    F: Future<Output = anyhow::Result<()>>,
{
    let mut result = serde_json::Map::new();

    match tokio::time::timeout(std::time::Duration::from_secs(1), check).await {
        Ok(Ok(())) => {
            result.insert("status".to_string(), json!("healthy"));
            result.insert("message".to_string(), json!(format!("{} reachable", name)));
        }
        Ok(Err(e)) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("{} error: {}", name, e)));
        }
        Err(_) => {
            result.insert("status".to_string(), json!("unhealthy"));
            result.insert("error".to_string(), json!(format!("{} timeout after 1s", name)));
        }
    }

    result
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

/// Protects /metrics with HTTP Basic Auth against the configured `user:password`.
pub async fn metrics_auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let auth_header = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let encoded = auth_header
        .strip_prefix("Basic ")
        .ok_or(StatusCode::UNAUTHORIZED)?;
    let decoded = general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| StatusCode::UNAUTHORIZED)?;
    let credentials = String::from_utf8(decoded).map_err(|_| StatusCode::UNAUTHORIZED)?;

    if credentials != state.config.metrics_auth {
        return Err(StatusCode::UNAUTHORIZED);
    }

    Ok(next.run(request).await)
}

pub mod activities;
pub mod sessions;
