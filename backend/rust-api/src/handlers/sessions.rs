use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::models::{EventList, HeartbeatRequest, SaveProgressRequest, SubmitEvaluationRequest};
use crate::services::{
    completion_service::CompletionService, evaluation_service::EvaluationService,
    heartbeat_service::HeartbeatService, session_service::SessionService, AppState,
};

fn completion_service(state: &AppState) -> CompletionService {
    CompletionService::new(
        state.store.clone(),
        state.catalog.clone(),
        state.learners.clone(),
        state.config.engine.clone(),
    )
}

/// GET /api/v1/sessions/{id}
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(state.store.clone(), state.catalog.clone());
    let session = service.get_session(&session_id).await?;
    Ok(Json(session))
}

/// PATCH /api/v1/sessions/{id}
pub async fn save_progress(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SaveProgressRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(state.store.clone(), state.catalog.clone());
    let session = service.save_progress(&session_id, req).await?;
    Ok(Json(session))
}

/// GET /api/v1/sessions/{id}/events
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(state.store.clone(), state.catalog.clone());
    let events = service.list_events(&session_id).await?;
    Ok(Json(EventList { events }))
}

/// POST /api/v1/sessions/{id}/heartbeat
///
/// An empty body is a bare active ping from older clients.
pub async fn heartbeat(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        HeartbeatRequest::default()
    } else {
        serde_json::from_slice::<HeartbeatRequest>(&body).map_err(|e| {
            tracing::warn!("Malformed heartbeat for session {}: {}", session_id, e);
            ApiError::malformed_body(e)
        })?
    };

    let service = HeartbeatService::new(state.store.clone(), state.config.engine.clone());
    let response = service.advance(&session_id, req).await?;
    Ok(Json(response))
}

/// POST /api/v1/sessions/{id}/evaluation
pub async fn submit_evaluation(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    AppJson(req): AppJson<SubmitEvaluationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let service = EvaluationService::new(state.store.clone());
    let evaluation = service.submit(&session_id, req).await?;
    Ok((StatusCode::CREATED, Json(evaluation)))
}

/// GET /api/v1/sessions/{id}/criteria
pub async fn criteria_report(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let report = completion_service(&state)
        .criteria_report(&session_id)
        .await?;
    Ok(Json(report))
}

/// POST /api/v1/sessions/{id}/complete
pub async fn complete_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!("Completing session: {}", session_id);

    let record = completion_service(&state).complete(&session_id).await?;
    Ok((StatusCode::CREATED, Json(record)))
}
