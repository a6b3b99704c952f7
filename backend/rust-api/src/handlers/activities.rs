use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;

use super::ApiError;
use crate::extractors::AppJson;
use crate::models::{CreateSessionRequest, LearnerQuery};
use crate::services::{
    completion_service::CompletionService, session_service::SessionService, AppState,
};

/// POST /api/v1/activities/{activity_id}/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Path(activity_id): Path<String>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    tracing::info!(
        "Creating session for learner_id={}, activity_id={}, ce_eligible={}",
        req.learner_id,
        activity_id,
        req.ce_eligible
    );

    let service = SessionService::new(state.store.clone(), state.catalog.clone());
    let session = service.create_session(&activity_id, req).await?;

    Ok((StatusCode::CREATED, Json(session)))
}

/// GET /api/v1/activities/{activity_id}/sessions?learnerId=
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    Path(activity_id): Path<String>,
    Query(query): Query<LearnerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = SessionService::new(state.store.clone(), state.catalog.clone());
    let attempts = service
        .list_attempts(&activity_id, &query.learner_id)
        .await?;

    Ok(Json(attempts))
}

/// GET /api/v1/activities/{activity_id}/completion?learnerId=
pub async fn completion_status(
    State(state): State<Arc<AppState>>,
    Path(activity_id): Path<String>,
    Query(query): Query<LearnerQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = CompletionService::new(
        state.store.clone(),
        state.catalog.clone(),
        state.learners.clone(),
        state.config.engine.clone(),
    );
    let lookup = service
        .completion_for(&activity_id, &query.learner_id)
        .await?;

    Ok(Json(lookup))
}
