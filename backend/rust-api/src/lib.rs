use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod tracker;
pub mod utils;

pub use config::Config;
pub use error::{ComplianceError, ComplianceResult};
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler).layer(middleware::from_fn_with_state(
                app_state.clone(),
                handlers::metrics_auth_middleware,
            )),
        )
        .nest(
            "/api/v1/activities",
            activities_routes().layer(cors.clone()),
        )
        .nest("/api/v1/sessions", sessions_routes().layer(cors))
        .with_state(app_state)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn activities_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{activity_id}/sessions",
            post(handlers::activities::create_session).get(handlers::activities::list_sessions),
        )
        .route(
            "/{activity_id}/completion",
            get(handlers::activities::completion_status),
        )
}

fn sessions_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{id}",
            get(handlers::sessions::get_session).patch(handlers::sessions::save_progress),
        )
        .route("/{id}/events", get(handlers::sessions::list_events))
        .route("/{id}/heartbeat", post(handlers::sessions::heartbeat))
        .route(
            "/{id}/evaluation",
            post(handlers::sessions::submit_evaluation),
        )
        .route("/{id}/criteria", get(handlers::sessions::criteria_report))
        .route("/{id}/complete", post(handlers::sessions::complete_session))
}
