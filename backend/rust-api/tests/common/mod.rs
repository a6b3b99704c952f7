#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
    Router,
};
use ce_compliance_api::{
    config::{Config, EngineSettings},
    create_router,
    models::{Activity, CatalogSeed, CeMetadata, CompletionCriteria, LearnerProfile},
    services::{catalog::InMemoryCatalog, AppState},
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

pub const CE_ACTIVITY: &str = "case-001";
pub const PRACTICE_ACTIVITY: &str = "case-002";
pub const LEARNER: &str = "learner-1";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
}

/// Router over the in-memory backend with default engine settings.
pub async fn create_test_app() -> Router {
    create_test_app_with(EngineSettings::default()).router
}

pub fn create_test_app_with(engine: EngineSettings) -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let mut config = Config::in_memory();
    config.engine = engine;

    let catalog = Arc::new(InMemoryCatalog::from_seed(seed()));
    let state = Arc::new(AppState::in_memory(config, catalog));

    TestApp {
        router: create_router(state.clone()),
        state,
    }
}

/// Settings with no heartbeat gap so a test can credit many heartbeats in a row.
pub fn ungated_settings() -> EngineSettings {
    EngineSettings {
        min_heartbeat_gap_seconds: 0,
        ..EngineSettings::default()
    }
}

pub fn seed() -> CatalogSeed {
    CatalogSeed {
        activities: vec![ce_activity(), practice_activity()],
        learners: vec![learner()],
    }
}

pub fn ce_activity() -> Activity {
    Activity {
        id: CE_ACTIVITY.to_string(),
        title: "Lumbar Disc Herniation".to_string(),
        version: "2.1".to_string(),
        default_credit_hours: Some(1.0),
        ce_metadata: Some(CeMetadata {
            learning_objectives: vec![
                "Identify red flags".to_string(),
                "Select imaging".to_string(),
                "Plan conservative care".to_string(),
            ],
            credit_hours: Some(1.5),
            completion_criteria: CompletionCriteria {
                minimum_active_minutes: 50,
                all_questions_answered: true,
                self_assessment_required: true,
                post_activity_evaluation_required: true,
            },
        }),
    }
}

pub fn practice_activity() -> Activity {
    Activity {
        id: PRACTICE_ACTIVITY.to_string(),
        title: "Practice Case".to_string(),
        version: "1.0".to_string(),
        default_credit_hours: None,
        ce_metadata: None,
    }
}

pub fn learner() -> LearnerProfile {
    LearnerProfile {
        id: LEARNER.to_string(),
        display_name: "Alice Moreau".to_string(),
        license_type: Some("DC".to_string()),
        license_number: Some("12345".to_string()),
        license_state: Some("CA".to_string()),
    }
}

/// Sends a request and returns the status with the decoded JSON body
/// (`Value::Null` for an empty body).
pub async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| {
            panic!(
                "non-JSON body for {} {}: {}",
                method,
                uri,
                String::from_utf8_lossy(&bytes)
            )
        })
    };
    (status, json)
}

pub async fn start_session(app: &Router, activity_id: &str, ce_eligible: bool) -> Value {
    let mut body = json!({ "learnerId": LEARNER, "ceEligible": ce_eligible });
    if ce_eligible {
        body["disclaimerAcceptedAt"] = json!("2026-03-07T09:00:00Z");
    }

    let (status, json) = send(
        app,
        "POST",
        &format!("/api/v1/activities/{}/sessions", activity_id),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "create session failed: {}", json);
    json
}

pub async fn start_ce_session(app: &Router) -> String {
    start_session(app, CE_ACTIVITY, true).await["id"]
        .as_str()
        .unwrap()
        .to_string()
}

pub fn question_response(question_id: &str) -> Value {
    json!({
        "questionId": question_id,
        "phase": "questions",
        "userResponse": "Refer for MRI if deficits progress",
        "responseLength": 34,
        "timeSpentSec": 95,
        "hintsViewed": 0,
        "answerRevealed": false,
        "revealedBeforeAttempt": false,
        "selfConfidence": 4
    })
}

/// Progress that satisfies the answer and self-assessment criteria of the CE activity.
pub fn full_progress() -> Value {
    json!({
        "questionResponses": [question_response("q1"), question_response("q2")],
        "questionsAnswered": 2,
        "selfAssessmentRatings": { "obj-1": 4, "obj-2": 5, "obj-3": 3 }
    })
}

pub fn evaluation_body() -> Value {
    json!({
        "objectivesMet": 5,
        "contentRelevance": 4,
        "contentEvidence": 4,
        "materialQuality": 5,
        "timeAppropriate": 4,
        "wouldRecommend": 5,
        "mostValuable": "Imaging decision walkthrough"
    })
}

pub async fn send_heartbeats(app: &Router, session_id: &str, count: usize) -> Value {
    let uri = format!("/api/v1/sessions/{}/heartbeat", session_id);
    let mut last = Value::Null;
    for _ in 0..count {
        let (status, json) = send(app, "POST", &uri, Some(json!({ "isActive": true }))).await;
        assert_eq!(status, StatusCode::OK, "heartbeat failed: {}", json);
        last = json;
    }
    last
}

/// Drives a CE session on an ungated app until every criterion is met.
pub async fn satisfy_all_criteria(app: &Router, session_id: &str) {
    send_heartbeats(app, session_id, 100).await;

    let (status, json) = send(
        app,
        "PATCH",
        &format!("/api/v1/sessions/{}", session_id),
        Some(full_progress()),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "progress save failed: {}", json);

    let (status, json) = send(
        app,
        "POST",
        &format!("/api/v1/sessions/{}/evaluation", session_id),
        Some(evaluation_body()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "evaluation failed: {}", json);
}
