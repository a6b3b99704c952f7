use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{send, CE_ACTIVITY, LEARNER, PRACTICE_ACTIVITY};

fn complete_uri(session_id: &str) -> String {
    format!("/api/v1/sessions/{}/complete", session_id)
}

#[tokio::test]
async fn test_criteria_report_lists_every_unmet_rule() {
    let app = common::create_test_app().await;
    let session_id = common::start_ce_session(&app).await;

    let (status, json) = send(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}/criteria", session_id),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["sessionId"], session_id.as_str());
    assert_eq!(json["ceEligible"], true);
    assert_eq!(json["alreadyIssued"], false);
    assert_eq!(json["satisfied"], false);
    assert_eq!(
        json["criteria"],
        json!([
            "All questions must be answered",
            "Minimum 50 active minutes required (0 completed)",
            "Self-assessment for all learning objectives is required",
            "Post-activity evaluation must be submitted"
        ])
    );
}

#[tokio::test]
async fn test_criteria_report_for_unknown_session_returns_404() {
    let app = common::create_test_app().await;

    let (status, _) = send(&app, "GET", "/api/v1/sessions/nope/criteria", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_complete_before_criteria_returns_400_with_reasons() {
    let app = common::create_test_app().await;
    let session_id = common::start_ce_session(&app).await;

    let (status, json) = send(&app, "POST", &complete_uri(&session_id), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "Completion criteria not met");
    assert_eq!(json["criteria"].as_array().unwrap().len(), 4);

    let (_, session) = send(&app, "GET", &format!("/api/v1/sessions/{}", session_id), None).await;
    assert_eq!(session["status"], "in_progress");
}

#[tokio::test]
async fn test_complete_partial_self_assessment_is_reported() {
    let app = common::create_test_app_with(common::ungated_settings()).router;
    let session_id = common::start_ce_session(&app).await;
    common::satisfy_all_criteria(&app, &session_id).await;

    send(
        &app,
        "PATCH",
        &format!("/api/v1/sessions/{}", session_id),
        Some(json!({ "selfAssessmentRatings": { "obj-1": 4, "obj-2": 5 } })),
    )
    .await;

    let (status, json) = send(&app, "POST", &complete_uri(&session_id), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        json["criteria"],
        json!(["Self-assessment for all learning objectives is required"])
    );
}

#[tokio::test]
async fn test_complete_non_ce_session_returns_400() {
    let app = common::create_test_app().await;
    let session = common::start_session(&app, CE_ACTIVITY, false).await;
    let session_id = session["id"].as_str().unwrap();

    let (status, json) = send(&app, "POST", &complete_uri(session_id), None).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"], "This session was not opted in for CE credit");
}

#[tokio::test]
async fn test_complete_unknown_session_returns_404() {
    let app = common::create_test_app().await;

    let (status, _) = send(&app, "POST", &complete_uri("missing"), None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_full_completion_issues_certificate_once() {
    let app = common::create_test_app_with(common::ungated_settings()).router;
    let session_id = common::start_ce_session(&app).await;
    common::satisfy_all_criteria(&app, &session_id).await;

    let (status, report) = send(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}/criteria", session_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["satisfied"], true);
    assert!(report["criteria"].as_array().unwrap().is_empty());

    let (status, record) = send(&app, "POST", &complete_uri(&session_id), None).await;
    assert_eq!(status, StatusCode::CREATED, "body: {}", record);

    let number = record["certificateNumber"].as_str().unwrap();
    let parts: Vec<&str> = number.split('-').collect();
    assert_eq!(parts.len(), 3);
    assert_eq!(parts[0], "NCA");
    assert_eq!(parts[1].len(), 8);
    assert_eq!(parts[2].len(), 8);
    assert!(parts[2]
        .chars()
        .all(|c| c.is_ascii_digit() || ('A'..='F').contains(&c)));

    assert_eq!(record["sessionId"], session_id.as_str());
    assert_eq!(record["learnerName"], "Alice Moreau");
    assert_eq!(record["learnerLicense"], "DC 12345 (CA)");
    assert_eq!(record["activityTitle"], "Lumbar Disc Herniation");
    assert_eq!(record["activityVersion"], "2.1");
    assert_eq!(record["creditHours"], 1.5);
    assert_eq!(record["durationMinutes"], 50);

    let (_, session) = send(&app, "GET", &format!("/api/v1/sessions/{}", session_id), None).await;
    assert_eq!(session["status"], "completed");
    assert!(session["completedAt"].is_string());

    let (status, json) = send(&app, "POST", &complete_uri(&session_id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "CE credit already issued for this session");
    assert_eq!(json["completion"]["certificateNumber"], number);

    let (_, report) = send(
        &app,
        "GET",
        &format!("/api/v1/sessions/{}/criteria", session_id),
        None,
    )
    .await;
    assert_eq!(report["alreadyIssued"], true);
}

#[tokio::test]
async fn test_completion_lookup_reports_latest_credit() {
    let app = common::create_test_app_with(common::ungated_settings()).router;
    let uri = format!(
        "/api/v1/activities/{}/completion?learnerId={}",
        CE_ACTIVITY, LEARNER
    );

    let (status, json) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json, json!({ "completed": false, "completion": null }));

    let session_id = common::start_ce_session(&app).await;
    common::satisfy_all_criteria(&app, &session_id).await;
    let (_, record) = send(&app, "POST", &complete_uri(&session_id), None).await;

    let (status, json) = send(&app, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["completed"], true);
    assert_eq!(
        json["completion"]["certificateNumber"],
        record["certificateNumber"]
    );

    let (_, other) = send(
        &app,
        "GET",
        &format!(
            "/api/v1/activities/{}/completion?learnerId={}",
            PRACTICE_ACTIVITY, LEARNER
        ),
        None,
    )
    .await;
    assert_eq!(other["completed"], false);
}

#[tokio::test]
async fn test_completed_attempt_is_listed_with_evaluation_and_record() {
    let app = common::create_test_app_with(common::ungated_settings()).router;
    let session_id = common::start_ce_session(&app).await;
    common::satisfy_all_criteria(&app, &session_id).await;
    send(&app, "POST", &complete_uri(&session_id), None).await;

    let (_, json) = send(
        &app,
        "GET",
        &format!(
            "/api/v1/activities/{}/sessions?learnerId={}",
            CE_ACTIVITY, LEARNER
        ),
        None,
    )
    .await;

    let attempt = &json["sessions"][0];
    assert_eq!(attempt["id"], session_id.as_str());
    assert_eq!(attempt["evaluation"]["objectivesMet"], 5);
    assert!(attempt["completion"]["certificateNumber"].is_string());
}

#[tokio::test]
async fn test_second_evaluation_returns_409() {
    let app = common::create_test_app().await;
    let session_id = common::start_ce_session(&app).await;
    let uri = format!("/api/v1/sessions/{}/evaluation", session_id);

    let (status, json) = send(&app, "POST", &uri, Some(common::evaluation_body())).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["sessionId"], session_id.as_str());
    assert_eq!(json["learnerId"], LEARNER);

    let (status, json) = send(&app, "POST", &uri, Some(common::evaluation_body())).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["error"], "Evaluation already submitted for this session");
}

#[tokio::test]
async fn test_evaluation_with_out_of_range_rating_returns_400() {
    let app = common::create_test_app().await;
    let session_id = common::start_ce_session(&app).await;

    let mut body = common::evaluation_body();
    body["wouldRecommend"] = json!(0);
    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/v1/sessions/{}/evaluation", session_id),
        Some(body),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_evaluation_for_unknown_session_returns_404() {
    let app = common::create_test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/sessions/missing/evaluation",
        Some(common::evaluation_body()),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_health_reports_in_memory_dependencies() {
    let app = common::create_test_app().await;

    let (status, json) = send(&app, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "ce-compliance-api");
    assert_eq!(json["dependencies"]["store"]["status"], "healthy");
    assert_eq!(json["dependencies"]["catalog"]["status"], "healthy");
}

#[tokio::test]
async fn test_metrics_require_basic_auth() {
    let app = common::create_test_app().await;

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let credentials = general_purpose::STANDARD.encode("admin:changeme");
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("GET")
                .uri("/metrics")
                .header("authorization", format!("Basic {}", credentials))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("http_requests_total"));
}
