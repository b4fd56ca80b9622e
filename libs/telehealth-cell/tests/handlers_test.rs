use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use shared_utils::signature::SIGNATURE_HEADER;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser, WebhookTestUtils};
use telehealth_cell::router::telehealth_routes;
use telehealth_cell::services::InMemorySessionStore;
use telehealth_cell::TelehealthState;

fn create_app() -> (Router, TestConfig) {
    let config = TestConfig::default();
    let state = TelehealthState::new(config.to_arc(), Arc::new(InMemorySessionStore::new()));
    (telehealth_routes(state), config)
}

fn bearer(config: &TestConfig, user: &TestUser) -> String {
    format!("Bearer {}", JwtTestUtils::create_test_token(user, &config.jwt_secret, None))
}

async fn send(app: &Router, method: Method, uri: &str, auth: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header("Authorization", auth);
    }

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, json)
}

fn session_body(provider_id: Uuid, patient_id: &str, meeting: &str, consent: bool) -> Value {
    json!({
        "external_meeting_id": meeting,
        "patient_id": patient_id,
        "provider_id": provider_id,
        "scheduled_start": "2026-10-16T09:00:00Z",
        "consent_obtained": consent,
        "chief_complaint": "rash"
    })
}

#[tokio::test]
async fn test_health_check_is_public() {
    let (app, _) = create_app();

    let (status, json) = send(&app, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["store_backend"], "memory");
    assert_eq!(json["webhook_configured"], true);
}

#[tokio::test]
async fn test_protected_routes_require_token() {
    let (app, config) = create_app();

    let (status, _) = send(&app, Method::GET, "/sessions/TH-2026-ABCDEFGH", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let expired = format!(
        "Bearer {}",
        JwtTestUtils::create_expired_token(&TestUser::doctor("doc@example.com"), &config.jwt_secret)
    );
    let (status, _) = send(&app, Method::GET, "/sessions/TH-2026-ABCDEFGH", Some(&expired), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_patient_cannot_schedule_sessions() {
    let (app, config) = create_app();
    let patient = TestUser::patient("pat@example.com");

    let (status, _) = send(
        &app,
        Method::POST,
        "/sessions",
        Some(&bearer(&config, &patient)),
        Some(session_body(Uuid::new_v4(), &patient.id, "MX-h1", true)),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_session_lifecycle_over_http() {
    let (app, config) = create_app();
    let doctor = TestUser::doctor("doc@example.com");
    let patient = TestUser::patient("pat@example.com");
    let doctor_auth = bearer(&config, &doctor);
    let patient_auth = bearer(&config, &patient);
    let provider_id = Uuid::new_v4();

    let (status, created) = send(
        &app,
        Method::POST,
        "/sessions",
        Some(&doctor_auth),
        Some(session_body(provider_id, &patient.id, "MX-h2", true)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let session_id = created["session"]["id"].as_str().unwrap().to_string();
    assert!(session_id.starts_with("TH-"));
    assert_eq!(created["session"]["status"], "scheduled");

    let (status, entry) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/waiting-room", session_id),
        Some(&patient_auth),
        Some(json!({ "priority": "urgent" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(entry["entry"]["estimated_wait_minutes"], 5);

    let (status, next) = send(
        &app,
        Method::GET,
        &format!("/waiting-room/{}/next", provider_id),
        Some(&doctor_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(next["next"]["session_id"], session_id.as_str());

    let (status, admitted) = send(
        &app,
        Method::POST,
        &format!("/waiting-room/{}/admit-next", provider_id),
        Some(&doctor_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(admitted["session"]["status"], "in_progress");
    assert_eq!(admitted["entry"]["entry_status"], "admitted");

    // in-progress sessions cannot be cancelled, only ended
    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/cancel", session_id),
        Some(&patient_auth),
        Some(json!({ "reason": "changed my mind" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, ended) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/end", session_id),
        Some(&doctor_auth),
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ended["session"]["status"], "completed");

    let (status, audit) = send(
        &app,
        Method::GET,
        &format!("/sessions/{}/audit", session_id),
        Some(&patient_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(audit["entries"].as_array().unwrap().len(), 1);
    assert_eq!(audit["entries"][0]["outcome"], "pass");
}

#[tokio::test]
async fn test_compliance_blocked_admit_is_precondition_failed() {
    let (app, config) = create_app();
    let doctor_auth = bearer(&config, &TestUser::doctor("doc@example.com"));
    let provider_id = Uuid::new_v4();

    let (_, created) = send(
        &app,
        Method::POST,
        "/sessions",
        Some(&doctor_auth),
        Some(session_body(provider_id, &Uuid::new_v4().to_string(), "MX-h3", false)),
    )
    .await;
    let session_id = created["session"]["id"].as_str().unwrap().to_string();

    let (_, entry) = send(
        &app,
        Method::POST,
        &format!("/sessions/{}/waiting-room", session_id),
        Some(&doctor_auth),
        Some(json!({})),
    )
    .await;
    let entry_id = entry["entry"]["id"].as_u64().unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/waiting-room/entries/{}/admit", entry_id),
        Some(&doctor_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(body["error"].as_str().unwrap().contains("consent"));

    let (status, body) = send(
        &app,
        Method::PUT,
        &format!("/sessions/{}/status", session_id),
        Some(&doctor_auth),
        Some(json!({ "status": "in_progress" })),
    )
    .await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);
    assert!(body["error"].as_str().unwrap().contains("Compliance"));

    let (_, session) = send(&app, Method::GET, &format!("/sessions/{}", session_id), Some(&doctor_auth), None).await;
    assert_eq!(session["session"]["status"], "waiting");

    let (status, consent) = send(
        &app,
        Method::PUT,
        &format!("/sessions/{}/consent", session_id),
        Some(&doctor_auth),
        Some(json!({ "consent_obtained": true })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(consent["session"]["consent_obtained"], true);

    let (status, admitted) = send(
        &app,
        Method::POST,
        &format!("/waiting-room/entries/{}/admit", entry_id),
        Some(&doctor_auth),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(admitted["session"]["status"], "in_progress");
}

#[tokio::test]
async fn test_other_patient_cannot_read_session() {
    let (app, config) = create_app();
    let doctor_auth = bearer(&config, &TestUser::doctor("doc@example.com"));
    let stranger_auth = bearer(&config, &TestUser::patient("other@example.com"));

    let (_, created) = send(
        &app,
        Method::POST,
        "/sessions",
        Some(&doctor_auth),
        Some(session_body(Uuid::new_v4(), &Uuid::new_v4().to_string(), "MX-h4", true)),
    )
    .await;
    let session_id = created["session"]["id"].as_str().unwrap().to_string();

    let (status, _) = send(&app, Method::GET, &format!("/sessions/{}", session_id), Some(&stranger_auth), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_webhook_signature_enforced() {
    let (app, config) = create_app();
    let body = WebhookTestUtils::event_body("meeting-started", "MX-h5", 1, json!({}));

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/conferencing")
                .header(SIGNATURE_HEADER, "sha256=deadbeef")
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"], "Unauthorized");

    let (_, signature) = WebhookTestUtils::signed_event(&config.webhook_secret, "participant-left", "MX-h5", 1, json!({}));
    let ignored = WebhookTestUtils::event_body("participant-left", "MX-h5", 1, json!({}));
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/webhooks/conferencing")
                .header(SIGNATURE_HEADER, format!("sha256={}", signature))
                .body(Body::from(ignored))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_dead_letters_are_admin_only() {
    let (app, config) = create_app();

    let (status, _) = send(
        &app,
        Method::GET,
        "/admin/dead-letters",
        Some(&bearer(&config, &TestUser::doctor("doc@example.com"))),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(
        &app,
        Method::GET,
        "/admin/dead-letters",
        Some(&bearer(&config, &TestUser::admin("admin@example.com"))),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 0);
}
