use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

use device_telemetry_cell::router::device_telemetry_routes;
use device_telemetry_cell::TelemetryState;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};

fn create_app() -> (Router, TestConfig) {
    let config = TestConfig::default();
    let state = TelemetryState::from_config(config.to_arc());
    (device_telemetry_routes(state), config)
}

async fn send(app: &Router, method: Method, uri: &str, auth: Option<String>, body: Option<Value>) -> (StatusCode, Value) {
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
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

fn bearer(config: &TestConfig, user: &TestUser) -> String {
    format!("Bearer {}", JwtTestUtils::create_test_token(user, &config.jwt_secret, None))
}

#[tokio::test]
async fn test_health_reports_rule_count() {
    let (app, _) = create_app();

    let (status, json) = send(&app, Method::GET, "/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["service"], "device-telemetry");
    assert_eq!(json["threshold_rules"], 6);
}

#[tokio::test]
async fn test_reading_requires_authentication() {
    let (app, _) = create_app();

    let (status, _) = send(
        &app,
        Method::POST,
        "/readings",
        None,
        Some(json!({ "deviceId": "cuff-01", "sessionId": "TH-2026-X", "deviceType": "blood_pressure_monitor", "rawPayload": {} })),
    )
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_ingest_then_query_alerts() {
    let (app, config) = create_app();
    let patient_auth = bearer(&config, &TestUser::patient("pat@example.com"));
    let doctor_auth = bearer(&config, &TestUser::doctor("doc@example.com"));

    let (status, json) = send(
        &app,
        Method::POST,
        "/readings",
        Some(patient_auth.clone()),
        Some(json!({
            "deviceId": "cuff-01",
            "sessionId": "TH-2026-BPCRISIS",
            "deviceType": "blood_pressure_monitor",
            "rawPayload": { "systolic": 190, "diastolic": 100 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["readings"].as_array().unwrap().len(), 2);
    assert_eq!(json["alerts"][0]["severity"], "critical");

    let (status, _) = send(&app, Method::GET, "/sessions/TH-2026-BPCRISIS/alerts", Some(patient_auth), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(&app, Method::GET, "/sessions/TH-2026-BPCRISIS/alerts", Some(doctor_auth.clone()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 1);
    assert_eq!(json["alerts"][0]["message"], "hypertensive crisis");

    let (status, json) = send(&app, Method::GET, "/sessions/TH-2026-BPCRISIS/readings", Some(doctor_auth), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["total"], 2);
    assert_eq!(json["readings"][0]["unit"], "mmHg");
}

#[tokio::test]
async fn test_malformed_payload_is_bad_request() {
    let (app, config) = create_app();

    let (status, json) = send(
        &app,
        Method::POST,
        "/readings",
        Some(bearer(&config, &TestUser::doctor("doc@example.com"))),
        Some(json!({
            "deviceId": "ox-7",
            "sessionId": "TH-2026-OX",
            "deviceType": "pulse_oximeter",
            "rawPayload": { "pulse": 70 }
        })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("spo2"));
}
