// libs/device-telemetry-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

/// Creates the device telemetry routes, mounted under `/devices`
pub fn device_telemetry_routes(state: TelemetryState) -> Router {
    let public_routes = Router::new().route("/health", get(telemetry_health_check));

    let protected_routes = Router::new()
        .route("/readings", post(ingest_reading))
        .route("/sessions/{session_id}/readings", get(get_session_readings))
        .route("/sessions/{session_id}/alerts", get(get_session_alerts))
        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
