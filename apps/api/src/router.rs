use axum::{routing::get, Router};

use device_telemetry_cell::{device_telemetry_routes, TelemetryState};
use telehealth_cell::{telehealth_routes, TelehealthState};

pub fn create_router(telehealth: TelehealthState, telemetry: TelemetryState) -> Router {
    Router::new()
        .route("/", get(|| async { "Telehealth API is running!" }))
        .nest("/telehealth", telehealth_routes(telehealth))
        .nest("/devices", device_telemetry_routes(telemetry))
}
