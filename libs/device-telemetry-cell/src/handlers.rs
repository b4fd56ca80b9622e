// libs/device-telemetry-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::require_provider;

use crate::models::DeviceReadingRequest;
use crate::services::{DeviceTelemetryProcessor, InMemoryTelemetryStore, TelemetryStore, ThresholdTable};

#[derive(Clone)]
pub struct TelemetryState {
    pub config: Arc<AppConfig>,
    pub processor: Arc<DeviceTelemetryProcessor>,
}

impl TelemetryState {
    pub fn new(config: Arc<AppConfig>, thresholds: ThresholdTable, store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            config,
            processor: Arc::new(DeviceTelemetryProcessor::new(thresholds, store)),
        }
    }

    /// Default clinical thresholds over the in-memory store
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        Self::new(config, ThresholdTable::default(), Arc::new(InMemoryTelemetryStore::new()))
    }
}

pub async fn telemetry_health_check(State(state): State<TelemetryState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "device-telemetry",
        "threshold_rules": state.processor.thresholds().rules().len(),
        "timestamp": Utc::now().to_rfc3339()
    }))
}

pub async fn ingest_reading(
    State(state): State<TelemetryState>,
    Extension(_user): Extension<User>,
    Json(request): Json<DeviceReadingRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let result = state.processor.ingest(request).await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "readings": result.readings,
            "alerts": result.alerts
        })),
    ))
}

pub async fn get_session_readings(
    State(state): State<TelemetryState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let readings = state.processor.readings_for(&session_id).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "readings": readings,
        "total": readings.len()
    })))
}

pub async fn get_session_alerts(
    State(state): State<TelemetryState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let alerts = state.processor.alerts_for(&session_id).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "alerts": alerts,
        "total": alerts.len()
    })))
}
