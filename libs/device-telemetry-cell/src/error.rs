// libs/device-telemetry-cell/src/error.rs
use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<TelemetryError> for AppError {
    fn from(err: TelemetryError) -> Self {
        match err {
            TelemetryError::Validation(msg) => AppError::ValidationError(msg),
            TelemetryError::Storage(msg) => AppError::Unavailable(msg),
        }
    }
}
