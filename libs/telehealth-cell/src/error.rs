use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug)]
pub enum TelehealthError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("State conflict on session {session_id}: {message}")]
    StateConflict { session_id: String, message: String },

    #[error("Compliance check blocked session {session_id}: {reason}")]
    ComplianceBlocked { session_id: String, reason: String },

    #[error("Waiting room entry {entry_id} cannot be admitted: {reason}")]
    NotAdmittable { entry_id: u64, reason: String },

    #[error("Webhook authenticity check failed")]
    Authenticity,

    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TelehealthError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TelehealthError::Transient(_))
    }
}

impl From<TelehealthError> for AppError {
    fn from(err: TelehealthError) -> Self {
        match err {
            TelehealthError::Validation(msg) => AppError::ValidationError(msg),
            TelehealthError::NotFound(msg) => AppError::NotFound(msg),
            e @ TelehealthError::StateConflict { .. } => AppError::Conflict(e.to_string()),
            e @ TelehealthError::ComplianceBlocked { .. } => AppError::PreconditionFailed(e.to_string()),
            e @ TelehealthError::NotAdmittable { .. } => AppError::PreconditionFailed(e.to_string()),
            // Never echo why a signature was rejected
            TelehealthError::Authenticity => AppError::Auth("Unauthorized".to_string()),
            TelehealthError::Transient(msg) => AppError::Unavailable(msg),
            TelehealthError::Serialization(e) => AppError::BadRequest(format!("Invalid payload: {}", e)),
        }
    }
}
