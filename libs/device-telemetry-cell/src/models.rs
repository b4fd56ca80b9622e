// libs/device-telemetry-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ReadingValue {
    Numeric(f64),
    /// Pointer to media held elsewhere, e.g. a stethoscope recording
    Reference(String),
    Raw(Value),
}

impl ReadingValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Numeric(v) => Some(*v),
            _ => None,
        }
    }
}

/// A reading as derived from a device payload, before it is stamped and stored
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CanonicalReading {
    pub reading_type: String,
    pub value: ReadingValue,
    pub unit: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceReading {
    pub id: Uuid,
    pub session_id: String,
    pub device_id: String,
    pub reading_type: String,
    pub value: ReadingValue,
    pub unit: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Critical => write!(f, "critical"),
            Severity::Warning => write!(f, "warning"),
        }
    }
}

/// Threshold hit for one reading, before it becomes a stored alert
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ThresholdBreach {
    pub reading_type: String,
    pub severity: Severity,
    pub message: String,
    pub action_required: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub id: Uuid,
    pub session_id: String,
    pub reading_type: String,
    pub severity: Severity,
    pub message: String,
    pub action_required: String,
    pub raised_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessedTelemetry {
    pub readings: Vec<CanonicalReading>,
    pub alerts: Vec<ThresholdBreach>,
}

/// Body posted by the device gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReadingRequest {
    pub device_id: String,
    pub session_id: String,
    /// Falls back to `rawPayload.type` when absent
    pub device_type: Option<String>,
    pub raw_payload: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestResult {
    pub readings: Vec<DeviceReading>,
    pub alerts: Vec<Alert>,
}
