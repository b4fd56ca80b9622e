use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::error::TelemetryError;
use crate::models::{
    Alert, CanonicalReading, DeviceReading, DeviceReadingRequest, IngestResult, ProcessedTelemetry,
    ReadingValue, Severity,
};
use crate::services::store::TelemetryStore;
use crate::services::thresholds::ThresholdTable;

pub const DEFAULT_TEMPERATURE_UNIT: &str = "°C";

/// Maps device payloads to canonical readings and evaluates them against
/// the injected threshold table. Never touches session state.
pub struct DeviceTelemetryProcessor {
    thresholds: ThresholdTable,
    store: Arc<dyn TelemetryStore>,
}

impl DeviceTelemetryProcessor {
    pub fn new(thresholds: ThresholdTable, store: Arc<dyn TelemetryStore>) -> Self {
        Self { thresholds, store }
    }

    pub fn thresholds(&self) -> &ThresholdTable {
        &self.thresholds
    }

    /// Pure: the same device type and payload always give the same result.
    pub fn process(&self, device_type: &str, raw_payload: &Value) -> Result<ProcessedTelemetry, TelemetryError> {
        let readings = canonical_readings(device_type, raw_payload)?;
        let alerts = readings
            .iter()
            .filter_map(|reading| self.thresholds.evaluate(reading))
            .collect();

        Ok(ProcessedTelemetry { readings, alerts })
    }

    /// Stores the readings first, then any alerts they raise
    #[instrument(skip(self, request), fields(session_id = %request.session_id, device_id = %request.device_id))]
    pub async fn ingest(&self, request: DeviceReadingRequest) -> Result<IngestResult, TelemetryError> {
        if request.session_id.trim().is_empty() {
            return Err(TelemetryError::Validation("sessionId is required".to_string()));
        }
        if request.device_id.trim().is_empty() {
            return Err(TelemetryError::Validation("deviceId is required".to_string()));
        }

        let device_type = match request.device_type.as_deref() {
            Some(device_type) => device_type.to_string(),
            None => request
                .raw_payload
                .get("type")
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| TelemetryError::Validation("deviceType is required".to_string()))?,
        };

        let processed = self.process(&device_type, &request.raw_payload)?;
        let now = Utc::now();

        let readings: Vec<DeviceReading> = processed
            .readings
            .into_iter()
            .map(|reading| DeviceReading {
                id: Uuid::new_v4(),
                session_id: request.session_id.clone(),
                device_id: request.device_id.clone(),
                reading_type: reading.reading_type,
                value: reading.value,
                unit: reading.unit,
                recorded_at: now,
            })
            .collect();

        self.store.append_readings(&readings).await?;
        debug!("Stored {} readings from {}", readings.len(), device_type);

        let alerts: Vec<Alert> = processed
            .alerts
            .into_iter()
            .map(|breach| Alert {
                id: Uuid::new_v4(),
                session_id: request.session_id.clone(),
                reading_type: breach.reading_type,
                severity: breach.severity,
                message: breach.message,
                action_required: breach.action_required,
                raised_at: now,
            })
            .collect();

        if !alerts.is_empty() {
            self.store.append_alerts(&alerts).await?;
        }

        for alert in &alerts {
            match alert.severity {
                Severity::Critical => error!("Critical alert on {}: {}", alert.reading_type, alert.message),
                Severity::Warning => warn!("Warning on {}: {}", alert.reading_type, alert.message),
            }
        }

        info!("Ingested {} readings, {} alerts", readings.len(), alerts.len());
        Ok(IngestResult { readings, alerts })
    }

    pub async fn readings_for(&self, session_id: &str) -> Result<Vec<DeviceReading>, TelemetryError> {
        self.store.readings_for(session_id).await
    }

    pub async fn alerts_for(&self, session_id: &str) -> Result<Vec<Alert>, TelemetryError> {
        self.store.alerts_for(session_id).await
    }
}

fn canonical_readings(device_type: &str, payload: &Value) -> Result<Vec<CanonicalReading>, TelemetryError> {
    let readings = match device_type {
        "blood_pressure_monitor" => vec![
            numeric("systolic_bp", number(payload, &["systolic", "systolic_bp"])?, "mmHg"),
            numeric("diastolic_bp", number(payload, &["diastolic", "diastolic_bp"])?, "mmHg"),
        ],
        "pulse_oximeter" => vec![
            numeric(
                "oxygen_saturation",
                number(payload, &["spo2", "oxygen_saturation", "saturation"])?,
                "%",
            ),
            numeric("heart_rate", number(payload, &["pulse", "heart_rate", "bpm"])?, "bpm"),
        ],
        "digital_thermometer" => {
            let unit = payload
                .get("unit")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_TEMPERATURE_UNIT);
            vec![numeric(
                "body_temperature",
                number(payload, &["temperature", "body_temperature", "value"])?,
                unit,
            )]
        }
        "digital_stethoscope" => {
            let reference = ["recording_url", "recording_ref", "reference", "audio_url"]
                .iter()
                .find_map(|key| payload.get(*key).and_then(Value::as_str))
                .ok_or_else(|| TelemetryError::Validation("stethoscope payload has no recording reference".to_string()))?;
            vec![CanonicalReading {
                reading_type: "heart_sounds".to_string(),
                value: ReadingValue::Reference(reference.to_string()),
                unit: None,
            }]
        }
        other => vec![CanonicalReading {
            reading_type: other.to_string(),
            value: ReadingValue::Raw(payload.clone()),
            unit: None,
        }],
    };

    Ok(readings)
}

fn numeric(reading_type: &str, value: f64, unit: &str) -> CanonicalReading {
    CanonicalReading {
        reading_type: reading_type.to_string(),
        value: ReadingValue::Numeric(value),
        unit: Some(unit.to_string()),
    }
}

/// First of `keys` present in the payload, as a number. Numeric strings are accepted.
fn number(payload: &Value, keys: &[&str]) -> Result<f64, TelemetryError> {
    let found = keys.iter().find_map(|key| payload.get(*key));

    let value = match found {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    value
        .filter(|v| v.is_finite())
        .ok_or_else(|| TelemetryError::Validation(format!("payload is missing a numeric {}", keys[0])))
}
