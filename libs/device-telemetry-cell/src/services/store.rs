use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::TelemetryError;
use crate::models::{Alert, DeviceReading};

/// Append-only logs of readings and alerts, keyed by session
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn append_readings(&self, readings: &[DeviceReading]) -> Result<(), TelemetryError>;

    async fn append_alerts(&self, alerts: &[Alert]) -> Result<(), TelemetryError>;

    async fn readings_for(&self, session_id: &str) -> Result<Vec<DeviceReading>, TelemetryError>;

    async fn alerts_for(&self, session_id: &str) -> Result<Vec<Alert>, TelemetryError>;
}

#[derive(Default)]
pub struct InMemoryTelemetryStore {
    readings: RwLock<HashMap<String, Vec<DeviceReading>>>,
    alerts: RwLock<HashMap<String, Vec<Alert>>>,
}

impl InMemoryTelemetryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TelemetryStore for InMemoryTelemetryStore {
    async fn append_readings(&self, readings: &[DeviceReading]) -> Result<(), TelemetryError> {
        let mut log = self.readings.write().await;
        for reading in readings {
            log.entry(reading.session_id.clone()).or_default().push(reading.clone());
        }
        Ok(())
    }

    async fn append_alerts(&self, alerts: &[Alert]) -> Result<(), TelemetryError> {
        let mut log = self.alerts.write().await;
        for alert in alerts {
            log.entry(alert.session_id.clone()).or_default().push(alert.clone());
        }
        Ok(())
    }

    async fn readings_for(&self, session_id: &str) -> Result<Vec<DeviceReading>, TelemetryError> {
        Ok(self.readings.read().await.get(session_id).cloned().unwrap_or_default())
    }

    async fn alerts_for(&self, session_id: &str) -> Result<Vec<Alert>, TelemetryError> {
        Ok(self.alerts.read().await.get(session_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::models::ReadingValue;

    fn reading(session_id: &str, value: f64) -> DeviceReading {
        DeviceReading {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            device_id: "cuff-01".to_string(),
            reading_type: "systolic_bp".to_string(),
            value: ReadingValue::Numeric(value),
            unit: Some("mmHg".to_string()),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_readings_are_appended_per_session() {
        let store = InMemoryTelemetryStore::new();

        tokio_test::block_on(async {
            store.append_readings(&[reading("TH-A", 120.0)]).await.unwrap();
            store.append_readings(&[reading("TH-A", 135.0), reading("TH-B", 110.0)]).await.unwrap();

            let a = store.readings_for("TH-A").await.unwrap();
            assert_eq!(a.len(), 2);
            assert_eq!(a[1].value, ReadingValue::Numeric(135.0));
            assert_eq!(store.readings_for("TH-B").await.unwrap().len(), 1);
            assert!(store.readings_for("TH-C").await.unwrap().is_empty());
            assert!(store.alerts_for("TH-A").await.unwrap().is_empty());
        });
    }
}
