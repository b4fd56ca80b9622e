use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::error;
use uuid::Uuid;

use crate::models::DeadLetterRecord;

/// Holding pen for deliveries that exhausted their retries
#[derive(Default)]
pub struct DeadLetterQueue {
    records: RwLock<Vec<DeadLetterRecord>>,
}

impl DeadLetterQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, source: &str, reason: String, attempts: u32, payload: Value) -> Uuid {
        let record = DeadLetterRecord {
            id: Uuid::new_v4(),
            source: source.to_string(),
            reason,
            attempts,
            payload,
            dead_lettered_at: Utc::now(),
        };

        error!(
            dead_letter_id = %record.id,
            source = %record.source,
            attempts = record.attempts,
            "Dead-lettered delivery: {}",
            record.reason
        );

        let id = record.id;
        self.records.write().await.push(record);
        id
    }

    pub async fn list(&self) -> Vec<DeadLetterRecord> {
        self.records.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }
}
