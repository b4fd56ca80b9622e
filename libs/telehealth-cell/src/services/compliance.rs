use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::error::TelehealthError;
use crate::models::{ComplianceAuditEntry, ComplianceOutcome, TelehealthSession};
use crate::services::store::SessionStore;

pub const CONSENT_MISSING: &str = "patient consent has not been obtained";
pub const RECORDING_CONSENT_MISSING: &str = "recording requested without recording consent";

/// Consent precondition for clinical interaction
pub struct ComplianceGate {
    store: Arc<dyn SessionStore>,
}

impl ComplianceGate {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    /// Pure evaluation; the caller decides where the entry is written.
    pub fn evaluate(session: &TelehealthSession, checked_at: DateTime<Utc>) -> ComplianceAuditEntry {
        let reason = if !session.consent_obtained {
            Some(CONSENT_MISSING)
        } else if session.recording_requested && !session.recording_consent {
            Some(RECORDING_CONSENT_MISSING)
        } else {
            None
        };

        ComplianceAuditEntry {
            id: Uuid::new_v4(),
            session_id: session.id.clone(),
            checked_at,
            outcome: if reason.is_some() { ComplianceOutcome::Fail } else { ComplianceOutcome::Pass },
            reason: reason.map(str::to_string),
        }
    }

    /// Evaluates the gate and appends the result to the audit log
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn check(&self, session: &TelehealthSession) -> Result<bool, TelehealthError> {
        let entry = Self::evaluate(session, Utc::now());
        self.store.append_audit(&entry).await?;

        if entry.passed() {
            info!("Compliance check passed");
        } else {
            warn!("Compliance check failed: {}", entry.reason.as_deref().unwrap_or_default());
        }

        Ok(entry.passed())
    }
}
