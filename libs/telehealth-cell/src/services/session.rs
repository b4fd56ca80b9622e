use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::TelehealthError;
use crate::models::{
    Admission, ComplianceAuditEntry, CreateSessionRequest, Priority, SessionCommand, SessionEvent,
    SessionStatus, TelehealthSession, TransitionOutcome, UpdateStatusRequest, WaitingRoomEntry,
};
use crate::services::compliance::ComplianceGate;
use crate::services::state_machine::SessionStateMachine;
use crate::services::store::SessionStore;
use crate::services::waiting_room::WaitingRoomQueue;

const MAX_MEETING_ID_LEN: usize = 128;

/// Command/query surface used by scheduling, the waiting-room dashboard and
/// the provider console
pub struct TelehealthService {
    store: Arc<dyn SessionStore>,
    state_machine: Arc<SessionStateMachine>,
    gate: ComplianceGate,
    waiting_room: Arc<WaitingRoomQueue>,
}

impl TelehealthService {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let state_machine = Arc::new(SessionStateMachine::new(store.clone()));
        let waiting_room = Arc::new(WaitingRoomQueue::new(state_machine.clone()));

        Self {
            gate: ComplianceGate::new(store.clone()),
            store,
            state_machine,
            waiting_room,
        }
    }

    pub fn state_machine(&self) -> &Arc<SessionStateMachine> {
        &self.state_machine
    }

    pub fn waiting_room(&self) -> &Arc<WaitingRoomQueue> {
        &self.waiting_room
    }

    #[instrument(skip(self, request), fields(meeting = %request.external_meeting_id))]
    pub async fn create_session(&self, request: CreateSessionRequest) -> Result<TelehealthSession, TelehealthError> {
        validate_meeting_id(&request.external_meeting_id)?;

        let session = TelehealthSession::schedule(request, Utc::now());
        self.store.insert(&session).await?;

        info!("Scheduled session {}", session.id);
        Ok(session)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<TelehealthSession, TelehealthError> {
        self.state_machine.current(session_id).await
    }

    pub async fn list_sessions(&self, provider_id: Uuid) -> Result<Vec<TelehealthSession>, TelehealthError> {
        self.store.list_by_provider(provider_id).await
    }

    /// Generic status change requested by an upstream collaborator
    #[instrument(skip(self, request), fields(target = %request.status))]
    pub async fn update_status(
        &self,
        session_id: &str,
        request: UpdateStatusRequest,
        actor_id: &str,
    ) -> Result<TransitionOutcome, TelehealthError> {
        let command = match request.status {
            SessionStatus::Scheduled => {
                let current = self.get_session(session_id).await?;
                return Err(TelehealthError::StateConflict {
                    session_id: current.id,
                    message: format!("cannot move session from {} to scheduled", current.status),
                });
            }
            SessionStatus::Waiting => SessionCommand::CheckIn,
            SessionStatus::InProgress => SessionCommand::Admit { admitted_by: actor_id.to_string() },
            SessionStatus::Completed => SessionCommand::End { abnormal: false },
            SessionStatus::Cancelled => SessionCommand::Cancel { reason: request.reason },
            SessionStatus::NoShow => SessionCommand::MarkNoShow,
        };

        let event = SessionEvent::new(session_id, command, "status-update").with_sequence(request.sequence);
        let outcome = self.state_machine.apply_event(event).await?;
        let session = outcome.session();

        match session.status {
            SessionStatus::Waiting => {
                self.waiting_room.add(session, Priority::default(), Utc::now()).await?;
            }
            SessionStatus::InProgress | SessionStatus::Cancelled | SessionStatus::NoShow => {
                self.waiting_room.remove_for_session(session.provider_id, &session.id).await;
            }
            _ => {}
        }

        Ok(outcome)
    }

    /// Patient check-in: scheduled -> waiting, then queue with `priority`
    #[instrument(skip(self))]
    pub async fn add_to_waiting_room(
        &self,
        session_id: &str,
        priority: Priority,
    ) -> Result<WaitingRoomEntry, TelehealthError> {
        self.waiting_room.check_in(session_id, priority, Utc::now()).await
    }

    pub async fn get_waiting_room(&self, provider_id: Uuid) -> Vec<WaitingRoomEntry> {
        self.waiting_room.list(provider_id).await
    }

    pub async fn peek_next(&self, provider_id: Uuid) -> Option<WaitingRoomEntry> {
        self.waiting_room.peek_next(provider_id).await
    }

    pub async fn admit(&self, entry_id: u64, admitted_by: &str) -> Result<Admission, TelehealthError> {
        self.waiting_room.admit(entry_id, admitted_by).await
    }

    pub async fn admit_next(&self, provider_id: Uuid, admitted_by: &str) -> Result<Admission, TelehealthError> {
        self.waiting_room.admit_next(provider_id, admitted_by).await
    }

    /// Only scheduled or waiting sessions can be cancelled; in-progress ones
    /// must be ended instead.
    #[instrument(skip(self))]
    pub async fn cancel(&self, session_id: &str, reason: Option<String>) -> Result<TransitionOutcome, TelehealthError> {
        let outcome = self
            .state_machine
            .apply_event(SessionEvent::new(session_id, SessionCommand::Cancel { reason }, "cancel"))
            .await?;

        let session = outcome.session();
        self.waiting_room.remove_for_session(session.provider_id, &session.id).await;
        Ok(outcome)
    }

    pub async fn end_session(&self, session_id: &str, abnormal: bool) -> Result<TransitionOutcome, TelehealthError> {
        self.state_machine
            .apply_event(SessionEvent::new(session_id, SessionCommand::End { abnormal }, "provider-end"))
            .await
    }

    /// Runs the gate on demand; the result lands in the audit trail
    pub async fn compliance_check(&self, session_id: &str) -> Result<bool, TelehealthError> {
        let session = self.get_session(session_id).await?;
        self.gate.check(&session).await
    }

    pub async fn audit_trail(&self, session_id: &str) -> Result<Vec<ComplianceAuditEntry>, TelehealthError> {
        self.get_session(session_id).await?;
        self.store.audit_trail(session_id).await
    }

    /// Records consent given after scheduling; the gate reads it on the next admit
    #[instrument(skip(self))]
    pub async fn record_consent(
        &self,
        session_id: &str,
        consent_obtained: bool,
        recording_consent: bool,
    ) -> Result<TransitionOutcome, TelehealthError> {
        let command = SessionCommand::RecordConsent { consent_obtained, recording_consent };
        self.state_machine
            .apply_event(SessionEvent::new(session_id, command, "consent"))
            .await
    }

    /// Stores notes produced by the clinical assistant as-is
    pub async fn attach_advisory(&self, session_id: &str, notes: Value) -> Result<TransitionOutcome, TelehealthError> {
        self.state_machine
            .apply_event(SessionEvent::new(session_id, SessionCommand::AttachAdvisory(notes), "advisory"))
            .await
    }
}

fn validate_meeting_id(meeting_id: &str) -> Result<(), TelehealthError> {
    if meeting_id.is_empty() || meeting_id.len() > MAX_MEETING_ID_LEN {
        return Err(TelehealthError::Validation(format!(
            "external_meeting_id must be 1-{} characters",
            MAX_MEETING_ID_LEN
        )));
    }

    if !meeting_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    {
        return Err(TelehealthError::Validation(
            "external_meeting_id may only contain letters, digits, '-', '_' and '.'".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meeting_id_validation() {
        assert!(validate_meeting_id("MX1").is_ok());
        assert!(validate_meeting_id("zoom.8812-44_a").is_ok());
        assert!(validate_meeting_id("").is_err());
        assert!(validate_meeting_id("MX1&status=eq.completed").is_err());
        assert!(validate_meeting_id(&"x".repeat(129)).is_err());
    }
}
