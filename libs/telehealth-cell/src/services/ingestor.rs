use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use shared_utils::signature::verify_signature;

use crate::error::TelehealthError;
use crate::models::{
    ConferencingEvent, ConferencingEventKind, IngestOutcome, RecordingRecord, SessionCommand,
    SessionEvent, SessionStatus, TelehealthSession, TransitionOutcome,
};
use crate::services::dead_letter::DeadLetterQueue;
use crate::services::retry::RetryPolicy;
use crate::services::state_machine::SessionStateMachine;
use crate::services::store::SessionStore;
use crate::services::waiting_room::WaitingRoomQueue;

const SOURCE: &str = "conferencing-webhook";

/// Turns signed conferencing-provider notifications into session commands
pub struct EventIngestor {
    secret: String,
    store: Arc<dyn SessionStore>,
    state_machine: Arc<SessionStateMachine>,
    waiting_room: Arc<WaitingRoomQueue>,
    dead_letters: Arc<DeadLetterQueue>,
    retry: RetryPolicy,
}

impl EventIngestor {
    pub fn new(
        secret: impl Into<String>,
        state_machine: Arc<SessionStateMachine>,
        waiting_room: Arc<WaitingRoomQueue>,
        dead_letters: Arc<DeadLetterQueue>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            secret: secret.into(),
            store: state_machine.store().clone(),
            state_machine,
            waiting_room,
            dead_letters,
            retry,
        }
    }

    #[instrument(skip(self, body, signature), fields(body_len = body.len()))]
    pub async fn ingest(&self, body: &[u8], signature: Option<&str>) -> Result<IngestOutcome, TelehealthError> {
        if let Err(e) = verify_signature(&self.secret, body, signature) {
            warn!(target: "security", reason = %e, "Rejected conferencing webhook");
            return Err(TelehealthError::Authenticity);
        }

        let event: ConferencingEvent = serde_json::from_slice(body)
            .map_err(|e| TelehealthError::Validation(format!("Malformed webhook body: {}", e)))?;

        let Some(kind) = ConferencingEventKind::parse(&event.event_type) else {
            info!("Acknowledging unhandled event type {}", event.event_type);
            return Ok(IngestOutcome::Ignored { event_type: event.event_type });
        };

        let session = match self
            .retry
            .run("session lookup", |_| {
                self.resolve_session(&event.external_meeting_id, kind, event.sequence)
            })
            .await
        {
            Ok(session) => session,
            Err((e, attempts)) if e.is_retryable() => return Ok(self.dead_letter(&event, e, attempts).await),
            Err((e, _)) => return Err(e),
        };

        let command = command_for(kind, &event);
        let applied = self
            .retry
            .run("apply webhook", |_| {
                let session_event = SessionEvent::new(session.id.clone(), command.clone(), SOURCE)
                    .with_sequence(Some(event.sequence));
                self.state_machine.apply_event(session_event)
            })
            .await;

        match applied {
            Ok(TransitionOutcome::Applied(updated)) => {
                if kind == ConferencingEventKind::MeetingStarted {
                    self.waiting_room
                        .remove_for_session(updated.provider_id, &updated.id)
                        .await;
                }
                Ok(IngestOutcome::Applied { session_id: updated.id })
            }
            Ok(TransitionOutcome::AlreadyApplied(s)) | Ok(TransitionOutcome::AlreadyTransitioned(s)) => {
                debug!("Event {} seq {} had no further effect", event.event_type, event.sequence);
                Ok(IngestOutcome::Duplicate { session_id: s.id })
            }
            Err((TelehealthError::ComplianceBlocked { session_id, reason }, _)) => {
                Ok(IngestOutcome::Blocked { session_id, reason })
            }
            Err((e, attempts)) if e.is_retryable() => Ok(self.dead_letter(&event, e, attempts).await),
            Err((e, _)) => Err(e),
        }
    }

    /// Picks the session a meeting event is about. Sequences are per meeting,
    /// so a session that already recorded `sequence` claims the event and the
    /// state machine acknowledges it as a replay. A missing session is treated
    /// as replication lag and reported as transient.
    async fn resolve_session(
        &self,
        external_meeting_id: &str,
        kind: ConferencingEventKind,
        sequence: u64,
    ) -> Result<TelehealthSession, TelehealthError> {
        let sessions = self.store.find_by_meeting(external_meeting_id).await?;

        if let Some(seen) = sessions.iter().find(|s| s.last_event_seq >= sequence) {
            debug!("Meeting sequence {} already recorded on {}", sequence, seen.id);
            return Ok(seen.clone());
        }

        let preferred: &[SessionStatus] = match kind {
            ConferencingEventKind::MeetingStarted => {
                &[SessionStatus::Waiting, SessionStatus::InProgress, SessionStatus::Scheduled]
            }
            ConferencingEventKind::MeetingEnded | ConferencingEventKind::RecordingReady => {
                &[SessionStatus::InProgress, SessionStatus::Completed]
            }
        };

        let chosen = preferred
            .iter()
            .find_map(|status| sessions.iter().find(|s| s.status == *status))
            .or_else(|| sessions.first())
            .cloned();

        chosen.ok_or_else(|| {
            TelehealthError::Transient(format!("No session found for meeting {}", external_meeting_id))
        })
    }

    async fn dead_letter(&self, event: &ConferencingEvent, err: TelehealthError, attempts: u32) -> IngestOutcome {
        let payload = serde_json::to_value(event).unwrap_or(Value::Null);
        let dead_letter_id = self
            .dead_letters
            .push(SOURCE, err.to_string(), attempts, payload)
            .await;

        IngestOutcome::DeadLettered { dead_letter_id }
    }
}

fn command_for(kind: ConferencingEventKind, event: &ConferencingEvent) -> SessionCommand {
    match kind {
        ConferencingEventKind::MeetingStarted => SessionCommand::MeetingStarted,
        ConferencingEventKind::MeetingEnded => SessionCommand::MeetingEnded,
        ConferencingEventKind::RecordingReady => {
            let recording_id = event
                .payload
                .get("recordingId")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}-{}", event.external_meeting_id, event.sequence));

            SessionCommand::AttachRecording(RecordingRecord {
                recording_id,
                url: event.payload.get("url").and_then(Value::as_str).map(str::to_string),
                ready_at: Utc::now(),
                sequence: Some(event.sequence),
            })
        }
    }
}
