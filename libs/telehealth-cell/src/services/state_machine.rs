use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::error::TelehealthError;
use crate::models::{
    SessionCommand, SessionEvent, SessionStatus, TelehealthSession, TransitionOutcome,
};
use crate::services::compliance::ComplianceGate;
use crate::services::store::SessionStore;

type LockMap = StdMutex<HashMap<String, Arc<Mutex<()>>>>;

/// Sole writer of session status.
///
/// Every command for a session runs under that session's mutex, so admits,
/// webhooks and sweeps observe each other's commits in order.
pub struct SessionStateMachine {
    store: Arc<dyn SessionStore>,
    locks: LockMap,
}

/// Holds a session's mutex handle and drops the map slot once nobody else
/// is waiting on it.
struct SessionLease<'a> {
    locks: &'a LockMap,
    session_id: String,
    lock: Arc<Mutex<()>>,
}

impl Drop for SessionLease<'_> {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // the map and this lease are the only owners left
        if Arc::strong_count(&self.lock) == 2 {
            locks.remove(&self.session_id);
        }
    }
}

impl SessionStateMachine {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self {
            store,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Number of sessions with an in-flight or queued command
    pub fn tracked_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn lease(&self, session_id: &str) -> SessionLease<'_> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        let lock = locks.entry(session_id.to_string()).or_default().clone();

        SessionLease {
            locks: &self.locks,
            session_id: session_id.to_string(),
            lock,
        }
    }

    #[instrument(skip(self, event), fields(session_id = %event.session_id, command = event.command.name(), source = %event.source))]
    pub async fn apply_event(&self, event: SessionEvent) -> Result<TransitionOutcome, TelehealthError> {
        let lease = self.lease(&event.session_id);
        let _guard = lease.lock.lock().await;

        self.apply_locked(event).await
    }

    async fn apply_locked(&self, event: SessionEvent) -> Result<TransitionOutcome, TelehealthError> {
        let mut session = self
            .store
            .get(&event.session_id)
            .await?
            .ok_or_else(|| TelehealthError::NotFound(format!("Session {} not found", event.session_id)))?;

        if let Some(sequence) = event.sequence {
            if sequence <= session.last_event_seq {
                debug!(
                    "Sequence {} already covered by {}, acknowledging as no-op",
                    sequence, session.last_event_seq
                );
                return Ok(TransitionOutcome::AlreadyApplied(session));
            }
        }

        let now = event.occurred_at;
        let mut audit = None;

        match event.command.target() {
            Some(target) => {
                if session.status == target {
                    debug!("Session already {}", target);
                    return Ok(TransitionOutcome::AlreadyTransitioned(session));
                }

                if !session.status.can_transition_to(target) {
                    return Err(TelehealthError::StateConflict {
                        session_id: session.id.clone(),
                        message: format!("cannot move session from {} to {}", session.status, target),
                    });
                }

                match (&event.command, target) {
                    (_, SessionStatus::InProgress) => {
                        let entry = ComplianceGate::evaluate(&session, now);
                        if !entry.passed() {
                            let reason = entry.reason.clone().unwrap_or_default();
                            session.compliance_block_reason = Some(reason.clone());
                            session.updated_at = now;
                            self.store.commit_transition(&session, Some(&entry)).await?;

                            warn!("Admission blocked by compliance gate: {}", reason);
                            return Err(TelehealthError::ComplianceBlocked {
                                session_id: session.id,
                                reason,
                            });
                        }

                        session.compliance_block_reason = None;
                        session.actual_start = Some(now);
                        audit = Some(entry);
                    }
                    (command, SessionStatus::Completed) => {
                        session.ended_at = Some(now);
                        session.duration_minutes = session
                            .actual_start
                            .map(|start| (now - start).num_minutes().max(0));
                        if let SessionCommand::End { abnormal: true } = command {
                            session.abnormal_termination = true;
                        }
                    }
                    (SessionCommand::Cancel { reason }, _) => {
                        session.cancellation_reason = reason.clone();
                    }
                    _ => {}
                }

                session.status = target;
            }
            None => match &event.command {
                SessionCommand::AttachRecording(recording) => {
                    if !matches!(session.status, SessionStatus::InProgress | SessionStatus::Completed) {
                        return Err(TelehealthError::StateConflict {
                            session_id: session.id.clone(),
                            message: format!("cannot attach a recording while {}", session.status),
                        });
                    }
                    session.recordings.push(recording.clone());
                }
                SessionCommand::RecordConsent { consent_obtained, recording_consent } => {
                    if session.status.is_terminal() {
                        return Err(TelehealthError::StateConflict {
                            session_id: session.id.clone(),
                            message: format!("cannot change consent while {}", session.status),
                        });
                    }
                    session.consent_obtained = *consent_obtained;
                    session.recording_consent = *recording_consent;
                }
                SessionCommand::AttachAdvisory(notes) => {
                    session.advisory_notes = Some(notes.clone());
                }
                other => {
                    return Err(TelehealthError::Validation(format!(
                        "command {} has no effect",
                        other.name()
                    )));
                }
            },
        }

        if let Some(sequence) = event.sequence {
            session.last_event_seq = sequence;
        }
        session.updated_at = now;

        self.store.commit_transition(&session, audit.as_ref()).await?;
        info!("Applied {} -> {}", event.command.name(), session.status);

        Ok(TransitionOutcome::Applied(session))
    }

    /// Marks sessions that never checked in within `threshold` of their
    /// scheduled start as no_show. Status is re-checked under each session's
    /// lock so a concurrent check-in is never overridden.
    #[instrument(skip(self))]
    pub async fn sweep_missed_check_ins(
        &self,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let overdue = self.store.list_scheduled_before(now - threshold).await?;
        let mut marked = Vec::new();

        for candidate in overdue {
            let lease = self.lease(&candidate.id);
            let _guard = lease.lock.lock().await;

            match self.store.get(&candidate.id).await {
                Ok(Some(current)) if current.status == SessionStatus::Scheduled => {}
                Ok(_) => continue,
                Err(e) => {
                    warn!("Could not re-read {} before no-show: {}", candidate.id, e);
                    continue;
                }
            }

            let event = SessionEvent::new(candidate.id.clone(), SessionCommand::MarkNoShow, "check-in-timeout").at(now);
            match self.apply_locked(event).await {
                Ok(TransitionOutcome::Applied(session)) => marked.push(session),
                Ok(_) => {}
                Err(e) => warn!("Could not mark {} as no-show: {}", candidate.id, e),
            }
        }

        if !marked.is_empty() {
            info!("Marked {} sessions no-show after missed check-in", marked.len());
        }
        Ok(marked)
    }

    /// Current snapshot, read without taking the session lock
    pub async fn current(&self, session_id: &str) -> Result<TelehealthSession, TelehealthError> {
        self.store
            .get(session_id)
            .await?
            .ok_or_else(|| TelehealthError::NotFound(format!("Session {} not found", session_id)))
    }
}
