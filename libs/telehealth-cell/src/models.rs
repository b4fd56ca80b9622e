// libs/telehealth-cell/src/models.rs
use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use rand::{distributions::Alphanumeric, Rng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ==============================================================================
// SESSION MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelehealthSession {
    pub id: String,
    pub external_meeting_id: String,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub status: SessionStatus,
    pub scheduled_start: DateTime<Utc>,
    pub actual_start: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub consent_obtained: bool,
    pub recording_requested: bool,
    pub recording_consent: bool,
    pub chief_complaint: Option<String>,
    #[serde(default)]
    pub last_event_seq: u64,
    pub duration_minutes: Option<i64>,
    pub compliance_block_reason: Option<String>,
    #[serde(default)]
    pub abnormal_termination: bool,
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub recordings: Vec<RecordingRecord>,
    pub advisory_notes: Option<Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TelehealthSession {
    /// Builds a freshly scheduled session with a generated `TH-<year>-<suffix>` id
    pub fn schedule(request: CreateSessionRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: generate_session_id(now),
            external_meeting_id: request.external_meeting_id,
            patient_id: request.patient_id,
            provider_id: request.provider_id,
            status: SessionStatus::Scheduled,
            scheduled_start: request.scheduled_start,
            actual_start: None,
            ended_at: None,
            consent_obtained: request.consent_obtained,
            recording_requested: request.recording_requested,
            recording_consent: request.recording_consent,
            chief_complaint: request.chief_complaint,
            last_event_seq: 0,
            duration_minutes: None,
            compliance_block_reason: None,
            abnormal_termination: false,
            cancellation_reason: None,
            recordings: Vec::new(),
            advisory_notes: None,
            created_at: now,
            updated_at: now,
        }
    }
}

pub fn generate_session_id(now: DateTime<Utc>) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(|b| char::from(b).to_ascii_uppercase())
        .collect();

    format!("TH-{}-{}", now.year(), suffix)
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Scheduled,
    Waiting,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Cancelled | SessionStatus::NoShow)
    }

    pub fn can_transition_to(&self, target: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, target) {
            (Scheduled, Waiting) => true,
            (Waiting, InProgress) => true,
            (InProgress, Completed) => true,
            (Scheduled | Waiting, Cancelled) => true,
            (Scheduled | Waiting, NoShow) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Scheduled => write!(f, "scheduled"),
            SessionStatus::Waiting => write!(f, "waiting"),
            SessionStatus::InProgress => write!(f, "in_progress"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::Cancelled => write!(f, "cancelled"),
            SessionStatus::NoShow => write!(f, "no_show"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RecordingRecord {
    pub recording_id: String,
    pub url: Option<String>,
    pub ready_at: DateTime<Utc>,
    pub sequence: Option<u64>,
}

// ==============================================================================
// COMMANDS & OUTCOMES
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    CheckIn,
    Admit { admitted_by: String },
    MeetingStarted,
    End { abnormal: bool },
    MeetingEnded,
    Cancel { reason: Option<String> },
    MarkNoShow,
    /// Consent captured after scheduling, e.g. at check-in
    RecordConsent { consent_obtained: bool, recording_consent: bool },
    AttachRecording(RecordingRecord),
    AttachAdvisory(Value),
}

impl SessionCommand {
    /// Status the command moves the session to, `None` for annotations
    pub fn target(&self) -> Option<SessionStatus> {
        match self {
            SessionCommand::CheckIn => Some(SessionStatus::Waiting),
            SessionCommand::Admit { .. } | SessionCommand::MeetingStarted => Some(SessionStatus::InProgress),
            SessionCommand::End { .. } | SessionCommand::MeetingEnded => Some(SessionStatus::Completed),
            SessionCommand::Cancel { .. } => Some(SessionStatus::Cancelled),
            SessionCommand::MarkNoShow => Some(SessionStatus::NoShow),
            SessionCommand::RecordConsent { .. }
            | SessionCommand::AttachRecording(_)
            | SessionCommand::AttachAdvisory(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionCommand::CheckIn => "check_in",
            SessionCommand::Admit { .. } => "admit",
            SessionCommand::MeetingStarted => "meeting_started",
            SessionCommand::End { .. } => "end",
            SessionCommand::MeetingEnded => "meeting_ended",
            SessionCommand::Cancel { .. } => "cancel",
            SessionCommand::MarkNoShow => "mark_no_show",
            SessionCommand::RecordConsent { .. } => "record_consent",
            SessionCommand::AttachRecording(_) => "attach_recording",
            SessionCommand::AttachAdvisory(_) => "attach_advisory",
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionEvent {
    pub session_id: String,
    pub command: SessionCommand,
    /// Externally sourced commands carry the sender's sequence number
    pub sequence: Option<u64>,
    pub source: String,
    pub occurred_at: DateTime<Utc>,
}

impl SessionEvent {
    pub fn new(session_id: impl Into<String>, command: SessionCommand, source: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            command,
            sequence: None,
            source: source.into(),
            occurred_at: Utc::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: Option<u64>) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn at(mut self, occurred_at: DateTime<Utc>) -> Self {
        self.occurred_at = occurred_at;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    Applied(TelehealthSession),
    /// Sequence at or below the last one recorded, nothing changed
    AlreadyApplied(TelehealthSession),
    /// Session already sits in the requested status
    AlreadyTransitioned(TelehealthSession),
}

impl TransitionOutcome {
    pub fn session(&self) -> &TelehealthSession {
        match self {
            TransitionOutcome::Applied(s)
            | TransitionOutcome::AlreadyApplied(s)
            | TransitionOutcome::AlreadyTransitioned(s) => s,
        }
    }

    pub fn into_session(self) -> TelehealthSession {
        match self {
            TransitionOutcome::Applied(s)
            | TransitionOutcome::AlreadyApplied(s)
            | TransitionOutcome::AlreadyTransitioned(s) => s,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionOutcome::Applied(_) => "applied",
            TransitionOutcome::AlreadyApplied(_) => "already_applied",
            TransitionOutcome::AlreadyTransitioned(_) => "already_transitioned",
        }
    }
}

// ==============================================================================
// WAITING ROOM MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    /// Lower rank is served first
    pub fn rank(&self) -> u8 {
        match self {
            Priority::Urgent => 0,
            Priority::High => 1,
            Priority::Medium => 2,
            Priority::Low => 3,
        }
    }

    pub fn base_wait_minutes(&self) -> i64 {
        match self {
            Priority::Urgent => 5,
            Priority::High => 10,
            Priority::Medium => 15,
            Priority::Low => 20,
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Waiting,
    Admitted,
    Left,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WaitingRoomEntry {
    pub id: u64,
    pub session_id: String,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub priority: Priority,
    pub joined_at: DateTime<Utc>,
    pub estimated_wait_minutes: i64,
    pub entry_status: EntryStatus,
}

/// Result of admitting a queued patient
#[derive(Debug, Clone)]
pub struct Admission {
    pub entry: WaitingRoomEntry,
    pub outcome: TransitionOutcome,
}

// ==============================================================================
// COMPLIANCE MODELS
// ==============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceOutcome {
    Pass,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComplianceAuditEntry {
    pub id: Uuid,
    pub session_id: String,
    pub checked_at: DateTime<Utc>,
    pub outcome: ComplianceOutcome,
    pub reason: Option<String>,
}

impl ComplianceAuditEntry {
    pub fn passed(&self) -> bool {
        self.outcome == ComplianceOutcome::Pass
    }
}

// ==============================================================================
// WEBHOOK MODELS
// ==============================================================================

/// Notification body posted by the conferencing provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConferencingEvent {
    pub event_type: String,
    pub external_meeting_id: String,
    pub sequence: u64,
    #[serde(default)]
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConferencingEventKind {
    MeetingStarted,
    MeetingEnded,
    RecordingReady,
}

impl ConferencingEventKind {
    pub fn parse(event_type: &str) -> Option<Self> {
        match event_type {
            "meeting-started" => Some(ConferencingEventKind::MeetingStarted),
            "meeting-ended" => Some(ConferencingEventKind::MeetingEnded),
            "recording-ready" => Some(ConferencingEventKind::RecordingReady),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Applied { session_id: String },
    Duplicate { session_id: String },
    Ignored { event_type: String },
    Blocked { session_id: String, reason: String },
    DeadLettered { dead_letter_id: Uuid },
}

impl IngestOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestOutcome::Applied { .. } => "applied",
            IngestOutcome::Duplicate { .. } => "duplicate",
            IngestOutcome::Ignored { .. } => "ignored",
            IngestOutcome::Blocked { .. } => "blocked",
            IngestOutcome::DeadLettered { .. } => "dead_lettered",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub id: Uuid,
    pub source: String,
    pub reason: String,
    pub attempts: u32,
    pub payload: Value,
    pub dead_lettered_at: DateTime<Utc>,
}

// ==============================================================================
// REQUEST DTOS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub external_meeting_id: String,
    pub patient_id: Uuid,
    pub provider_id: Uuid,
    pub scheduled_start: DateTime<Utc>,
    #[serde(default)]
    pub consent_obtained: bool,
    #[serde(default)]
    pub recording_requested: bool,
    #[serde(default)]
    pub recording_consent: bool,
    pub chief_complaint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: SessionStatus,
    pub sequence: Option<u64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddToWaitingRoomRequest {
    #[serde(default)]
    pub priority: Priority,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CancelSessionRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndSessionRequest {
    #[serde(default)]
    pub abnormal: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordConsentRequest {
    pub consent_obtained: bool,
    #[serde(default)]
    pub recording_consent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvisoryNotesRequest {
    pub notes: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListSessionsQuery {
    pub provider_id: Uuid,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [SessionStatus; 6] = [
        SessionStatus::Scheduled,
        SessionStatus::Waiting,
        SessionStatus::InProgress,
        SessionStatus::Completed,
        SessionStatus::Cancelled,
        SessionStatus::NoShow,
    ];

    #[test]
    fn test_transition_table_adjacency() {
        let allowed: Vec<(SessionStatus, SessionStatus)> = ALL
            .iter()
            .flat_map(|from| ALL.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| from.can_transition_to(*to))
            .collect();

        use SessionStatus::*;
        assert_eq!(
            allowed,
            vec![
                (Scheduled, Waiting),
                (Scheduled, Cancelled),
                (Scheduled, NoShow),
                (Waiting, InProgress),
                (Waiting, Cancelled),
                (Waiting, NoShow),
                (InProgress, Completed),
            ]
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for status in ALL.iter().filter(|s| s.is_terminal()) {
            assert!(ALL.iter().all(|to| !status.can_transition_to(*to)));
        }
    }

    #[test]
    fn test_session_id_format() {
        let now = Utc::now();
        let id = generate_session_id(now);
        let prefix = format!("TH-{}-", now.year());

        assert!(id.starts_with(&prefix));
        let suffix = &id[prefix.len()..];
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_digit() || c.is_ascii_uppercase()));
    }

    #[test]
    fn test_priority_rank_order() {
        assert!(Priority::Urgent.rank() < Priority::High.rank());
        assert!(Priority::High.rank() < Priority::Medium.rank());
        assert!(Priority::Medium.rank() < Priority::Low.rank());
        assert_eq!(Priority::Low.base_wait_minutes(), 20);
    }

    #[test]
    fn test_conferencing_event_uses_camel_case() {
        let event: ConferencingEvent = serde_json::from_str(
            r#"{"eventType":"meeting-started","externalMeetingId":"MX1","sequence":42}"#,
        )
        .unwrap();

        assert_eq!(event.external_meeting_id, "MX1");
        assert_eq!(event.sequence, 42);
        assert!(event.payload.is_null());
        assert_eq!(
            ConferencingEventKind::parse(&event.event_type),
            Some(ConferencingEventKind::MeetingStarted)
        );
        assert_eq!(ConferencingEventKind::parse("participant-joined"), None);
    }
}
