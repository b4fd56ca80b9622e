use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use shared_utils::test_utils::{TestConfig, WebhookTestUtils};
use telehealth_cell::models::{
    CreateSessionRequest, IngestOutcome, Priority, SessionCommand, SessionEvent, SessionStatus,
};
use telehealth_cell::services::{InMemorySessionStore, SessionStore};
use telehealth_cell::{TelehealthError, TelehealthState};

struct Harness {
    state: TelehealthState,
    store: Arc<InMemorySessionStore>,
    secret: String,
}

fn harness() -> Harness {
    let config = TestConfig::default();
    let store = Arc::new(InMemorySessionStore::new());
    let state = TelehealthState::new(config.to_arc(), store.clone());

    Harness {
        state,
        store,
        secret: config.webhook_secret,
    }
}

async fn waiting_session(h: &Harness, meeting: &str, consent: bool) -> String {
    let session = h
        .state
        .service
        .create_session(CreateSessionRequest {
            external_meeting_id: meeting.to_string(),
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            scheduled_start: Utc::now(),
            consent_obtained: consent,
            recording_requested: false,
            recording_consent: false,
            chief_complaint: None,
        })
        .await
        .unwrap();

    h.state
        .service
        .add_to_waiting_room(&session.id, Priority::Medium)
        .await
        .unwrap();
    session.id
}

async fn deliver(h: &Harness, event_type: &str, meeting: &str, sequence: u64) -> Result<IngestOutcome, TelehealthError> {
    let (body, signature) = WebhookTestUtils::signed_event(&h.secret, event_type, meeting, sequence, json!({}));
    h.state.ingestor.ingest(&body, Some(&signature)).await
}

#[tokio::test]
async fn test_duplicate_meeting_started_transitions_once() {
    let h = harness();
    let s1 = waiting_session(&h, "MX1", true).await;

    let first = deliver(&h, "meeting-started", "MX1", 42).await.unwrap();
    let second = deliver(&h, "meeting-started", "MX1", 42).await.unwrap();

    assert_eq!(first, IngestOutcome::Applied { session_id: s1.clone() });
    assert_eq!(second, IngestOutcome::Duplicate { session_id: s1.clone() });

    let session = h.store.get(&s1).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::InProgress);
    assert_eq!(session.last_event_seq, 42);
    assert_eq!(h.store.audit_trail(&s1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_replay_is_acknowledged_when_meeting_has_a_second_session() {
    let h = harness();
    let s1 = waiting_session(&h, "MX1", true).await;

    assert_eq!(
        deliver(&h, "meeting-started", "MX1", 42).await.unwrap(),
        IngestOutcome::Applied { session_id: s1.clone() }
    );

    // follow-up visit booked on the same meeting room
    let s2 = waiting_session(&h, "MX1", true).await;

    assert_eq!(
        deliver(&h, "meeting-started", "MX1", 42).await.unwrap(),
        IngestOutcome::Duplicate { session_id: s1.clone() }
    );

    deliver(&h, "meeting-ended", "MX1", 43).await.unwrap();
    assert_eq!(
        deliver(&h, "meeting-started", "MX1", 42).await.unwrap(),
        IngestOutcome::Duplicate { session_id: s1.clone() }
    );

    let second = h.store.get(&s2).await.unwrap().unwrap();
    assert_eq!(second.status, SessionStatus::Waiting);
    assert_eq!(second.last_event_seq, 0);
    assert_eq!(h.store.get(&s1).await.unwrap().unwrap().status, SessionStatus::Completed);

    // a newer start belongs to the session still waiting
    assert_eq!(
        deliver(&h, "meeting-started", "MX1", 44).await.unwrap(),
        IngestOutcome::Applied { session_id: s2.clone() }
    );
}

#[tokio::test]
async fn test_meeting_started_clears_waiting_room_entry() {
    let h = harness();
    let s1 = waiting_session(&h, "MX-queue", true).await;
    let provider_id = h.store.get(&s1).await.unwrap().unwrap().provider_id;
    assert_eq!(h.state.service.get_waiting_room(provider_id).await.len(), 1);

    deliver(&h, "meeting-started", "MX-queue", 1).await.unwrap();

    assert!(h.state.service.get_waiting_room(provider_id).await.is_empty());
}

#[tokio::test]
async fn test_full_meeting_lifecycle_with_recording() {
    let h = harness();
    let s1 = waiting_session(&h, "MX-life", true).await;

    deliver(&h, "meeting-started", "MX-life", 1).await.unwrap();
    deliver(&h, "meeting-ended", "MX-life", 2).await.unwrap();

    let (body, signature) = WebhookTestUtils::signed_event(
        &h.secret,
        "recording-ready",
        "MX-life",
        3,
        json!({ "recordingId": "rec-77", "url": "https://media.example.com/rec-77" }),
    );
    let outcome = h.state.ingestor.ingest(&body, Some(&signature)).await.unwrap();
    assert_matches!(outcome, IngestOutcome::Applied { .. });

    let session = h.store.get(&s1).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.duration_minutes.is_some());
    assert_eq!(session.recordings.len(), 1);
    assert_eq!(session.recordings[0].recording_id, "rec-77");
    assert_eq!(session.last_event_seq, 3);
}

#[tokio::test]
async fn test_bad_signature_is_rejected_without_state_change() {
    let h = harness();
    let s1 = waiting_session(&h, "MX-sig", true).await;

    let (body, _) = WebhookTestUtils::signed_event(&h.secret, "meeting-started", "MX-sig", 5, json!({}));
    let (_, forged) = WebhookTestUtils::signed_event("attacker-secret", "meeting-started", "MX-sig", 5, json!({}));

    assert_matches!(h.state.ingestor.ingest(&body, Some(&forged)).await, Err(TelehealthError::Authenticity));
    assert_matches!(h.state.ingestor.ingest(&body, None).await, Err(TelehealthError::Authenticity));

    let session = h.store.get(&s1).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Waiting);
    assert_eq!(session.last_event_seq, 0);
}

#[tokio::test]
async fn test_tampered_body_fails_verification() {
    let h = harness();
    waiting_session(&h, "MX-tamper", true).await;

    let (_, signature) = WebhookTestUtils::signed_event(&h.secret, "meeting-started", "MX-tamper", 5, json!({}));
    let tampered = WebhookTestUtils::event_body("meeting-ended", "MX-tamper", 5, json!({}));

    assert_matches!(
        h.state.ingestor.ingest(&tampered, Some(&signature)).await,
        Err(TelehealthError::Authenticity)
    );
}

#[tokio::test]
async fn test_unknown_event_type_is_acknowledged() {
    let h = harness();

    let outcome = deliver(&h, "participant-joined", "MX-any", 1).await.unwrap();

    assert_eq!(outcome, IngestOutcome::Ignored { event_type: "participant-joined".to_string() });
    assert_eq!(h.state.dead_letters.len().await, 0);
}

#[tokio::test]
async fn test_unknown_meeting_is_dead_lettered_after_retries() {
    let h = harness();

    let outcome = deliver(&h, "meeting-started", "MX-ghost", 9).await.unwrap();

    assert_matches!(outcome, IngestOutcome::DeadLettered { .. });
    let records = h.state.dead_letters.list().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 3);
    assert_eq!(records[0].payload["externalMeetingId"], "MX-ghost");
}

#[tokio::test]
async fn test_blocked_start_is_acknowledged_and_audited() {
    let h = harness();
    let s1 = waiting_session(&h, "MX-noconsent", false).await;

    let outcome = deliver(&h, "meeting-started", "MX-noconsent", 4).await.unwrap();

    assert_matches!(outcome, IngestOutcome::Blocked { ref session_id, .. } if *session_id == s1);
    let session = h.store.get(&s1).await.unwrap().unwrap();
    assert_eq!(session.status, SessionStatus::Waiting);
    assert!(session.compliance_block_reason.is_some());
    assert_eq!(h.store.audit_trail(&s1).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_end_before_start_conflicts_then_succeeds_on_redelivery() {
    let h = harness();
    let s1 = waiting_session(&h, "MX-order", true).await;

    assert_matches!(
        deliver(&h, "meeting-ended", "MX-order", 8).await,
        Err(TelehealthError::StateConflict { .. })
    );

    deliver(&h, "meeting-started", "MX-order", 7).await.unwrap();
    let redelivered = deliver(&h, "meeting-ended", "MX-order", 8).await.unwrap();

    assert_eq!(redelivered, IngestOutcome::Applied { session_id: s1.clone() });
    assert_eq!(h.store.get(&s1).await.unwrap().unwrap().status, SessionStatus::Completed);
}

#[tokio::test]
async fn test_malformed_body_is_validation_error() {
    let h = harness();
    let body = b"{\"eventType\":".to_vec();
    let signature = shared_utils::signature::sign_payload(&h.secret, &body).unwrap();

    assert_matches!(
        h.state.ingestor.ingest(&body, Some(&signature)).await,
        Err(TelehealthError::Validation(_))
    );
}

#[tokio::test]
async fn test_start_between_check_in_and_enqueue_leaves_no_entry() {
    let h = harness();
    let session = h
        .state
        .service
        .create_session(CreateSessionRequest {
            external_meeting_id: "MX-race".to_string(),
            patient_id: Uuid::new_v4(),
            provider_id: Uuid::new_v4(),
            scheduled_start: Utc::now(),
            consent_obtained: true,
            recording_requested: false,
            recording_consent: false,
            chief_complaint: None,
        })
        .await
        .unwrap();

    let checked_in = h
        .state
        .service
        .state_machine()
        .apply_event(SessionEvent::new(&session.id, SessionCommand::CheckIn, "test"))
        .await
        .unwrap()
        .into_session();

    deliver(&h, "meeting-started", "MX-race", 1).await.unwrap();

    assert_matches!(
        h.state.service.waiting_room().add(&checked_in, Priority::Medium, Utc::now()).await,
        Err(TelehealthError::StateConflict { .. })
    );
    assert!(h.state.service.get_waiting_room(session.provider_id).await.is_empty());
    assert_matches!(
        h.state.service.add_to_waiting_room(&session.id, Priority::Medium).await,
        Err(TelehealthError::StateConflict { .. })
    );
    assert!(h.state.service.peek_next(session.provider_id).await.is_none());
}
