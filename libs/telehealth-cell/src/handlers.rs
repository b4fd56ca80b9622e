// libs/telehealth-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::warn;
use uuid::Uuid;

use shared_config::{AppConfig, SessionStoreBackend};
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_utils::extractor::{require_admin, require_provider};
use shared_utils::signature::SIGNATURE_HEADER;

use crate::models::{
    AddToWaitingRoomRequest, AdvisoryNotesRequest, CancelSessionRequest, CreateSessionRequest,
    EndSessionRequest, IngestOutcome, ListSessionsQuery, RecordConsentRequest, TelehealthSession,
    TransitionOutcome, UpdateStatusRequest,
};
use crate::services::{
    DeadLetterQueue, EventIngestor, InMemorySessionStore, RetryPolicy, SessionStore,
    SupabaseSessionStore, TelehealthService,
};

/// Everything the telehealth routes need, shared across requests
#[derive(Clone)]
pub struct TelehealthState {
    pub config: Arc<AppConfig>,
    pub service: Arc<TelehealthService>,
    pub ingestor: Arc<EventIngestor>,
    pub dead_letters: Arc<DeadLetterQueue>,
}

impl TelehealthState {
    pub fn new(config: Arc<AppConfig>, store: Arc<dyn SessionStore>) -> Self {
        let service = Arc::new(TelehealthService::new(store));
        let dead_letters = Arc::new(DeadLetterQueue::new());
        let ingestor = Arc::new(EventIngestor::new(
            config.telehealth.conferencing_webhook_secret.clone(),
            service.state_machine().clone(),
            service.waiting_room().clone(),
            dead_letters.clone(),
            RetryPolicy::from_settings(&config.telehealth),
        ));

        Self {
            config,
            service,
            ingestor,
            dead_letters,
        }
    }

    /// Builds the store selected by `SESSION_STORE_BACKEND`
    pub fn from_config(config: Arc<AppConfig>) -> Self {
        let store: Arc<dyn SessionStore> = match config.telehealth.session_store_backend {
            SessionStoreBackend::Memory => Arc::new(InMemorySessionStore::new()),
            SessionStoreBackend::Supabase => {
                if !config.is_supabase_configured() {
                    warn!("Supabase session store selected but Supabase credentials are incomplete");
                }
                Arc::new(SupabaseSessionStore::new(&config))
            }
        };

        Self::new(config, store)
    }
}

fn ensure_participant(user: &User, session: &TelehealthSession) -> Result<(), AppError> {
    if user.is_provider() || user.id == session.patient_id.to_string() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Not a participant of this session".to_string()))
    }
}

fn transition_body(outcome: &TransitionOutcome) -> Json<Value> {
    Json(json!({
        "outcome": outcome.as_str(),
        "session": outcome.session()
    }))
}

// ==============================================================================
// PUBLIC HANDLERS
// ==============================================================================

pub async fn telehealth_health_check(State(state): State<TelehealthState>) -> Json<Value> {
    let webhook_configured = state.config.telehealth.is_webhook_configured();

    Json(json!({
        "status": if webhook_configured { "healthy" } else { "degraded" },
        "service": "telehealth",
        "store_backend": state.config.telehealth.session_store_backend.as_str(),
        "webhook_configured": webhook_configured,
        "timestamp": Utc::now().to_rfc3339()
    }))
}

/// Conferencing provider callback; authenticated by body signature only
pub async fn conferencing_webhook(
    State(state): State<TelehealthState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    let outcome = state.ingestor.ingest(&body, signature).await?;

    let (status, payload) = match &outcome {
        IngestOutcome::Applied { session_id } | IngestOutcome::Duplicate { session_id } => (
            StatusCode::OK,
            json!({ "status": outcome.as_str(), "session_id": session_id }),
        ),
        IngestOutcome::Ignored { event_type } => (
            StatusCode::OK,
            json!({ "status": outcome.as_str(), "event_type": event_type }),
        ),
        IngestOutcome::Blocked { session_id, reason } => (
            StatusCode::ACCEPTED,
            json!({ "status": outcome.as_str(), "session_id": session_id, "reason": reason }),
        ),
        IngestOutcome::DeadLettered { dead_letter_id } => (
            StatusCode::ACCEPTED,
            json!({ "status": outcome.as_str(), "dead_letter_id": dead_letter_id }),
        ),
    };

    Ok((status, Json(payload)))
}

// ==============================================================================
// SESSION HANDLERS
// ==============================================================================

pub async fn create_session(
    State(state): State<TelehealthState>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_provider(&user)?;

    let session = state.service.create_session(request).await?;

    Ok((StatusCode::CREATED, Json(json!({ "session": session }))))
}

pub async fn list_sessions(
    State(state): State<TelehealthState>,
    Extension(user): Extension<User>,
    Query(query): Query<ListSessionsQuery>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let sessions = state.service.list_sessions(query.provider_id).await?;

    Ok(Json(json!({
        "sessions": sessions,
        "total": sessions.len()
    })))
}

pub async fn get_session(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let session = state.service.get_session(&session_id).await?;
    ensure_participant(&user, &session)?;

    Ok(Json(json!({ "session": session })))
}

pub async fn update_session_status(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let outcome = state.service.update_status(&session_id, request, &user.id).await?;

    Ok(transition_body(&outcome))
}

pub async fn cancel_session(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelSessionRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state.service.get_session(&session_id).await?;
    ensure_participant(&user, &session)?;

    let outcome = state.service.cancel(&session_id, request.reason).await?;

    Ok(transition_body(&outcome))
}

pub async fn end_session(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
    Json(request): Json<EndSessionRequest>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let outcome = state.service.end_session(&session_id, request.abnormal).await?;

    Ok(transition_body(&outcome))
}

pub async fn add_to_waiting_room(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
    Json(request): Json<AddToWaitingRoomRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let session = state.service.get_session(&session_id).await?;
    ensure_participant(&user, &session)?;

    let entry = state.service.add_to_waiting_room(&session_id, request.priority).await?;

    Ok((StatusCode::CREATED, Json(json!({ "entry": entry }))))
}

pub async fn run_compliance_check(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let passed = state.service.compliance_check(&session_id).await?;
    let trail = state.service.audit_trail(&session_id).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "passed": passed,
        "entry": trail.last()
    })))
}

pub async fn get_audit_trail(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let session = state.service.get_session(&session_id).await?;
    ensure_participant(&user, &session)?;

    let entries = state.service.audit_trail(&session_id).await?;

    Ok(Json(json!({
        "session_id": session_id,
        "entries": entries
    })))
}

pub async fn record_consent(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
    Json(request): Json<RecordConsentRequest>,
) -> Result<Json<Value>, AppError> {
    let session = state.service.get_session(&session_id).await?;
    ensure_participant(&user, &session)?;

    let outcome = state
        .service
        .record_consent(&session_id, request.consent_obtained, request.recording_consent)
        .await?;

    Ok(transition_body(&outcome))
}

pub async fn attach_advisory_notes(
    State(state): State<TelehealthState>,
    Path(session_id): Path<String>,
    Extension(user): Extension<User>,
    Json(request): Json<AdvisoryNotesRequest>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let outcome = state.service.attach_advisory(&session_id, request.notes).await?;

    Ok(transition_body(&outcome))
}

// ==============================================================================
// WAITING ROOM HANDLERS
// ==============================================================================

pub async fn get_waiting_room(
    State(state): State<TelehealthState>,
    Path(provider_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let entries = state.service.get_waiting_room(provider_id).await;

    Ok(Json(json!({
        "provider_id": provider_id,
        "entries": entries,
        "total": entries.len()
    })))
}

pub async fn peek_next_patient(
    State(state): State<TelehealthState>,
    Path(provider_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let next = state.service.peek_next(provider_id).await;

    Ok(Json(json!({
        "provider_id": provider_id,
        "next": next
    })))
}

pub async fn admit_next_patient(
    State(state): State<TelehealthState>,
    Path(provider_id): Path<Uuid>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let admission = state.service.admit_next(provider_id, &user.id).await?;

    Ok(Json(json!({
        "outcome": admission.outcome.as_str(),
        "entry": admission.entry,
        "session": admission.outcome.session()
    })))
}

pub async fn admit_entry(
    State(state): State<TelehealthState>,
    Path(entry_id): Path<u64>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_provider(&user)?;

    let admission = state.service.admit(entry_id, &user.id).await?;

    Ok(Json(json!({
        "outcome": admission.outcome.as_str(),
        "entry": admission.entry,
        "session": admission.outcome.session()
    })))
}

// ==============================================================================
// ADMIN HANDLERS
// ==============================================================================

pub async fn list_dead_letters(
    State(state): State<TelehealthState>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    require_admin(&user)?;

    let records = state.dead_letters.list().await;

    Ok(Json(json!({
        "dead_letters": records,
        "total": records.len()
    })))
}
