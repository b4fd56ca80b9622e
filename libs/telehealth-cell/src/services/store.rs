use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::error::TelehealthError;
use crate::models::{ComplianceAuditEntry, SessionStatus, TelehealthSession};

/// Durable home of sessions and the compliance audit log.
///
/// `commit_transition` writes the session row and the optional audit entry as
/// one unit; implementations must never persist one without the other. It is
/// also where the one-live-session-per-meeting rule is enforced.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn insert(&self, session: &TelehealthSession) -> Result<(), TelehealthError>;

    async fn get(&self, session_id: &str) -> Result<Option<TelehealthSession>, TelehealthError>;

    /// Sessions bound to a conferencing meeting, most recently updated first
    async fn find_by_meeting(&self, external_meeting_id: &str) -> Result<Vec<TelehealthSession>, TelehealthError>;

    async fn list_by_provider(&self, provider_id: Uuid) -> Result<Vec<TelehealthSession>, TelehealthError>;

    /// Sessions still `scheduled` whose start is before `cutoff`, oldest first
    async fn list_scheduled_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TelehealthSession>, TelehealthError>;

    async fn commit_transition(
        &self,
        session: &TelehealthSession,
        audit: Option<&ComplianceAuditEntry>,
    ) -> Result<(), TelehealthError>;

    async fn append_audit(&self, entry: &ComplianceAuditEntry) -> Result<(), TelehealthError>;

    async fn audit_trail(&self, session_id: &str) -> Result<Vec<ComplianceAuditEntry>, TelehealthError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<String, TelehealthSession>,
    audit: HashMap<String, Vec<ComplianceAuditEntry>>,
}

#[derive(Default)]
pub struct InMemorySessionStore {
    state: RwLock<MemoryState>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn insert(&self, session: &TelehealthSession) -> Result<(), TelehealthError> {
        let mut state = self.state.write().await;

        if state.sessions.contains_key(&session.id) {
            return Err(TelehealthError::StateConflict {
                session_id: session.id.clone(),
                message: "session id already exists".to_string(),
            });
        }

        state.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<TelehealthSession>, TelehealthError> {
        Ok(self.state.read().await.sessions.get(session_id).cloned())
    }

    async fn find_by_meeting(&self, external_meeting_id: &str) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let state = self.state.read().await;
        let mut sessions: Vec<TelehealthSession> = state
            .sessions
            .values()
            .filter(|s| s.external_meeting_id == external_meeting_id)
            .cloned()
            .collect();

        sessions.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(sessions)
    }

    async fn list_by_provider(&self, provider_id: Uuid) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let state = self.state.read().await;
        let mut sessions: Vec<TelehealthSession> = state
            .sessions
            .values()
            .filter(|s| s.provider_id == provider_id)
            .cloned()
            .collect();

        sessions.sort_by(|a, b| a.scheduled_start.cmp(&b.scheduled_start));
        Ok(sessions)
    }

    async fn list_scheduled_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let state = self.state.read().await;
        let mut sessions: Vec<TelehealthSession> = state
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Scheduled && s.scheduled_start < cutoff)
            .cloned()
            .collect();

        sessions.sort_by(|a, b| a.scheduled_start.cmp(&b.scheduled_start));
        Ok(sessions)
    }

    async fn commit_transition(
        &self,
        session: &TelehealthSession,
        audit: Option<&ComplianceAuditEntry>,
    ) -> Result<(), TelehealthError> {
        let mut state = self.state.write().await;

        if !state.sessions.contains_key(&session.id) {
            return Err(TelehealthError::NotFound(format!("Session {} not found", session.id)));
        }

        if session.status == SessionStatus::InProgress {
            let live_elsewhere = state.sessions.values().any(|other| {
                other.id != session.id
                    && other.external_meeting_id == session.external_meeting_id
                    && other.status == SessionStatus::InProgress
            });

            if live_elsewhere {
                return Err(TelehealthError::StateConflict {
                    session_id: session.id.clone(),
                    message: format!(
                        "meeting {} already has a session in progress",
                        session.external_meeting_id
                    ),
                });
            }
        }

        state.sessions.insert(session.id.clone(), session.clone());
        if let Some(entry) = audit {
            state
                .audit
                .entry(entry.session_id.clone())
                .or_default()
                .push(entry.clone());
        }

        Ok(())
    }

    async fn append_audit(&self, entry: &ComplianceAuditEntry) -> Result<(), TelehealthError> {
        let mut state = self.state.write().await;
        state
            .audit
            .entry(entry.session_id.clone())
            .or_default()
            .push(entry.clone());
        Ok(())
    }

    async fn audit_trail(&self, session_id: &str) -> Result<Vec<ComplianceAuditEntry>, TelehealthError> {
        Ok(self
            .state
            .read()
            .await
            .audit
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

const SESSIONS_TABLE: &str = "/rest/v1/telehealth_sessions";
const AUDIT_TABLE: &str = "/rest/v1/compliance_audit_log";
const COMMIT_TRANSITION_RPC: &str = "commit_session_transition";

/// PostgREST-backed store. The transition commit runs inside the
/// `commit_session_transition` database function so the row update and the
/// audit insert share a transaction; a partial unique index on
/// `(external_meeting_id) where status = 'in_progress'` rejects a second live
/// session with a 409. The function returns the committed row.
pub struct SupabaseSessionStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSessionStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch_sessions(&self, path: &str) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let rows: Vec<Value> = self
            .supabase
            .service_request(Method::GET, path, None)
            .await
            .map_err(transient)?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(TelehealthError::from))
            .collect()
    }
}

fn transient(err: anyhow::Error) -> TelehealthError {
    TelehealthError::Transient(err.to_string())
}

fn is_conflict(err: &anyhow::Error) -> bool {
    err.to_string().starts_with("Conflict")
}

#[async_trait]
impl SessionStore for SupabaseSessionStore {
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    async fn insert(&self, session: &TelehealthSession) -> Result<(), TelehealthError> {
        let body = serde_json::to_value(session)?;

        let _: Vec<Value> = self
            .supabase
            .service_request(Method::POST, SESSIONS_TABLE, Some(body))
            .await
            .map_err(|e| {
                if is_conflict(&e) {
                    TelehealthError::StateConflict {
                        session_id: session.id.clone(),
                        message: "session id already exists".to_string(),
                    }
                } else {
                    transient(e)
                }
            })?;

        Ok(())
    }

    async fn get(&self, session_id: &str) -> Result<Option<TelehealthSession>, TelehealthError> {
        let path = format!("{}?id=eq.{}", SESSIONS_TABLE, session_id);
        Ok(self.fetch_sessions(&path).await?.into_iter().next())
    }

    async fn find_by_meeting(&self, external_meeting_id: &str) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let path = format!(
            "{}?external_meeting_id=eq.{}&order=updated_at.desc",
            SESSIONS_TABLE, external_meeting_id
        );
        self.fetch_sessions(&path).await
    }

    async fn list_by_provider(&self, provider_id: Uuid) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let path = format!(
            "{}?provider_id=eq.{}&order=scheduled_start.asc",
            SESSIONS_TABLE, provider_id
        );
        self.fetch_sessions(&path).await
    }

    async fn list_scheduled_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<TelehealthSession>, TelehealthError> {
        let path = format!(
            "{}?status=eq.scheduled&scheduled_start=lt.{}&order=scheduled_start.asc",
            SESSIONS_TABLE,
            cutoff.format("%Y-%m-%dT%H:%M:%SZ")
        );
        self.fetch_sessions(&path).await
    }

    #[instrument(skip(self, session, audit), fields(session_id = %session.id, status = %session.status))]
    async fn commit_transition(
        &self,
        session: &TelehealthSession,
        audit: Option<&ComplianceAuditEntry>,
    ) -> Result<(), TelehealthError> {
        let p_session = serde_json::to_value(session)?;
        let p_audit = audit.map(serde_json::to_value).transpose()?;
        let args = json!({ "p_session": p_session, "p_audit": p_audit });

        let _: Value = self
            .supabase
            .rpc(COMMIT_TRANSITION_RPC, args)
            .await
            .map_err(|e| {
                if is_conflict(&e) {
                    TelehealthError::StateConflict {
                        session_id: session.id.clone(),
                        message: format!(
                            "meeting {} already has a session in progress",
                            session.external_meeting_id
                        ),
                    }
                } else {
                    transient(e)
                }
            })?;

        debug!("Committed transition through {}", COMMIT_TRANSITION_RPC);
        Ok(())
    }

    async fn append_audit(&self, entry: &ComplianceAuditEntry) -> Result<(), TelehealthError> {
        let body = serde_json::to_value(entry)?;
        let _: Vec<Value> = self
            .supabase
            .service_request(Method::POST, AUDIT_TABLE, Some(body))
            .await
            .map_err(transient)?;
        Ok(())
    }

    async fn audit_trail(&self, session_id: &str) -> Result<Vec<ComplianceAuditEntry>, TelehealthError> {
        let path = format!("{}?session_id=eq.{}&order=checked_at.asc", AUDIT_TABLE, session_id);
        let rows: Vec<Value> = self
            .supabase
            .service_request(Method::GET, &path, None)
            .await
            .map_err(transient)?;

        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(TelehealthError::from))
            .collect()
    }
}
