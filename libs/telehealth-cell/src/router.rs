// libs/telehealth-cell/src/router.rs
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use shared_utils::extractor::auth_middleware;

use crate::handlers::*;

/// Creates the telehealth routes, mounted under `/telehealth`
pub fn telehealth_routes(state: TelehealthState) -> Router {
    // Public routes (the webhook authenticates by signature)
    let public_routes = Router::new()
        .route("/health", get(telehealth_health_check))
        .route("/webhooks/conferencing", post(conferencing_webhook));

    // Protected routes (authentication required)
    let protected_routes = Router::new()
        // Session lifecycle
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{session_id}", get(get_session))
        .route("/sessions/{session_id}/status", put(update_session_status))
        .route("/sessions/{session_id}/cancel", post(cancel_session))
        .route("/sessions/{session_id}/end", post(end_session))
        .route("/sessions/{session_id}/waiting-room", post(add_to_waiting_room))
        .route("/sessions/{session_id}/consent", put(record_consent))
        .route("/sessions/{session_id}/compliance-check", post(run_compliance_check))
        .route("/sessions/{session_id}/audit", get(get_audit_trail))
        .route("/sessions/{session_id}/advisory", put(attach_advisory_notes))

        // Waiting room
        .route("/waiting-room/{provider_id}", get(get_waiting_room))
        .route("/waiting-room/{provider_id}/next", get(peek_next_patient))
        .route("/waiting-room/{provider_id}/admit-next", post(admit_next_patient))
        .route("/waiting-room/entries/{entry_id}/admit", post(admit_entry))

        // Admin endpoints
        .route("/admin/dead-letters", get(list_dead_letters))

        .layer(middleware::from_fn_with_state(state.config.clone(), auth_middleware));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}
