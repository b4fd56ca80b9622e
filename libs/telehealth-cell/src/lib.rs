// libs/telehealth-cell/src/lib.rs
//! # Telehealth Cell
//!
//! Orchestrates the lifecycle of a telehealth encounter: scheduling, the
//! priority waiting room, admission behind the consent gate, and the
//! conferencing provider's lifecycle webhooks.
//!
//! ```text
//! +-----------------------------------------------------+
//! |                 Telehealth Cell                     |
//! +-----------------------------------------------------+
//! |  handlers.rs       |  HTTP endpoint handlers        |
//! |  router.rs         |  Route definitions             |
//! |  models.rs         |  Sessions, entries, commands   |
//! |  services/         |                                |
//! |    state_machine.rs|  Single writer of status       |
//! |    compliance.rs   |  Consent gate + audit entries  |
//! |    waiting_room.rs |  Per-provider priority queues  |
//! |    ingestor.rs     |  Signed webhook ingestion      |
//! |    store.rs        |  In-memory / Supabase storage  |
//! +-----------------------------------------------------+
//! ```
//!
//! Every status change goes through
//! [`SessionStateMachine::apply_event`](services::SessionStateMachine::apply_event).
//! Queue operations take the provider's queue lock before any session lock.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::TelehealthError;
pub use handlers::TelehealthState;
pub use models::{
    Priority, SessionCommand, SessionEvent, SessionStatus, TelehealthSession, TransitionOutcome,
    WaitingRoomEntry,
};
pub use router::telehealth_routes;
pub use services::{EventIngestor, SessionStateMachine, TelehealthService, WaitingRoomMonitor, WaitingRoomQueue};
