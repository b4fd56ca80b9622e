pub mod compliance;
pub mod dead_letter;
pub mod ingestor;
pub mod monitor;
pub mod retry;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod waiting_room;

pub use compliance::ComplianceGate;
pub use dead_letter::DeadLetterQueue;
pub use ingestor::EventIngestor;
pub use monitor::WaitingRoomMonitor;
pub use retry::RetryPolicy;
pub use session::TelehealthService;
pub use state_machine::SessionStateMachine;
pub use store::{InMemorySessionStore, SessionStore, SupabaseSessionStore};
pub use waiting_room::WaitingRoomQueue;
