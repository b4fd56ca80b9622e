// libs/device-telemetry-cell/src/lib.rs
//! # Device Telemetry Cell
//!
//! Turns raw payloads from in-session medical devices into canonical
//! readings and raises clinical alerts from an injected threshold table.
//! Processing is advisory only and never changes session status.

pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::TelemetryError;
pub use handlers::TelemetryState;
pub use models::{Alert, CanonicalReading, DeviceReading, ProcessedTelemetry, ReadingValue, Severity};
pub use router::device_telemetry_routes;
pub use services::{DeviceTelemetryProcessor, InMemoryTelemetryStore, TelemetryStore, ThresholdTable};
