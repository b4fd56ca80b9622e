pub mod processor;
pub mod store;
pub mod thresholds;

pub use processor::DeviceTelemetryProcessor;
pub use store::{InMemoryTelemetryStore, TelemetryStore};
pub use thresholds::{Comparison, ThresholdRule, ThresholdTable};
