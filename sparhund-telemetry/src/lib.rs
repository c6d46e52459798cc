//! # Sparhund Telemetry
//!
//! Logging and metrics shared by the capture, engine and CLI crates.

pub mod logging;
pub mod metrics;

pub use logging::EventLogger;
pub use metrics::MetricsRecorder;
