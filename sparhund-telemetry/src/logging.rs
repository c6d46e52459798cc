//! Structured logging with tracing and OpenTelemetry attributes.

use opentelemetry::KeyValue;
use tracing::debug_span;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Clone)]
pub struct EventLogger;

impl EventLogger {
    /// Installs the global subscriber. `RUST_LOG` takes precedence over `level`.
    ///
    /// Calling it twice is harmless; the second installation is ignored.
    pub fn init(level: &str) {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(level))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_thread_names(true)
            .with_span_events(FmtSpan::ENTER)
            .try_init();
    }

    /// Emits one structured event for a produced audit record.
    #[inline]
    pub fn log_record(kind: &str, attributes: Vec<KeyValue>) {
        let span = debug_span!("audit_record", record_type = kind, otel.kind = "INTERNAL");
        let _guard = span.enter();
        tracing::debug!(attributes = ?attributes, "Audit record produced");
    }
}
