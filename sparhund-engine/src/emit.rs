//! Single exit point for produced records.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use sparhund_telemetry::{EventLogger, MetricsRecorder};
use tracing::error;

use crate::record::AuditRecord;
use crate::sink::RecordSink;
use crate::stats::SharedStats;

/// Logs, counts and writes every record to the sink.
pub struct RecordEmitter {
    sink: Arc<dyn RecordSink>,
    metrics: Option<Arc<MetricsRecorder>>,
    stats: Arc<SharedStats>,
    emitted: AtomicU64,
}

impl RecordEmitter {
    pub fn new(
        sink: Arc<dyn RecordSink>,
        metrics: Option<Arc<MetricsRecorder>>,
        stats: Arc<SharedStats>,
    ) -> Self {
        Self {
            sink,
            metrics,
            stats,
            emitted: AtomicU64::new(0),
        }
    }

    /// Write failures are logged and counted, never returned.
    pub fn emit(&self, record: AuditRecord) {
        let record_type = record.record_type();
        EventLogger::log_record(record_type, record.attributes());
        if let Some(metrics) = &self.metrics {
            metrics.inc_record(record_type);
        }
        self.emitted.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.sink.write(&record) {
            error!(record_type, error = %e, "Failed to write record");
            self.stats.record_error("record output");
        }
    }

    pub fn emit_all(&self, records: impl IntoIterator<Item = AuditRecord>) {
        for record in records {
            self.emit(record);
        }
    }

    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    pub fn flush(&self) {
        if let Err(e) = self.sink.flush() {
            error!(error = %e, "Failed to flush record sink");
            self.stats.record_error("record output");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::record::SshRecord;
    use crate::sink::MemorySink;

    struct Broken;

    impl RecordSink for Broken {
        fn write(&self, _record: &AuditRecord) -> Result<(), EngineError> {
            Err(EngineError::Sink("disk full".into()))
        }
    }

    #[test]
    fn counts_and_writes() {
        let sink = Arc::new(MemorySink::new());
        let metrics = Arc::new(MetricsRecorder::new().unwrap());
        let emitter = RecordEmitter::new(sink.clone(), Some(metrics.clone()), Arc::new(SharedStats::new()));
        emitter.emit_all(vec![AuditRecord::Ssh(SshRecord::default()); 2]);

        assert_eq!(sink.len(), 2);
        assert_eq!(emitter.emitted(), 2);
        assert_eq!(metrics.records.with_label_values(&["SSH"]).get(), 2);
    }

    #[test]
    fn sink_failures_are_counted() {
        let stats = Arc::new(SharedStats::new());
        let emitter = RecordEmitter::new(Arc::new(Broken), None, Arc::clone(&stats));
        emitter.emit(AuditRecord::Ssh(SshRecord::default()));
        assert_eq!(stats.snapshot().errors["record output"], 1);
    }
}
