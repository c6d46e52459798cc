//! Prometheus counters for the capture-to-record pipeline.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

#[derive(Debug, Clone)]
pub struct MetricsRecorder {
    pub registry: Registry,
    pub packets: IntCounter,
    pub bytes: IntCounter,
    pub records: IntCounterVec,
    pub decode_errors: IntCounterVec,
    pub submit_timeouts: IntCounter,
    pub conversations_saved: IntCounter,
    pub services: IntCounter,
}

impl MetricsRecorder {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let packets = IntCounter::new("sparhund_packets_total", "Packets processed")?;
        let bytes = IntCounter::new("sparhund_bytes_total", "Bytes processed")?;
        let records = IntCounterVec::new(
            Opts::new("sparhund_records_total", "Audit records produced"),
            &["type"],
        )?;
        let decode_errors = IntCounterVec::new(
            Opts::new("sparhund_decode_errors_total", "Decoder errors"),
            &["decoder"],
        )?;
        let submit_timeouts = IntCounter::new(
            "sparhund_submit_timeouts_total",
            "Assembler submissions abandoned after the timeout",
        )?;
        let conversations_saved = IntCounter::new(
            "sparhund_conversations_saved_total",
            "Conversations written to disk",
        )?;
        let services = IntCounter::new("sparhund_services_total", "Distinct services recorded")?;

        registry.register(Box::new(packets.clone()))?;
        registry.register(Box::new(bytes.clone()))?;
        registry.register(Box::new(records.clone()))?;
        registry.register(Box::new(decode_errors.clone()))?;
        registry.register(Box::new(submit_timeouts.clone()))?;
        registry.register(Box::new(conversations_saved.clone()))?;
        registry.register(Box::new(services.clone()))?;

        Ok(Self {
            registry,
            packets,
            bytes,
            records,
            decode_errors,
            submit_timeouts,
            conversations_saved,
            services,
        })
    }

    pub fn gather_metrics(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let mut buffer = Vec::<u8>::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn observe_packet(&self, len: usize) {
        self.packets.inc();
        self.bytes.inc_by(len as u64);
    }

    pub fn inc_record(&self, record_type: &str) {
        self.records.with_label_values(&[record_type]).inc();
    }

    pub fn inc_decode_error(&self, decoder: &str) {
        self.decode_errors.with_label_values(&[decoder]).inc();
    }
}
