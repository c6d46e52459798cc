mod common;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use std::time::Duration;

use common::{config, tcp, ACK, SYN, SYN_ACK};
use sparhund_core::packet::CapturedPacket;
use sparhund_engine::decoder::{DecodeEvent, Finalized, InitContext};
use sparhund_engine::stream::{AssemblerStats, FlushCutoffs, FlushOutcome};
use sparhund_engine::{
    AuditRecord, DecodeError, DecoderPlugin, DecoderRegistry, Engine, StreamAssembler, StreamHandler,
};
use sparhund_telemetry::MetricsRecorder;

struct Stalled {
    gate: crossbeam::channel::Receiver<()>,
    submitted: AtomicU64,
}

impl StreamAssembler for Stalled {
    fn register_handler(&self, _handler: Arc<dyn StreamHandler>) {}

    fn submit(&self, _packet: &CapturedPacket) {
        let _ = self.gate.recv();
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    fn flush_older_than(&self, _cutoffs: FlushCutoffs) -> FlushOutcome {
        FlushOutcome::default()
    }

    fn flush_all(&self) -> usize {
        0
    }

    fn stats(&self) -> AssemblerStats {
        AssemblerStats::default()
    }
}

#[tokio::test]
async fn stalled_assembler_does_not_block_packet_path() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.reassembly.submit_timeout_ms = 50;

    let (release, gate) = crossbeam::channel::bounded::<()>(0);
    let metrics = Arc::new(MetricsRecorder::new().unwrap());
    let engine = Engine::builder(config)
        .assembler(Arc::new(Stalled {
            gate,
            submitted: AtomicU64::new(0),
        }))
        .metrics(metrics.clone())
        .build()
        .unwrap();

    let deadline = std::time::Duration::from_secs(5);
    tokio::time::timeout(deadline, engine.handle_packet(tcp(true, ACK, b"stuck", 0)))
        .await
        .expect("packet path hung on a stalled assembler");
    assert_eq!(metrics.submit_timeouts.get(), 1);

    drop(release);
    engine.handle_packet(tcp(true, ACK, b"next", 1)).await;

    let report = engine.finalize().await.unwrap();
    assert_eq!(report.errors["tcp submit"], 1);
    assert_eq!(report.submit_timeouts, 1);
    assert_eq!(report.packets, 2);
}

/// Stream decoder that blocks on its first data delivery until released.
struct Wedged {
    gate: crossbeam::channel::Receiver<()>,
}

impl DecoderPlugin for Wedged {
    fn name(&self) -> &'static str {
        "wedged"
    }

    fn record_type(&self) -> &'static str {
        "HTTP"
    }

    fn post_init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), DecodeError> {
        ctx.subscribe_streams();
        Ok(())
    }

    fn decode(&self, event: &DecodeEvent<'_>) -> Result<Vec<AuditRecord>, DecodeError> {
        if let DecodeEvent::StreamData { .. } = event {
            let _ = self.gate.recv();
        }
        Ok(Vec::new())
    }

    fn finalize(&self) -> Result<Finalized, DecodeError> {
        Ok(Finalized::default())
    }
}

#[tokio::test]
async fn finalize_returns_while_a_stream_handler_is_stuck() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    config.reassembly.submit_timeout_ms = 50;
    config.reassembly.final_flush_timeout_ms = 100;

    let (release, gate) = crossbeam::channel::bounded::<()>(0);
    let engine = Engine::builder(config)
        .decoders(DecoderRegistry::new().register(Box::new(Wedged { gate })))
        .build()
        .unwrap();

    let deadline = Duration::from_secs(5);
    for packet in [
        tcp(true, SYN, b"", 0),
        tcp(false, SYN_ACK, b"", 0),
        tcp(true, ACK, b"GET / HTTP/1.1\r\nHost: a\r\n\r\n", 1),
    ] {
        tokio::time::timeout(deadline, engine.handle_packet(packet))
            .await
            .expect("packet path hung on a stuck stream handler");
    }

    // the gate stays closed: the stuck delivery still holds its connection
    let report = tokio::time::timeout(deadline, engine.finalize())
        .await
        .expect("finalize hung on a stuck stream handler")
        .unwrap();
    assert_eq!(report.packets, 3);
    assert_eq!(report.errors["tcp submit"], 1);
    assert_eq!(report.errors["tcp flush"], 1);
    assert_eq!(report.submit_timeouts, 1);
    assert!(report.decoders.iter().any(|d| d.name == "wedged"));

    drop(release);
}
