//! ## sparhund-engine::runtime
//! **Engine wiring and the packet worker pool**
//!
//! Packets from a [`PacketSource`] are sharded by [`FlowKey`] over a fixed
//! set of workers so that every flow is handled by one worker, in capture
//! order. UDP payloads go to the conversation pool; TCP segments go through
//! the [`TcpStreamDriver`]. [`Engine::finalize`] flushes everything once.
//!
//! [`FlowKey`]: sparhund_core::flow::FlowKey

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use sparhund_capture::CaptureStats;
use sparhund_config::SparhundConfig;
use sparhund_core::flow::TransportProtocol;
use sparhund_core::harvest::BannerHarvester;
use sparhund_core::packet::CapturedPacket;
use sparhund_core::persist::ConnectionWriter;
use sparhund_core::pool::ConversationPool;
use sparhund_core::processor::ConversationProcessor;
use sparhund_core::resolve::{LocalResolver, NameLookup};
use sparhund_core::service::ServiceRegistry;
use sparhund_detection::ServiceProbes;
use sparhund_telemetry::MetricsRecorder;
use tokio::sync::mpsc;
use tokio::task::{spawn_blocking, JoinHandle};
use tracing::{debug, error, info, instrument, trace};

use crate::decoder::{CustomDecoder, DecodeEvent, DecoderRegistry, DecoderSet};
use crate::emit::RecordEmitter;
use crate::error::{EngineError, ErrorKind};
use crate::record::AuditRecord;
use crate::report::FinalReport;
use crate::sink::{MemorySink, RecordSink};
use crate::source::PacketSource;
use crate::stats::SharedStats;
use crate::stream::{
    account_conversation, PassthroughAssembler, StreamAssembler, StreamFanout, TcpConversationRecorder,
    TcpStreamDriver,
};

/// Depth of the source and per-worker queues.
const QUEUE_DEPTH: usize = 1024;

pub struct EngineBuilder {
    config: SparhundConfig,
    sink: Option<Arc<dyn RecordSink>>,
    assembler: Option<Arc<dyn StreamAssembler>>,
    lookup: Option<Arc<dyn NameLookup>>,
    decoders: Option<DecoderRegistry>,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl EngineBuilder {
    pub fn new(config: SparhundConfig) -> Self {
        Self {
            config,
            sink: None,
            assembler: None,
            lookup: None,
            decoders: None,
            metrics: None,
        }
    }

    pub fn sink(mut self, sink: Arc<dyn RecordSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Replaces the built-in [`PassthroughAssembler`].
    pub fn assembler(mut self, assembler: Arc<dyn StreamAssembler>) -> Self {
        self.assembler = Some(assembler);
        self
    }

    /// Replaces the resolver loaded from the configured files.
    pub fn lookup(mut self, lookup: Arc<dyn NameLookup>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn decoders(mut self, decoders: DecoderRegistry) -> Self {
        self.decoders = Some(decoders);
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    #[instrument(skip_all)]
    pub fn build(self) -> Result<Engine, EngineError> {
        let config = self.config;
        let output = &config.output;

        let probes = Arc::new(ServiceProbes::with_defaults()?);
        let lookup = self.lookup.unwrap_or_else(|| {
            Arc::new(LocalResolver::from_files(
                config.resolvers.hosts_file.as_deref(),
                config.resolvers.services_file.as_deref(),
            ))
        });
        let registry = Arc::new(ServiceRegistry::new(
            output.banner_size,
            Arc::clone(&probes),
            Arc::clone(&lookup),
        ));
        let processor = Arc::new(ConversationProcessor::new(
            BannerHarvester::new(probes, lookup),
            ConnectionWriter::from_config(output),
            Arc::clone(&registry),
        ));

        let stats = Arc::new(SharedStats::new());
        let metrics = self.metrics;
        let sink = self.sink.unwrap_or_else(|| Arc::new(MemorySink::new()));
        let emitter = Arc::new(RecordEmitter::new(sink, metrics.clone(), Arc::clone(&stats)));

        let decoders = self
            .decoders
            .unwrap_or_else(DecoderRegistry::with_defaults)
            .build(&config, Arc::clone(&stats), metrics.clone());

        let recorder = Arc::new(TcpConversationRecorder::new(
            output.banner_size,
            Arc::clone(&processor),
            metrics.clone(),
            Arc::clone(&stats),
        ));
        let assembler = self.assembler.unwrap_or_else(|| {
            Arc::new(PassthroughAssembler::new(config.reassembly.allow_missing_init))
        });
        assembler.register_handler(Arc::new(StreamFanout::new(
            Some(Arc::clone(&recorder)),
            decoders.stream_decoders(),
            Arc::clone(&emitter),
        )));
        let driver = TcpStreamDriver::new(assembler, &config.reassembly);

        info!(
            decoders = ?decoders.decoders.iter().map(|d| d.name()).collect::<Vec<_>>(),
            workers = config.capture.workers,
            output = %output.root.display(),
            save_conns = output.save_conns,
            "Engine ready"
        );

        Ok(Engine {
            workers: config.capture.workers.max(1),
            verify_checksum: config.reassembly.checksum,
            packet_decoders: decoders.packet_decoders(),
            decoders,
            udp: Arc::new(ConversationPool::new(output.banner_size)),
            processor,
            registry,
            recorder,
            driver,
            emitter,
            stats,
            metrics,
            finalized: AtomicBool::new(false),
            capture: Mutex::new(None),
        })
    }
}

pub struct Engine {
    workers: usize,
    verify_checksum: bool,
    decoders: DecoderSet,
    packet_decoders: Vec<Arc<CustomDecoder>>,
    udp: Arc<ConversationPool>,
    processor: Arc<ConversationProcessor>,
    registry: Arc<ServiceRegistry>,
    recorder: Arc<TcpConversationRecorder>,
    driver: TcpStreamDriver,
    emitter: Arc<RecordEmitter>,
    stats: Arc<SharedStats>,
    metrics: Option<Arc<MetricsRecorder>>,
    finalized: AtomicBool,
    capture: Mutex<Option<(CaptureStats, Option<String>)>>,
}

impl Engine {
    pub fn builder(config: SparhundConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    /// Whether the capture layer should verify transport checksums.
    pub fn verify_checksum(&self) -> bool {
        self.verify_checksum
    }

    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    pub fn stats(&self) -> &Arc<SharedStats> {
        &self.stats
    }

    pub fn udp_conversations(&self) -> usize {
        self.udp.len()
    }

    /// Processes one packet. Calls for the same flow must not overlap.
    pub async fn handle_packet(&self, packet: CapturedPacket) {
        self.stats.record_packet(packet.wire_len);
        if let Some(metrics) = &self.metrics {
            metrics.observe_packet(packet.wire_len);
        }

        for decoder in &self.packet_decoders {
            self.emitter
                .emit_all(decoder.decode(&DecodeEvent::Packet(&packet)));
        }

        match packet.protocol() {
            TransportProtocol::Udp => {
                if !packet.payload.is_empty() {
                    self.udp.ingest(packet.flow_key(), packet.fragment());
                }
            }
            TransportProtocol::Tcp => {
                if packet.checksum_ok == Some(false) {
                    trace!(flow = %packet.flow_key(), "Dropping segment with bad checksum");
                    self.stats.record_error("tcp checksum");
                    if let Err(e) = self.driver.skip(packet.timestamp).await {
                        self.stats.record_error(&e.subject);
                    }
                    return;
                }
                if let Err(e) = self.driver.submit(packet).await {
                    if e.kind == ErrorKind::Timeout {
                        if let Some(metrics) = &self.metrics {
                            metrics.submit_timeouts.inc();
                        }
                    }
                    self.stats.record_error(&e.subject);
                }
            }
        }
    }

    /// Consumes `source` through the worker pool, then finalizes.
    ///
    /// A failing source still yields a report; the failure is recorded in
    /// [`FinalReport::capture_error`].
    #[instrument(skip_all, fields(workers = self.workers))]
    pub async fn run(self: Arc<Self>, source: Box<dyn PacketSource>) -> Result<FinalReport, EngineError> {
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        let producer = tokio::spawn(source.run(tx));

        let mut lanes = Vec::with_capacity(self.workers);
        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.workers);
        for id in 0..self.workers {
            let (lane_tx, mut lane_rx) = mpsc::channel::<CapturedPacket>(QUEUE_DEPTH);
            let engine = Arc::clone(&self);
            handles.push(tokio::spawn(async move {
                let mut handled = 0u64;
                while let Some(packet) = lane_rx.recv().await {
                    engine.handle_packet(packet).await;
                    handled += 1;
                }
                debug!(worker = id, handled, "Worker finished");
            }));
            lanes.push(lane_tx);
        }

        while let Some(packet) = rx.recv().await {
            let lane = packet.flow_key().shard(lanes.len());
            if lanes[lane].send(packet).await.is_err() {
                error!(worker = lane, "Worker stopped early");
                break;
            }
        }
        drop(lanes);
        for handle in handles {
            handle.await?;
        }

        let outcome = match producer.await? {
            Ok(stats) => (stats, None),
            Err(e) => {
                error!(error = %e, "Packet source failed");
                self.stats.record_error("capture");
                (CaptureStats::default(), Some(e.to_string()))
            }
        };
        *self.capture.lock() = Some(outcome);

        self.finalize().await
    }

    /// Flushes every stream, drains every conversation, finalizes the
    /// decoders and writes the service records. Runs only once.
    #[instrument(skip_all)]
    pub async fn finalize(&self) -> Result<FinalReport, EngineError> {
        if self.finalized.swap(true, Ordering::SeqCst) {
            return Err(EngineError::Finalized);
        }

        if let Err(e) = self.driver.flush_all().await {
            error!(error = %e, "Final stream flush failed");
            self.stats.record_error(&e.subject);
        }

        let conversations = {
            let udp = Arc::clone(&self.udp);
            let recorder = Arc::clone(&self.recorder);
            let processor = Arc::clone(&self.processor);
            let metrics = self.metrics.clone();
            let stats = Arc::clone(&self.stats);
            spawn_blocking(move || {
                let udp = udp.drain_all(|conversation| {
                    account_conversation(&processor, metrics.as_deref(), &stats, &conversation)
                });
                udp + recorder.drain_remaining()
            })
            .await?
        };

        let mut summaries = Vec::with_capacity(self.decoders.decoders.len());
        for decoder in &self.decoders.decoders {
            let (summary, records) = decoder.finalize();
            self.emitter.emit_all(records);
            summaries.push(summary);
        }

        let services = self.registry.snapshot();
        let service_count = services.len();
        self.emitter
            .emit_all(services.into_iter().map(AuditRecord::Service));
        self.emitter.flush();

        let snapshot = self.stats.snapshot();
        let (capture, capture_error) = match self.capture.lock().take() {
            Some((stats, err)) => (Some(stats), err),
            None => (None, None),
        };
        let processed = self.processor.stats();

        let report = FinalReport {
            packets: snapshot.packets,
            bytes: snapshot.bytes,
            elapsed: snapshot.elapsed,
            decoders: summaries,
            init_failures: self
                .decoders
                .init_failures
                .iter()
                .map(|(name, e)| (name.to_string(), e.to_string()))
                .collect(),
            errors: snapshot.errors,
            tcp_settings: self.driver.settings(),
            assembler: self.driver.assembler_stats(),
            submit_timeouts: self.driver.timeouts(),
            conversations: processed.conversations.load(Ordering::Relaxed) as usize,
            services: service_count,
            records: self.emitter.emitted(),
            capture,
            capture_error,
        };
        info!(
            packets = report.packets,
            conversations,
            services = report.services,
            records = report.records,
            errors = report.total_errors(),
            "Engine finalized"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use sparhund_core::flow::{NetworkFlow, TransportFlow};
    use sparhund_core::resolve::NoLookup;
    use std::net::IpAddr;

    fn config(root: &std::path::Path) -> SparhundConfig {
        let mut config = SparhundConfig::default();
        config.output.root = root.to_path_buf();
        config.capture.workers = 2;
        config
    }

    fn udp(from_client: bool, payload: &'static [u8], ts: i64, client: u8) -> CapturedPacket {
        let net = NetworkFlow::new(IpAddr::from([10, 0, 0, client]), IpAddr::from([10, 0, 0, 1]));
        let tr = TransportFlow::new(TransportProtocol::Udp, 5353, 53);
        let (network, transport) = if from_client {
            (net, tr)
        } else {
            (net.reverse(), tr.reverse())
        };
        CapturedPacket {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            network,
            transport,
            tcp: None,
            payload: Bytes::from_static(payload),
            wire_len: 42 + payload.len(),
            checksum_ok: None,
        }
    }

    #[tokio::test]
    async fn finalize_runs_once() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::builder(config(dir.path()))
            .lookup(Arc::new(NoLookup))
            .build()
            .unwrap();
        engine.handle_packet(udp(true, b"ping", 1, 5)).await;

        let report = engine.finalize().await.unwrap();
        assert_eq!(report.packets, 1);
        assert_eq!(report.conversations, 1);
        assert!(matches!(engine.finalize().await, Err(EngineError::Finalized)));
    }

    #[tokio::test]
    async fn flows_to_one_service_share_a_record() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(MemorySink::new());
        let engine = Arc::new(
            Engine::builder(config(dir.path()))
                .sink(sink.clone())
                .build()
                .unwrap(),
        );
        let packets = vec![
            udp(true, b"query-a", 1, 5),
            udp(true, b"query-b", 1, 6),
            udp(false, b"answer-a", 2, 5),
            udp(false, b"answer-b", 2, 6),
        ];

        let report = engine.run(Box::new(MemorySource::new(packets))).await.unwrap();
        assert_eq!(report.conversations, 2);
        assert_eq!(report.services, 1);

        let services: Vec<_> = sink
            .records()
            .into_iter()
            .filter_map(|r| match r {
                AuditRecord::Service(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].flows.len(), 2);
    }

    #[tokio::test]
    async fn bad_tcp_checksum_is_counted_and_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::builder(config(dir.path())).build().unwrap();
        let mut packet = udp(true, b"x", 1, 5);
        packet.transport = TransportFlow::new(TransportProtocol::Tcp, 40000, 80);
        packet.tcp = Some(Default::default());
        packet.checksum_ok = Some(false);
        engine.handle_packet(packet).await;

        let report = engine.finalize().await.unwrap();
        assert_eq!(report.errors["tcp checksum"], 1);
        assert_eq!(report.assembler.packets, 0);
    }
}
