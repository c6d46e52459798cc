//! Collects reassembled TCP bytes into conversations.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use sparhund_core::conversation::{Conversation, Fragment};
use sparhund_core::pool::ConversationPool;
use sparhund_core::processor::ConversationProcessor;
use sparhund_core::service::RegistryOutcome;
use sparhund_telemetry::MetricsRecorder;

use super::{Direction, StreamContext, StreamHandler};
use crate::stats::SharedStats;

/// Runs a drained conversation through harvest, persist and register and
/// updates the counters. Persist failures are already logged by the
/// processor; here they are only counted.
pub(crate) fn account_conversation(
    processor: &ConversationProcessor,
    metrics: Option<&MetricsRecorder>,
    stats: &SharedStats,
    conversation: &Conversation,
) {
    match processor.process(conversation) {
        Ok(outcome) => {
            if let Some(metrics) = metrics {
                if outcome.saved.is_some() {
                    metrics.conversations_saved.inc();
                }
                if outcome.registry == RegistryOutcome::Created {
                    metrics.services.inc();
                }
            }
        }
        Err(_) => stats.record_error("conversation persist"),
    }
}

/// Buffers both directions of every TCP connection and processes the
/// conversation when the connection closes.
pub struct TcpConversationRecorder {
    pool: ConversationPool,
    processor: Arc<ConversationProcessor>,
    metrics: Option<Arc<MetricsRecorder>>,
    stats: Arc<SharedStats>,
}

impl TcpConversationRecorder {
    pub fn new(
        banner_size: usize,
        processor: Arc<ConversationProcessor>,
        metrics: Option<Arc<MetricsRecorder>>,
        stats: Arc<SharedStats>,
    ) -> Self {
        Self {
            pool: ConversationPool::new(banner_size),
            processor,
            metrics,
            stats,
        }
    }

    pub fn open_conversations(&self) -> usize {
        self.pool.len()
    }

    /// Processes whatever is still buffered. Returns the number of
    /// conversations produced.
    pub fn drain_remaining(&self) -> usize {
        self.pool.drain_all(|conversation| {
            account_conversation(
                &self.processor,
                self.metrics.as_deref(),
                &self.stats,
                &conversation,
            )
        })
    }
}

impl StreamHandler for TcpConversationRecorder {
    fn deliver(
        &self,
        ctx: &StreamContext,
        direction: Direction,
        data: &[u8],
        timestamp: DateTime<Utc>,
    ) {
        let (network, transport) = ctx.flows(direction);
        self.pool.ingest_with_client(
            ctx.key,
            Fragment {
                payload: Bytes::copy_from_slice(data),
                timestamp,
                network,
                transport,
            },
            ctx.flows(Direction::ClientToServer),
        );
    }

    fn close(&self, ctx: &StreamContext) {
        if let Some(conversation) = self.pool.drain_one(&ctx.key) {
            account_conversation(
                &self.processor,
                self.metrics.as_deref(),
                &self.stats,
                &conversation,
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparhund_core::flow::{NetworkFlow, TransportFlow, TransportProtocol};
    use sparhund_core::harvest::BannerHarvester;
    use sparhund_core::persist::ConnectionWriter;
    use sparhund_core::resolve::{NameLookup, NoLookup};
    use sparhund_core::service::ServiceRegistry;
    use sparhund_detection::ServiceProbes;
    use std::net::IpAddr;

    fn recorder(root: &std::path::Path) -> (TcpConversationRecorder, Arc<ServiceRegistry>) {
        let probes = Arc::new(ServiceProbes::with_defaults().unwrap());
        let lookup: Arc<dyn NameLookup> = Arc::new(NoLookup);
        let registry = Arc::new(ServiceRegistry::new(512, Arc::clone(&probes), Arc::clone(&lookup)));
        let processor = ConversationProcessor::new(
            BannerHarvester::new(probes, lookup),
            ConnectionWriter::new(root, ".bin", true),
            Arc::clone(&registry),
        );
        (
            TcpConversationRecorder::new(512, Arc::new(processor), None, Arc::new(SharedStats::new())),
            registry,
        )
    }

    #[test]
    fn server_speaking_first_keeps_handshake_client() {
        let dir = tempfile::tempdir().unwrap();
        let (rec, registry) = recorder(dir.path());
        let ctx = StreamContext::new(
            NetworkFlow::new(IpAddr::from([10, 0, 0, 5]), IpAddr::from([10, 0, 0, 1])),
            TransportFlow::new(TransportProtocol::Tcp, 40000, 22),
            Utc::now(),
        );

        rec.deliver(&ctx, Direction::ServerToClient, b"SSH-2.0-OpenSSH_9.6\r\n", Utc::now());
        rec.deliver(&ctx, Direction::ClientToServer, b"SSH-2.0-Go\r\n", Utc::now());
        assert_eq!(rec.open_conversations(), 1);
        rec.close(&ctx);
        assert_eq!(rec.open_conversations(), 0);

        let service = registry.get("10.0.0.1:22").unwrap();
        assert_eq!(service.protocol, "TCP");
        assert_eq!(service.banner, b"SSH-2.0-OpenSSH_9.6\r\n");
        assert_eq!(service.client_bytes, 12);
        assert!(dir
            .path()
            .join("tcp/ssh/10.0.0.5-40000--10.0.0.1-22.bin")
            .exists());
    }
}
