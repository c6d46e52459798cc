//! ## sparhund-engine::stream
//! **TCP stream delivery**
//!
//! An assembler turns TCP segments into ordered per-direction bytes and
//! hands them to a registered [`StreamHandler`]. The engine only talks to
//! the [`StreamAssembler`] trait; [`PassthroughAssembler`] is the built-in
//! implementation and [`TcpStreamDriver`] wraps submission with a deadline
//! and periodic flushing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sparhund_core::flow::{flow_ident, FlowKey, NetworkFlow, TransportFlow};
use sparhund_core::packet::CapturedPacket;

mod driver;
mod fanout;
mod passthrough;
mod recorder;

pub use driver::TcpStreamDriver;
pub use fanout::StreamFanout;
pub use passthrough::PassthroughAssembler;
pub use recorder::TcpConversationRecorder;
pub(crate) use recorder::account_conversation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToServer,
    ServerToClient,
}

/// Identity of a TCP connection, oriented client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamContext {
    pub key: FlowKey,
    pub network: NetworkFlow,
    pub transport: TransportFlow,
    pub first_seen: DateTime<Utc>,
}

impl StreamContext {
    pub fn new(network: NetworkFlow, transport: TransportFlow, first_seen: DateTime<Utc>) -> Self {
        Self {
            key: FlowKey::new(&network, &transport),
            network,
            transport,
            first_seen,
        }
    }

    /// Whether a packet with these flows travels client to server.
    pub fn direction_of(&self, network: &NetworkFlow, transport: &TransportFlow) -> Direction {
        if *network == self.network && *transport == self.transport {
            Direction::ClientToServer
        } else {
            Direction::ServerToClient
        }
    }

    /// Network and transport flow of bytes travelling in `direction`.
    pub fn flows(&self, direction: Direction) -> (NetworkFlow, TransportFlow) {
        match direction {
            Direction::ClientToServer => (self.network, self.transport),
            Direction::ServerToClient => (self.network.reverse(), self.transport.reverse()),
        }
    }

    pub fn ident(&self) -> String {
        flow_ident(&self.network, &self.transport)
    }
}

/// Receives reassembled bytes. Calls for one connection never overlap.
pub trait StreamHandler: Send + Sync {
    fn deliver(
        &self,
        ctx: &StreamContext,
        direction: Direction,
        data: &[u8],
        timestamp: DateTime<Utc>,
    );

    /// The connection ended: FIN/RST, flush timeout or final flush.
    fn close(&self, ctx: &StreamContext);
}

/// Time-window for a periodic flush, relative to the current packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlushCutoffs {
    /// Connections idle since before this are flushed.
    pub flush_before: DateTime<Utc>,
    /// Connections idle since before this are closed.
    pub close_before: DateTime<Utc>,
}

impl FlushCutoffs {
    pub fn relative_to(reference: DateTime<Utc>, timeout: Duration, close_timeout: Duration) -> Self {
        Self {
            flush_before: subtract(reference, timeout),
            close_before: subtract(reference, close_timeout),
        }
    }
}

fn subtract(reference: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(window)
        .ok()
        .and_then(|w| reference.checked_sub_signed(w))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FlushOutcome {
    pub flushed: usize,
    pub closed: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AssemblerStats {
    pub packets: u64,
    pub bytes: u64,
    pub connections: u64,
    pub closed: u64,
    /// Segments dropped because their connection had no handshake.
    pub rejected: u64,
}

pub trait StreamAssembler: Send + Sync {
    fn register_handler(&self, handler: Arc<dyn StreamHandler>);

    /// Feeds one segment. May call into the handler before returning.
    fn submit(&self, packet: &CapturedPacket);

    fn flush_older_than(&self, cutoffs: FlushCutoffs) -> FlushOutcome;

    /// Closes every connection; returns how many were closed.
    fn flush_all(&self) -> usize;

    fn stats(&self) -> AssemblerStats;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sparhund_core::flow::TransportProtocol;
    use std::net::IpAddr;

    #[test]
    fn cutoffs_are_relative_to_packet_time() {
        let t = Utc.timestamp_opt(1_000, 0).unwrap();
        let c = FlushCutoffs::relative_to(t, Duration::from_secs(60), Duration::from_secs(120));
        assert_eq!(c.flush_before.timestamp(), 940);
        assert_eq!(c.close_before.timestamp(), 880);
    }

    #[test]
    fn context_orients_directions() {
        let net = NetworkFlow::new(IpAddr::from([10, 0, 0, 5]), IpAddr::from([10, 0, 0, 1]));
        let tr = TransportFlow::new(TransportProtocol::Tcp, 40000, 80);
        let ctx = StreamContext::new(net, tr, Utc::now());

        assert_eq!(ctx.direction_of(&net, &tr), Direction::ClientToServer);
        assert_eq!(
            ctx.direction_of(&net.reverse(), &tr.reverse()),
            Direction::ServerToClient
        );
        assert_eq!(ctx.flows(Direction::ServerToClient).1.src_port, 80);
        assert_eq!(ctx.ident(), "10.0.0.5:40000->10.0.0.1:80");
    }
}
