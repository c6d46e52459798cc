//! In-order pass-through assembler.
//!
//! Payloads are delivered in arrival order without sequence tracking. The
//! client is the SYN sender when the handshake was seen, otherwise the sender
//! of the first segment (if allowed).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use sparhund_core::flow::FlowKey;
use sparhund_core::packet::{CapturedPacket, TcpHeader};
use tracing::{debug, trace};

use super::{
    AssemblerStats, Direction, FlushCutoffs, FlushOutcome, StreamAssembler, StreamContext,
    StreamHandler,
};

#[derive(Debug)]
struct Connection {
    ctx: StreamContext,
    last_seen: DateTime<Utc>,
    client_fin: bool,
    server_fin: bool,
    closed: bool,
}

type SharedConnection = Arc<Mutex<Connection>>;

#[derive(Debug, Default)]
struct Counters {
    packets: AtomicU64,
    bytes: AtomicU64,
    connections: AtomicU64,
    closed: AtomicU64,
    rejected: AtomicU64,
}

pub struct PassthroughAssembler {
    connections: Mutex<HashMap<FlowKey, SharedConnection>>,
    handler: RwLock<Option<Arc<dyn StreamHandler>>>,
    allow_missing_init: bool,
    counters: Counters,
}

impl PassthroughAssembler {
    pub fn new(allow_missing_init: bool) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            handler: RwLock::new(None),
            allow_missing_init,
            counters: Counters::default(),
        }
    }

    pub fn open_connections(&self) -> usize {
        self.connections.lock().len()
    }

    fn handler(&self) -> Option<Arc<dyn StreamHandler>> {
        self.handler.read().clone()
    }

    /// Looks up the connection for a segment, opening one if the segment may
    /// start it.
    fn connection_for(&self, packet: &CapturedPacket, tcp: &TcpHeader) -> Option<SharedConnection> {
        let key = packet.flow_key();
        let mut connections = self.connections.lock();
        if let Some(conn) = connections.get(&key) {
            return Some(Arc::clone(conn));
        }

        let ctx = if tcp.syn && !tcp.ack_flag {
            StreamContext::new(packet.network, packet.transport, packet.timestamp)
        } else if tcp.syn {
            StreamContext::new(
                packet.network.reverse(),
                packet.transport.reverse(),
                packet.timestamp,
            )
        } else if tcp.rst {
            return None;
        } else if self.allow_missing_init {
            StreamContext::new(packet.network, packet.transport, packet.timestamp)
        } else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            trace!(flow = %key, "Rejecting segment without handshake");
            return None;
        };

        debug!(stream = %ctx.ident(), "Opening TCP connection");
        self.counters.connections.fetch_add(1, Ordering::Relaxed);
        let conn = Arc::new(Mutex::new(Connection {
            ctx,
            last_seen: packet.timestamp,
            client_fin: false,
            server_fin: false,
            closed: false,
        }));
        connections.insert(key, Arc::clone(&conn));
        Some(conn)
    }

    /// Removes a connection marked closed and notifies the handler. Must be
    /// called without the connection lock held.
    fn finish(&self, conn: &SharedConnection, ctx: &StreamContext) {
        {
            let mut connections = self.connections.lock();
            if connections
                .get(&ctx.key)
                .is_some_and(|current| Arc::ptr_eq(current, conn))
            {
                connections.remove(&ctx.key);
            }
        }
        self.counters.closed.fetch_add(1, Ordering::Relaxed);
        if let Some(handler) = self.handler() {
            handler.close(ctx);
        }
    }
}

impl StreamAssembler for PassthroughAssembler {
    fn register_handler(&self, handler: Arc<dyn StreamHandler>) {
        *self.handler.write() = Some(handler);
    }

    fn submit(&self, packet: &CapturedPacket) {
        let Some(tcp) = packet.tcp.as_ref() else {
            return;
        };
        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(packet.payload.len() as u64, Ordering::Relaxed);

        let Some(conn) = self.connection_for(packet, tcp) else {
            return;
        };

        let ctx = {
            let mut c = conn.lock();
            if c.closed {
                return;
            }
            c.last_seen = c.last_seen.max(packet.timestamp);
            let direction = c.ctx.direction_of(&packet.network, &packet.transport);

            if !packet.payload.is_empty() {
                if let Some(handler) = self.handler() {
                    handler.deliver(&c.ctx, direction, &packet.payload, packet.timestamp);
                }
            }

            if tcp.fin {
                match direction {
                    Direction::ClientToServer => c.client_fin = true,
                    Direction::ServerToClient => c.server_fin = true,
                }
            }
            if !(tcp.rst || (c.client_fin && c.server_fin)) {
                return;
            }
            c.closed = true;
            c.ctx.clone()
        };

        debug!(stream = %ctx.ident(), rst = tcp.rst, "TCP connection closed");
        self.finish(&conn, &ctx);
    }

    fn flush_older_than(&self, cutoffs: FlushCutoffs) -> FlushOutcome {
        let snapshot: Vec<SharedConnection> = self.connections.lock().values().cloned().collect();

        let mut outcome = FlushOutcome::default();
        let mut expired = Vec::new();
        for conn in snapshot {
            let mut c = conn.lock();
            if c.closed {
                continue;
            }
            if c.last_seen < cutoffs.close_before {
                c.closed = true;
                let ctx = c.ctx.clone();
                drop(c);
                expired.push((conn, ctx));
            } else if c.last_seen < cutoffs.flush_before {
                // nothing is ever held back, so flushing only counts
                outcome.flushed += 1;
            }
        }

        outcome.closed = expired.len();
        for (conn, ctx) in expired {
            debug!(stream = %ctx.ident(), "Closing idle TCP connection");
            self.finish(&conn, &ctx);
        }
        outcome
    }

    fn flush_all(&self) -> usize {
        let connections = std::mem::take(&mut *self.connections.lock());
        let handler = self.handler();
        let mut closed = 0;
        for conn in connections.into_values() {
            let ctx = {
                let mut c = conn.lock();
                if c.closed {
                    continue;
                }
                c.closed = true;
                c.ctx.clone()
            };
            closed += 1;
            self.counters.closed.fetch_add(1, Ordering::Relaxed);
            if let Some(handler) = &handler {
                handler.close(&ctx);
            }
        }
        closed
    }

    fn stats(&self) -> AssemblerStats {
        let c = &self.counters;
        AssemblerStats {
            packets: c.packets.load(Ordering::Relaxed),
            bytes: c.bytes.load(Ordering::Relaxed),
            connections: c.connections.load(Ordering::Relaxed),
            closed: c.closed.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use chrono::TimeZone;
    use sparhund_core::flow::{NetworkFlow, TransportFlow, TransportProtocol};
    use std::net::IpAddr;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Event {
        Data(String, Direction, Vec<u8>),
        Close(String),
    }

    #[derive(Default)]
    struct Recording(Mutex<Vec<Event>>);

    impl StreamHandler for Recording {
        fn deliver(&self, ctx: &StreamContext, direction: Direction, data: &[u8], _: DateTime<Utc>) {
            self.0.lock().push(Event::Data(ctx.ident(), direction, data.to_vec()));
        }

        fn close(&self, ctx: &StreamContext) {
            self.0.lock().push(Event::Close(ctx.ident()));
        }
    }

    struct Flags {
        syn: bool,
        ack: bool,
        fin: bool,
        rst: bool,
    }

    const DATA: Flags = Flags { syn: false, ack: true, fin: false, rst: false };
    const SYN: Flags = Flags { syn: true, ack: false, fin: false, rst: false };
    const SYN_ACK: Flags = Flags { syn: true, ack: true, fin: false, rst: false };
    const FIN: Flags = Flags { syn: false, ack: true, fin: true, rst: false };
    const RST: Flags = Flags { syn: false, ack: false, fin: false, rst: true };

    fn segment(from_client: bool, flags: Flags, payload: &'static [u8], ts: i64) -> CapturedPacket {
        let net = NetworkFlow::new(IpAddr::from([10, 0, 0, 5]), IpAddr::from([10, 0, 0, 1]));
        let tr = TransportFlow::new(TransportProtocol::Tcp, 40000, 80);
        let (network, transport) = if from_client {
            (net, tr)
        } else {
            (net.reverse(), tr.reverse())
        };
        CapturedPacket {
            timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
            network,
            transport,
            tcp: Some(TcpHeader {
                syn: flags.syn,
                ack_flag: flags.ack,
                fin: flags.fin,
                rst: flags.rst,
                ..Default::default()
            }),
            payload: Bytes::from_static(payload),
            wire_len: 54 + payload.len(),
            checksum_ok: None,
        }
    }

    fn assembler(allow_missing_init: bool) -> (PassthroughAssembler, Arc<Recording>) {
        let a = PassthroughAssembler::new(allow_missing_init);
        let rec = Arc::new(Recording::default());
        a.register_handler(rec.clone());
        (a, rec)
    }

    const CLIENT: &str = "10.0.0.5:40000->10.0.0.1:80";

    #[test]
    fn handshake_orients_and_fins_close_once() {
        let (a, rec) = assembler(false);
        a.submit(&segment(true, SYN, b"", 1));
        a.submit(&segment(false, SYN_ACK, b"", 1));
        a.submit(&segment(true, DATA, b"ping", 2));
        a.submit(&segment(false, DATA, b"pong", 2));
        a.submit(&segment(true, FIN, b"", 3));
        a.submit(&segment(false, FIN, b"", 3));
        a.submit(&segment(true, DATA, b"", 4));

        let events = rec.0.lock();
        assert_eq!(
            *events,
            vec![
                Event::Data(CLIENT.into(), Direction::ClientToServer, b"ping".to_vec()),
                Event::Data(CLIENT.into(), Direction::ServerToClient, b"pong".to_vec()),
                Event::Close(CLIENT.into()),
            ]
        );
        assert_eq!(a.stats().closed, 1);
        // the trailing ACK opened nothing: missing init is not allowed
        assert_eq!(a.open_connections(), 0);
        assert_eq!(a.stats().rejected, 1);
    }

    #[test]
    fn syn_ack_first_makes_receiver_the_client() {
        let (a, rec) = assembler(false);
        a.submit(&segment(false, SYN_ACK, b"", 1));
        a.submit(&segment(false, DATA, b"220 ready", 2));
        assert_eq!(
            rec.0.lock()[0],
            Event::Data(CLIENT.into(), Direction::ServerToClient, b"220 ready".to_vec())
        );
    }

    #[test]
    fn missing_init_follows_setting() {
        let (strict, rec) = assembler(false);
        strict.submit(&segment(true, DATA, b"x", 1));
        assert!(rec.0.lock().is_empty());
        assert_eq!(strict.stats().rejected, 1);

        let (lenient, rec) = assembler(true);
        lenient.submit(&segment(false, DATA, b"banner", 1));
        assert_eq!(
            rec.0.lock()[0],
            Event::Data("10.0.0.1:80->10.0.0.5:40000".into(), Direction::ClientToServer, b"banner".to_vec())
        );
    }

    #[test]
    fn rst_closes_and_unknown_rst_is_ignored() {
        let (a, rec) = assembler(true);
        a.submit(&segment(true, RST, b"", 1));
        assert_eq!(a.stats().connections, 0);

        a.submit(&segment(true, SYN, b"", 1));
        a.submit(&segment(false, RST, b"", 2));
        assert_eq!(*rec.0.lock(), vec![Event::Close(CLIENT.into())]);
    }

    #[test]
    fn idle_connections_flush_then_close() {
        let (a, rec) = assembler(true);
        a.submit(&segment(true, DATA, b"a", 100));

        let outcome = a.flush_older_than(FlushCutoffs::relative_to(
            Utc.timestamp_opt(170, 0).unwrap(),
            Duration::from_secs(60),
            Duration::from_secs(120),
        ));
        assert_eq!(outcome, FlushOutcome { flushed: 1, closed: 0 });

        let outcome = a.flush_older_than(FlushCutoffs::relative_to(
            Utc.timestamp_opt(230, 0).unwrap(),
            Duration::from_secs(60),
            Duration::from_secs(120),
        ));
        assert_eq!(outcome, FlushOutcome { flushed: 0, closed: 1 });
        assert_eq!(a.open_connections(), 0);
        assert!(matches!(rec.0.lock().last(), Some(Event::Close(_))));
    }

    #[test]
    fn flush_all_closes_everything() {
        let (a, rec) = assembler(true);
        a.submit(&segment(true, DATA, b"a", 1));
        a.submit(&segment(true, SYN, b"", 1));
        assert_eq!(a.flush_all(), 1);
        assert_eq!(a.flush_all(), 0);
        assert_eq!(rec.0.lock().len(), 2);
    }
}
