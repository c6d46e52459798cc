//! ## sparhund-core::flow
//! **Flow identity**
//!
//! Network and transport flow tuples, the direction-independent `FlowKey`
//! used to group packets of one conversation, and the textual identifiers
//! used in file names and records.

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportProtocol {
    Tcp,
    Udp,
}

impl TransportProtocol {
    /// Lower-case label used for directories and service lookups.
    pub fn label(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Udp => "udp",
        }
    }

    /// Upper-case label stored on service records.
    pub fn record_label(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Source and destination addresses of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NetworkFlow {
    pub src: IpAddr,
    pub dst: IpAddr,
}

impl NetworkFlow {
    pub fn new(src: IpAddr, dst: IpAddr) -> Self {
        Self { src, dst }
    }

    #[inline]
    pub fn reverse(&self) -> Self {
        Self {
            src: self.dst,
            dst: self.src,
        }
    }
}

/// Source and destination ports of a packet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransportFlow {
    pub protocol: TransportProtocol,
    pub src_port: u16,
    pub dst_port: u16,
}

impl TransportFlow {
    pub fn new(protocol: TransportProtocol, src_port: u16, dst_port: u16) -> Self {
        Self {
            protocol,
            src_port,
            dst_port,
        }
    }

    #[inline]
    pub fn reverse(&self) -> Self {
        Self {
            protocol: self.protocol,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

/// Direction-independent 64-bit conversation key.
///
/// Both directions of a conversation hash to the same key. Collisions are
/// possible and are treated as the same conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey(u64);

impl FlowKey {
    pub fn new(network: &NetworkFlow, transport: &TransportFlow) -> Self {
        let a = (network.src, transport.src_port);
        let b = (network.dst, transport.dst_port);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };

        let mut hasher = blake3::Hasher::new();
        hasher.update(&[transport.protocol as u8]);
        for (ip, port) in [lo, hi] {
            match ip {
                IpAddr::V4(v4) => hasher.update(&v4.octets()),
                IpAddr::V6(v6) => hasher.update(&v6.octets()),
            };
            hasher.update(&port.to_be_bytes());
        }

        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        Self(u64::from_le_bytes(head))
    }

    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Stable shard index in `0..shards`.
    #[inline]
    pub fn shard(&self, shards: usize) -> usize {
        (self.0 % shards.max(1) as u64) as usize
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0.to_be_bytes()))
    }
}

/// `src:sport->dst:dport` as seen from the given direction.
pub fn flow_ident(network: &NetworkFlow, transport: &TransportFlow) -> String {
    format!(
        "{}:{}->{}:{}",
        network.src, transport.src_port, network.dst, transport.dst_port
    )
}

/// `dst:dport`, the key of the service answering this flow.
pub fn service_ident(network: &NetworkFlow, transport: &TransportFlow) -> String {
    format!("{}:{}", network.dst, transport.dst_port)
}

/// File-system safe rendering of a flow ident.
pub fn sanitize_ident(ident: &str) -> String {
    ident.replace("->", "--").replace([':', '/', '\\'], "-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn udp(src: [u8; 4], sport: u16, dst: [u8; 4], dport: u16) -> (NetworkFlow, TransportFlow) {
        (
            NetworkFlow::new(IpAddr::from(src), IpAddr::from(dst)),
            TransportFlow::new(TransportProtocol::Udp, sport, dport),
        )
    }

    #[test]
    fn ident_format() {
        let (net, tr) = udp([10, 0, 0, 5], 5353, [10, 0, 0, 1], 53);
        assert_eq!(flow_ident(&net, &tr), "10.0.0.5:5353->10.0.0.1:53");
        assert_eq!(service_ident(&net, &tr), "10.0.0.1:53");
        assert_eq!(
            sanitize_ident(&flow_ident(&net, &tr)),
            "10.0.0.5-5353--10.0.0.1-53"
        );
    }

    #[test]
    fn key_ignores_direction() {
        let (net, tr) = udp([10, 0, 0, 5], 5353, [10, 0, 0, 1], 53);
        assert_eq!(
            FlowKey::new(&net, &tr),
            FlowKey::new(&net.reverse(), &tr.reverse())
        );
    }

    #[test]
    fn key_separates_conversations() {
        let (net, tr) = udp([10, 0, 0, 5], 5353, [10, 0, 0, 1], 53);
        let (net2, tr2) = udp([10, 0, 0, 6], 5353, [10, 0, 0, 1], 53);
        assert_ne!(FlowKey::new(&net, &tr), FlowKey::new(&net2, &tr2));

        let tcp = TransportFlow::new(TransportProtocol::Tcp, 5353, 53);
        assert_ne!(FlowKey::new(&net, &tr), FlowKey::new(&net, &tcp));

        // swapping ports alone is a different conversation
        assert_ne!(FlowKey::new(&net, &tr), FlowKey::new(&net, &tr.reverse()));
    }

    #[test]
    fn display_is_hex() {
        let (net, tr) = udp([1, 2, 3, 4], 1, [4, 3, 2, 1], 2);
        let rendered = FlowKey::new(&net, &tr).to_string();
        assert_eq!(rendered.len(), 16);
        assert!(rendered.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest! {
        #[test]
        fn key_is_symmetric(a in any::<[u8; 4]>(), b in any::<[u8; 4]>(), p in any::<u16>(), q in any::<u16>()) {
            let (net, tr) = udp(a, p, b, q);
            prop_assert_eq!(FlowKey::new(&net, &tr), FlowKey::new(&net.reverse(), &tr.reverse()));
            prop_assert!(FlowKey::new(&net, &tr).shard(7) < 7);
        }
    }
}
