//! Link, network and transport decoding of captured frames.

use std::net::IpAddr;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use etherparse::{NetSlice, SlicedPacket, TransportSlice};
use tracing::trace;

use sparhund_core::flow::{NetworkFlow, TransportFlow, TransportProtocol};
use sparhund_core::packet::{CapturedPacket, TcpHeader};

/// Link layer of a capture, derived from the pcap datalink type.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// Frames start directly with the IP header.
    RawIp,
    /// BSD loopback with a 4 byte family header.
    Null,
    /// Linux cooked capture v1.
    LinuxSll,
}

impl LinkLayer {
    pub fn from_datalink(linktype: pcap::Linktype) -> Self {
        match linktype.0 {
            0 | 108 => LinkLayer::Null,
            12 | 14 | 101 => LinkLayer::RawIp,
            113 => LinkLayer::LinuxSll,
            _ => LinkLayer::Ethernet,
        }
    }

    fn header_len(self) -> usize {
        match self {
            LinkLayer::Ethernet | LinkLayer::RawIp => 0,
            LinkLayer::Null => 4,
            LinkLayer::LinuxSll => 16,
        }
    }
}

/// Decodes one frame into a TCP or UDP packet.
///
/// Anything else (ARP, ICMP, non-initial IP fragments, truncated frames)
/// yields `None`. With `verify_checksum` the transport checksum is computed
/// and reported in [`CapturedPacket::checksum_ok`].
pub fn decode_frame(
    link: LinkLayer,
    data: &[u8],
    timestamp: DateTime<Utc>,
    verify_checksum: bool,
) -> Option<CapturedPacket> {
    let frame = data.get(link.header_len()..)?;
    let sliced = match link {
        LinkLayer::Ethernet => SlicedPacket::from_ethernet(frame),
        _ => SlicedPacket::from_ip(frame),
    };
    let sliced = match sliced {
        Ok(sliced) => sliced,
        Err(e) => {
            trace!(error = %e, "Skipping undecodable frame");
            return None;
        }
    };

    let (src, dst) = match &sliced.net {
        Some(NetSlice::Ipv4(ip)) => (
            IpAddr::V4(ip.header().source_addr()),
            IpAddr::V4(ip.header().destination_addr()),
        ),
        Some(NetSlice::Ipv6(ip)) => (
            IpAddr::V6(ip.header().source_addr()),
            IpAddr::V6(ip.header().destination_addr()),
        ),
        _ => return None,
    };
    let network = NetworkFlow::new(src, dst);

    let (transport, tcp, payload, checksum_ok) = match &sliced.transport {
        Some(TransportSlice::Tcp(segment)) => {
            let header = TcpHeader {
                seq: segment.sequence_number(),
                ack: segment.acknowledgment_number(),
                syn: segment.syn(),
                ack_flag: segment.ack(),
                fin: segment.fin(),
                rst: segment.rst(),
                psh: segment.psh(),
            };
            let checksum_ok = verify_checksum.then(|| {
                let expected = segment.checksum();
                let header = segment.to_header();
                let computed = match (src, dst) {
                    (IpAddr::V4(s), IpAddr::V4(d)) => {
                        header.calc_checksum_ipv4_raw(s.octets(), d.octets(), segment.payload())
                    }
                    (IpAddr::V6(s), IpAddr::V6(d)) => {
                        header.calc_checksum_ipv6_raw(s.octets(), d.octets(), segment.payload())
                    }
                    _ => return false,
                };
                computed.map(|c| c == expected).unwrap_or(false)
            });
            (
                TransportFlow::new(
                    TransportProtocol::Tcp,
                    segment.source_port(),
                    segment.destination_port(),
                ),
                Some(header),
                segment.payload(),
                checksum_ok,
            )
        }
        Some(TransportSlice::Udp(datagram)) => {
            let checksum_ok = verify_checksum.then(|| {
                let expected = datagram.checksum();
                // zero means the sender skipped the checksum (IPv4 only)
                if expected == 0 && src.is_ipv4() {
                    return true;
                }
                let header = datagram.to_header();
                let computed = match (src, dst) {
                    (IpAddr::V4(s), IpAddr::V4(d)) => {
                        header.calc_checksum_ipv4_raw(s.octets(), d.octets(), datagram.payload())
                    }
                    (IpAddr::V6(s), IpAddr::V6(d)) => {
                        header.calc_checksum_ipv6_raw(s.octets(), d.octets(), datagram.payload())
                    }
                    _ => return false,
                };
                computed.map(|c| c == expected).unwrap_or(false)
            });
            (
                TransportFlow::new(
                    TransportProtocol::Udp,
                    datagram.source_port(),
                    datagram.destination_port(),
                ),
                None,
                datagram.payload(),
                checksum_ok,
            )
        }
        _ => return None,
    };

    Some(CapturedPacket {
        timestamp,
        network,
        transport,
        tcp,
        payload: Bytes::copy_from_slice(payload),
        wire_len: data.len(),
        checksum_ok,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use etherparse::PacketBuilder;

    fn udp_frame(payload: &[u8]) -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv4([10, 0, 0, 5], [10, 0, 0, 1], 64)
            .udp(5353, 53);
        let mut frame = Vec::with_capacity(builder.size(payload.len()));
        builder.write(&mut frame, payload).unwrap();
        frame
    }

    fn tcp_syn_frame() -> Vec<u8> {
        let builder = PacketBuilder::ethernet2([1, 2, 3, 4, 5, 6], [6, 5, 4, 3, 2, 1])
            .ipv6(
                [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1],
                [0x20, 0x01, 0x0d, 0xb8, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 2],
                64,
            )
            .tcp(40000, 22, 1000, 64240)
            .syn();
        let mut frame = Vec::with_capacity(builder.size(0));
        builder.write(&mut frame, &[]).unwrap();
        frame
    }

    #[test]
    fn decodes_udp_over_ethernet() {
        let frame = udp_frame(b"hello");
        let packet = decode_frame(LinkLayer::Ethernet, &frame, Utc::now(), true).unwrap();

        assert_eq!(packet.network.src, IpAddr::from([10, 0, 0, 5]));
        assert_eq!(packet.network.dst, IpAddr::from([10, 0, 0, 1]));
        assert_eq!(packet.transport.protocol, TransportProtocol::Udp);
        assert_eq!(packet.transport.src_port, 5353);
        assert_eq!(packet.transport.dst_port, 53);
        assert_eq!(&packet.payload[..], b"hello");
        assert_eq!(packet.wire_len, frame.len());
        assert!(packet.tcp.is_none());
        assert_eq!(packet.checksum_ok, Some(true));
    }

    #[test]
    fn corrupted_checksum_is_reported() {
        let mut frame = udp_frame(b"hello");
        let last = frame.len() - 1;
        frame[last] ^= 0xff;
        let packet = decode_frame(LinkLayer::Ethernet, &frame, Utc::now(), true).unwrap();
        assert_eq!(packet.checksum_ok, Some(false));

        let unchecked = decode_frame(LinkLayer::Ethernet, &frame, Utc::now(), false).unwrap();
        assert_eq!(unchecked.checksum_ok, None);
    }

    #[test]
    fn decodes_tcp_flags_over_ipv6() {
        let frame = tcp_syn_frame();
        let packet = decode_frame(LinkLayer::Ethernet, &frame, Utc::now(), true).unwrap();
        let tcp = packet.tcp.unwrap();

        assert!(tcp.syn);
        assert!(!tcp.fin && !tcp.rst);
        assert_eq!(tcp.seq, 1000);
        assert_eq!(packet.transport.dst_port, 22);
        assert!(packet.payload.is_empty());
        assert_eq!(packet.checksum_ok, Some(true));
    }

    #[test]
    fn raw_ip_and_null_links() {
        let frame = udp_frame(b"x");
        let ip = &frame[14..];
        assert!(decode_frame(LinkLayer::RawIp, ip, Utc::now(), false).is_some());

        let mut null = vec![2, 0, 0, 0];
        null.extend_from_slice(ip);
        assert!(decode_frame(LinkLayer::Null, &null, Utc::now(), false).is_some());
    }

    #[test]
    fn garbage_is_skipped() {
        assert!(decode_frame(LinkLayer::Ethernet, &[0u8; 6], Utc::now(), false).is_none());
        assert!(decode_frame(LinkLayer::LinuxSll, &[0u8; 3], Utc::now(), false).is_none());
    }

    #[test]
    fn datalink_mapping() {
        assert_eq!(LinkLayer::from_datalink(pcap::Linktype(1)), LinkLayer::Ethernet);
        assert_eq!(LinkLayer::from_datalink(pcap::Linktype(101)), LinkLayer::RawIp);
        assert_eq!(LinkLayer::from_datalink(pcap::Linktype(0)), LinkLayer::Null);
        assert_eq!(LinkLayer::from_datalink(pcap::Linktype(113)), LinkLayer::LinuxSll);
    }
}
