#![allow(dead_code)]

use std::net::IpAddr;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use sparhund_config::SparhundConfig;
use sparhund_core::flow::{NetworkFlow, TransportFlow, TransportProtocol};
use sparhund_core::packet::{CapturedPacket, TcpHeader};
use sparhund_engine::AuditRecord;

pub const CLIENT: [u8; 4] = [10, 0, 0, 5];
pub const SERVER: [u8; 4] = [10, 0, 0, 1];

pub fn config(root: &Path) -> SparhundConfig {
    let mut config = SparhundConfig::default();
    config.output.root = root.to_path_buf();
    config.capture.workers = 4;
    config
}

pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn flows(
    protocol: TransportProtocol,
    client_port: u16,
    server_port: u16,
    from_client: bool,
) -> (NetworkFlow, TransportFlow) {
    let net = NetworkFlow::new(IpAddr::from(CLIENT), IpAddr::from(SERVER));
    let tr = TransportFlow::new(protocol, client_port, server_port);
    if from_client {
        (net, tr)
    } else {
        (net.reverse(), tr.reverse())
    }
}

pub fn udp(from_client: bool, payload: &'static [u8], ts: i64) -> CapturedPacket {
    let (network, transport) = flows(TransportProtocol::Udp, 5353, 53, from_client);
    CapturedPacket {
        timestamp: at(ts),
        network,
        transport,
        tcp: None,
        payload: Bytes::from_static(payload),
        wire_len: 42 + payload.len(),
        checksum_ok: None,
    }
}

#[derive(Clone, Copy, Default)]
pub struct Flags {
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub rst: bool,
}

pub const SYN: Flags = Flags { syn: true, ack: false, fin: false, rst: false };
pub const SYN_ACK: Flags = Flags { syn: true, ack: true, fin: false, rst: false };
pub const ACK: Flags = Flags { syn: false, ack: true, fin: false, rst: false };
pub const FIN: Flags = Flags { syn: false, ack: true, fin: true, rst: false };

pub fn tcp(from_client: bool, flags: Flags, payload: &'static [u8], ts: i64) -> CapturedPacket {
    let (network, transport) = flows(TransportProtocol::Tcp, 41000, 80, from_client);
    CapturedPacket {
        timestamp: at(ts),
        network,
        transport,
        tcp: Some(TcpHeader {
            syn: flags.syn,
            ack_flag: flags.ack,
            fin: flags.fin,
            rst: flags.rst,
            psh: !payload.is_empty(),
            ..Default::default()
        }),
        payload: Bytes::from_static(payload),
        wire_len: 54 + payload.len(),
        checksum_ok: None,
    }
}

pub fn of_type(records: &[AuditRecord], record_type: &str) -> Vec<AuditRecord> {
    records
        .iter()
        .filter(|r| r.record_type() == record_type)
        .cloned()
        .collect()
}
