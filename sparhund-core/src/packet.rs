//! Decoded packet representation shared by capture and engine.

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::conversation::Fragment;
use crate::flow::{FlowKey, NetworkFlow, TransportFlow, TransportProtocol};

/// TCP header fields the stream layer needs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TcpHeader {
    pub seq: u32,
    pub ack: u32,
    pub syn: bool,
    pub ack_flag: bool,
    pub fin: bool,
    pub rst: bool,
    pub psh: bool,
}

/// A captured TCP or UDP packet after link/network/transport decoding.
#[derive(Clone, Debug)]
pub struct CapturedPacket {
    pub timestamp: DateTime<Utc>,
    pub network: NetworkFlow,
    pub transport: TransportFlow,
    /// Present for TCP packets only.
    pub tcp: Option<TcpHeader>,
    /// Transport payload.
    pub payload: Bytes,
    /// Length of the frame as captured.
    pub wire_len: usize,
    /// Result of transport checksum verification, when it was performed.
    pub checksum_ok: Option<bool>,
}

impl CapturedPacket {
    #[inline]
    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(&self.network, &self.transport)
    }

    #[inline]
    pub fn protocol(&self) -> TransportProtocol {
        self.transport.protocol
    }

    /// The payload as a conversation fragment.
    pub fn fragment(&self) -> Fragment {
        Fragment {
            payload: self.payload.clone(),
            timestamp: self.timestamp,
            network: self.network,
            transport: self.transport,
        }
    }
}
