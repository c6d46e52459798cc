//! ## sparhund-core::conversation
//! **Conversation buffers**
//!
//! A buffer collects the payload fragments of one conversation in arrival
//! order. Draining it sorts the fragments by capture time, splits the bytes
//! into client and server directions and produces a [`Conversation`].

use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::flow::{flow_ident, service_ident, NetworkFlow, TransportFlow, TransportProtocol};

pub const ANSI_RED: &[u8] = b"\x1b[0;31m";
pub const ANSI_BLUE: &[u8] = b"\x1b[0;34m";
pub const ANSI_RESET: &[u8] = b"\x1b[0m";

/// One payload as seen on the wire.
#[derive(Clone, Debug)]
pub struct Fragment {
    pub payload: Bytes,
    pub timestamp: DateTime<Utc>,
    pub network: NetworkFlow,
    pub transport: TransportFlow,
}

/// Append-only fragment collection for one conversation.
///
/// The client is the sender of the first inserted fragment unless it was
/// fixed explicitly (e.g. from a TCP handshake). Under mid-stream capture the
/// first packet seen may come from the server; the roles are then swapped.
#[derive(Debug, Default)]
pub struct ConversationBuffer {
    fragments: Vec<Fragment>,
    client: Option<(NetworkFlow, TransportFlow)>,
}

impl ConversationBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer whose client direction is known up front.
    pub fn with_client(network: NetworkFlow, transport: TransportFlow) -> Self {
        Self {
            fragments: Vec::new(),
            client: Some((network, transport)),
        }
    }

    pub fn push(&mut self, fragment: Fragment) {
        if self.client.is_none() {
            self.client = Some((fragment.network, fragment.transport));
        }
        self.fragments.push(fragment);
    }

    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Empties the buffer into a [`Conversation`]. Returns `None` when no
    /// fragment was ever appended.
    pub fn drain(&mut self, banner_size: usize) -> Option<Conversation> {
        if self.fragments.is_empty() {
            return None;
        }
        let (client_network, client_transport) = self.client?;

        let mut fragments = std::mem::take(&mut self.fragments);
        fragments.sort_by_key(|f| f.timestamp);

        let total: usize = fragments.iter().map(|f| f.payload.len()).sum();
        let mut conv = Conversation {
            protocol: client_transport.protocol,
            ident: flow_ident(&client_network, &client_transport),
            service_ident: service_ident(&client_network, &client_transport),
            first_seen: fragments[0].timestamp,
            client_network,
            client_transport,
            raw: Vec::with_capacity(total),
            colored: Vec::with_capacity(total + fragments.len() * 12),
            banner: Vec::with_capacity(banner_size.min(total)),
            client_bytes: 0,
            server_bytes: 0,
            fragments: fragments.len(),
        };

        for fragment in &fragments {
            let data = &fragment.payload[..];
            let from_client =
                fragment.transport == client_transport && fragment.network == client_network;
            if from_client {
                conv.client_bytes += data.len();
                conv.colored.extend_from_slice(ANSI_RED);
            } else {
                conv.server_bytes += data.len();
                let room = banner_size.saturating_sub(conv.banner.len());
                conv.banner
                    .extend_from_slice(&data[..room.min(data.len())]);
                conv.colored.extend_from_slice(ANSI_BLUE);
            }
            conv.raw.extend_from_slice(data);
            conv.colored.extend_from_slice(data);
            conv.colored.extend_from_slice(ANSI_RESET);
        }

        Some(conv)
    }
}

/// A drained conversation, ready to be harvested, persisted and registered.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub protocol: TransportProtocol,
    /// `client:port->server:port`.
    pub ident: String,
    /// `server:port`.
    pub service_ident: String,
    pub first_seen: DateTime<Utc>,
    pub client_network: NetworkFlow,
    pub client_transport: TransportFlow,
    /// Both directions in capture order.
    pub raw: Vec<u8>,
    /// Same bytes, client red and server blue.
    pub colored: Vec<u8>,
    /// Up to `banner_size` leading server bytes.
    pub banner: Vec<u8>,
    pub client_bytes: usize,
    pub server_bytes: usize,
    pub fragments: usize,
}
