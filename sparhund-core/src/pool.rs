//! ## sparhund-core::pool
//! **Concurrent conversation pool**
//!
//! Maps a [`FlowKey`] to the buffer collecting that conversation. The map
//! lock is held only to look up or create a buffer; appends take the
//! per-buffer lock. Locks are always acquired map first, then buffer, and
//! never two buffers at once.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::conversation::{Conversation, ConversationBuffer, Fragment};
use crate::flow::{FlowKey, NetworkFlow, TransportFlow};

type SharedBuffer = Arc<Mutex<ConversationBuffer>>;

pub struct ConversationPool {
    buffers: Mutex<HashMap<FlowKey, SharedBuffer>>,
    banner_size: usize,
}

impl ConversationPool {
    pub fn new(banner_size: usize) -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            banner_size,
        }
    }

    /// Appends a fragment, creating the buffer on first sight.
    #[inline]
    pub fn ingest(&self, key: FlowKey, fragment: Fragment) {
        self.ingest_inner(key, fragment, None)
    }

    /// Like [`ingest`](Self::ingest), but a newly created buffer treats the
    /// given direction as the client.
    pub fn ingest_with_client(
        &self,
        key: FlowKey,
        fragment: Fragment,
        client: (NetworkFlow, TransportFlow),
    ) {
        self.ingest_inner(key, fragment, Some(client))
    }

    fn ingest_inner(
        &self,
        key: FlowKey,
        fragment: Fragment,
        client: Option<(NetworkFlow, TransportFlow)>,
    ) {
        let mut buffers = self.buffers.lock();
        match buffers.get(&key) {
            Some(buffer) => {
                let buffer = Arc::clone(buffer);
                drop(buffers);
                buffer.lock().push(fragment);
            }
            None => {
                // first fragment goes in under the map lock so it is the
                // first one any reader of this buffer can observe
                let mut buffer = match client {
                    Some((network, transport)) => ConversationBuffer::with_client(network, transport),
                    None => ConversationBuffer::new(),
                };
                buffer.push(fragment);
                buffers.insert(key, Arc::new(Mutex::new(buffer)));
            }
        }
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Removes and drains a single conversation.
    pub fn drain_one(&self, key: &FlowKey) -> Option<Conversation> {
        let buffer = self.buffers.lock().remove(key)?;
        let conversation = buffer.lock().drain(self.banner_size);
        conversation
    }

    /// Drains every buffer, handing each non-empty conversation to `sink`.
    ///
    /// The pool is empty afterwards. Returns the number of conversations
    /// produced.
    pub fn drain_all<F>(&self, mut sink: F) -> usize
    where
        F: FnMut(Conversation),
    {
        let buffers = std::mem::take(&mut *self.buffers.lock());
        let mut produced = 0;
        for (key, buffer) in buffers {
            let conversation = buffer.lock().drain(self.banner_size);
            match conversation {
                Some(conversation) => {
                    produced += 1;
                    sink(conversation);
                }
                None => debug!(flow = %key, "Skipping empty conversation"),
            }
        }
        produced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::TransportProtocol;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;
    use std::net::IpAddr;
    use std::thread;

    fn fragment(payload: Vec<u8>, ts: i64, from_client: bool, conv: u8) -> (FlowKey, Fragment) {
        let net = NetworkFlow::new(IpAddr::from([10, 0, 0, conv]), IpAddr::from([10, 0, 0, 1]));
        let tr = TransportFlow::new(TransportProtocol::Udp, 40000, 53);
        let (network, transport) = if from_client {
            (net, tr)
        } else {
            (net.reverse(), tr.reverse())
        };
        (
            FlowKey::new(&network, &transport),
            Fragment {
                payload: Bytes::from(payload),
                timestamp: Utc.timestamp_opt(ts, 0).unwrap(),
                network,
                transport,
            },
        )
    }

    #[test]
    fn both_directions_share_a_buffer() {
        let pool = ConversationPool::new(512);
        let (k1, f1) = fragment(b"hello".to_vec(), 1, true, 5);
        let (k2, f2) = fragment(b"world!".to_vec(), 2, false, 5);
        pool.ingest(k1, f1);
        pool.ingest(k2, f2);
        assert_eq!(pool.len(), 1);

        let mut out = Vec::new();
        assert_eq!(pool.drain_all(|c| out.push(c)), 1);
        assert!(pool.is_empty());
        assert_eq!(out[0].client_bytes, 5);
        assert_eq!(out[0].server_bytes, 6);
    }

    #[test]
    fn drain_one_removes_only_that_conversation() {
        let pool = ConversationPool::new(512);
        let (k1, f1) = fragment(b"a".to_vec(), 1, true, 5);
        let (k2, f2) = fragment(b"b".to_vec(), 1, true, 6);
        pool.ingest(k1, f1);
        pool.ingest(k2, f2);

        let conv = pool.drain_one(&k1).unwrap();
        assert_eq!(conv.raw, b"a");
        assert!(pool.drain_one(&k1).is_none());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn concurrent_ingest_keeps_every_byte() {
        let pool = Arc::new(ConversationPool::new(512));
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    for i in 0..200i64 {
                        // four conversations, each fed from two threads
                        let (k, f) = fragment(vec![t; 3], i * 8 + t as i64, t % 2 == 0, 10 + t / 2);
                        pool.ingest(k, f);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let mut total = 0;
        let produced = pool.drain_all(|c| {
            assert_eq!(c.fragments, 400);
            total += c.client_bytes + c.server_bytes;
        });
        assert_eq!(produced, 4);
        assert_eq!(total, 8 * 200 * 3);
    }

    proptest! {
        #[test]
        fn drained_bytes_are_sorted_and_complete(
            items in proptest::collection::vec((0i64..1_000, any::<bool>(), 1usize..16), 1..64)
        ) {
            let pool = ConversationPool::new(64);
            let mut expected: Vec<(i64, usize, Vec<u8>)> = Vec::new();
            for (idx, (ts, from_client, len)) in items.iter().enumerate() {
                let payload = vec![(idx % 251) as u8; *len];
                expected.push((*ts, idx, payload.clone()));
                let (k, f) = fragment(payload, *ts, *from_client, 9);
                pool.ingest(k, f);
            }
            // stable sort by timestamp, ties keep insertion order
            expected.sort_by_key(|(ts, idx, _)| (*ts, *idx));
            let expected_raw: Vec<u8> = expected.into_iter().flat_map(|(_, _, p)| p).collect();

            let mut convs = Vec::new();
            pool.drain_all(|c| convs.push(c));
            prop_assert_eq!(convs.len(), 1);
            let conv = &convs[0];
            prop_assert_eq!(conv.client_bytes + conv.server_bytes, expected_raw.len());
            prop_assert_eq!(&conv.raw, &expected_raw);
            prop_assert!(conv.banner.len() <= 64);
        }
    }
}
