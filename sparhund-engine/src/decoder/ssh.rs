//! SSH identification exchange, one record per stream.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sparhund_core::flow::FlowKey;
use sparhund_protocols::{parse_ident, SshIdent, SshParseError};
use tracing::debug;

use super::{DecodeEvent, DecoderPlugin, ErrorReporter, Finalized, InitContext};
use crate::error::DecodeError;
use crate::record::{AuditRecord, SshRecord};
use crate::stream::{Direction, StreamContext};

#[derive(Debug)]
enum Side {
    Waiting(Vec<u8>),
    Identified(SshIdent),
    Invalid,
}

impl Side {
    fn resolved(&self) -> bool {
        !matches!(self, Side::Waiting(_))
    }

    fn ident(&self) -> Option<&SshIdent> {
        match self {
            Side::Identified(ident) => Some(ident),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct SshStream {
    ctx: StreamContext,
    client: Side,
    server: Side,
    first_ident: Option<DateTime<Utc>>,
    done: bool,
}

impl SshStream {
    fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            client: Side::Waiting(Vec::new()),
            server: Side::Waiting(Vec::new()),
            first_ident: None,
            done: false,
        }
    }

    fn any_identified(&self) -> bool {
        self.client.ident().is_some() || self.server.ident().is_some()
    }
}

#[derive(Debug, Default)]
struct SshCounters {
    streams: AtomicU64,
    records: AtomicU64,
    non_ssh: AtomicU64,
}

pub struct SshDecoder {
    streams: Mutex<HashMap<FlowKey, Arc<Mutex<SshStream>>>>,
    counters: SshCounters,
    reporter: ErrorReporter,
}

impl Default for SshDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl SshDecoder {
    pub fn new() -> Self {
        Self {
            streams: Mutex::new(HashMap::new()),
            counters: SshCounters::default(),
            reporter: ErrorReporter::detached("ssh"),
        }
    }

    fn on_data(
        &self,
        ctx: &StreamContext,
        direction: Direction,
        data: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Option<AuditRecord> {
        let stream = {
            let mut streams = self.streams.lock();
            Arc::clone(streams.entry(ctx.key).or_insert_with(|| {
                self.counters.streams.fetch_add(1, Ordering::Relaxed);
                Arc::new(Mutex::new(SshStream::new(ctx.clone())))
            }))
        };
        let mut guard = stream.lock();
        let stream = &mut *guard;
        if stream.done {
            return None;
        }

        let side = match direction {
            Direction::ClientToServer => &mut stream.client,
            Direction::ServerToClient => &mut stream.server,
        };
        let Side::Waiting(buffered) = side else {
            return None;
        };
        buffered.extend_from_slice(data);

        match parse_ident(buffered) {
            Ok((ident, _)) => {
                *side = Side::Identified(ident);
                stream.first_ident.get_or_insert(timestamp);
            }
            Err(SshParseError::Incomplete) => return None,
            Err(SshParseError::NotSsh) => *side = Side::Invalid,
            Err(e @ SshParseError::TooLong) => {
                self.reporter.report(&DecodeError::malformed("ssh ident", e));
                *side = Side::Invalid;
            }
        }

        if !(stream.client.resolved() && stream.server.resolved()) {
            return None;
        }
        stream.done = true;
        if stream.any_identified() {
            Some(self.emit(stream))
        } else {
            self.counters.non_ssh.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    fn on_close(&self, ctx: &StreamContext) -> Option<AuditRecord> {
        let stream = self.streams.lock().remove(&ctx.key)?;
        let stream = stream.lock();
        if stream.done {
            return None;
        }
        if stream.any_identified() {
            Some(self.emit(&stream))
        } else {
            debug!(stream = %ctx.ident(), "Stream closed without SSH identification");
            self.counters.non_ssh.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    fn emit(&self, stream: &SshStream) -> AuditRecord {
        self.counters.records.fetch_add(1, Ordering::Relaxed);
        let ctx = &stream.ctx;
        let client = stream.client.ident();
        let server = stream.server.ident();
        AuditRecord::Ssh(SshRecord {
            timestamp: stream.first_ident.unwrap_or(ctx.first_seen),
            client_ip: ctx.network.src.to_string(),
            server_ip: ctx.network.dst.to_string(),
            client_port: ctx.transport.src_port,
            server_port: ctx.transport.dst_port,
            client_ident: client.map(SshIdent::line),
            server_ident: server.map(SshIdent::line),
            client_software: client.map(|i| i.software_version.clone()).unwrap_or_default(),
            server_software: server.map(|i| i.software_version.clone()).unwrap_or_default(),
        })
    }
}

impl DecoderPlugin for SshDecoder {
    fn name(&self) -> &'static str {
        "ssh"
    }

    fn record_type(&self) -> &'static str {
        "SSH"
    }

    fn post_init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), DecodeError> {
        self.reporter = ctx.reporter();
        ctx.subscribe_streams();
        Ok(())
    }

    fn decode(&self, event: &DecodeEvent<'_>) -> Result<Vec<AuditRecord>, DecodeError> {
        let record = match event {
            DecodeEvent::StreamData {
                ctx,
                direction,
                data,
                timestamp,
            } => self.on_data(ctx, *direction, data, *timestamp),
            DecodeEvent::StreamClosed { ctx } => self.on_close(ctx),
            DecodeEvent::Packet(_) => None,
        };
        Ok(record.into_iter().collect())
    }

    fn finalize(&self) -> Result<Finalized, DecodeError> {
        // streams never closed still report what they saw
        let open: Vec<_> = self.streams.lock().drain().map(|(_, s)| s).collect();
        let mut records = Vec::new();
        for stream in open {
            let stream = stream.lock();
            if stream.done {
                continue;
            }
            if stream.any_identified() {
                records.push(self.emit(&stream));
            } else {
                self.counters.non_ssh.fetch_add(1, Ordering::Relaxed);
            }
        }

        let c = &self.counters;
        Ok(Finalized {
            records,
            counters: vec![
                ("streams", c.streams.load(Ordering::Relaxed)),
                ("records", c.records.load(Ordering::Relaxed)),
                ("non-SSH streams", c.non_ssh.load(Ordering::Relaxed)),
            ],
        })
    }
}
