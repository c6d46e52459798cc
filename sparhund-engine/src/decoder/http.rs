//! ## sparhund-engine::decoder::http
//! **HTTP/1.x request/response pairing over reassembled streams**
//!
//! Client bytes are parsed into requests, which are stamped with the stream's
//! client and server addresses and queued. Each parsed response pops the
//! oldest queued request and the pair becomes an [`HttpRecord`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sparhund_core::flow::FlowKey;
use sparhund_protocols::http::header_values;
use sparhund_protocols::{
    decompress_gzip, detect_content_type, parse_cookie_header, parse_request, parse_response,
    parse_set_cookie, sanitize_commas, HttpCookie, HttpRequest, HttpResponse, Parsed,
};
use tracing::debug;

use super::{DecodeEvent, DecoderPlugin, ErrorReporter, Finalized, InitContext};
use crate::error::DecodeError;
use crate::record::{AuditRecord, HttpRecord};
use crate::stream::{Direction, StreamContext};

/// A parsed request waiting for its response.
#[derive(Debug)]
struct PendingRequest {
    request: HttpRequest,
    timestamp: DateTime<Utc>,
    src_ip: String,
    dst_ip: String,
    src_port: u16,
    dst_port: u16,
}

#[derive(Debug, Default)]
struct Exchange {
    client: Vec<u8>,
    server: Vec<u8>,
    pending: VecDeque<PendingRequest>,
    requests: u64,
    responses: u64,
}

/// Per-stream parser state, advanced only by deliveries.
#[derive(Debug)]
enum HttpStream {
    Exchanging(Exchange),
    /// Parsing failed after HTTP was seen; further bytes are ignored.
    Desynced { unanswered: usize },
    /// The stream never looked like HTTP.
    Ignored,
}

#[derive(Debug, Default)]
struct HttpCounters {
    requests: AtomicU64,
    responses: AtomicU64,
    matched: AtomicU64,
    unmatched_responses: AtomicU64,
    unanswered_requests: AtomicU64,
    gzip_failures: AtomicU64,
    ignored_streams: AtomicU64,
}

pub struct HttpDecoder {
    max_message_size: usize,
    streams: Mutex<HashMap<FlowKey, Arc<Mutex<HttpStream>>>>,
    counters: HttpCounters,
    reporter: ErrorReporter,
}

impl Default for HttpDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpDecoder {
    pub fn new() -> Self {
        Self {
            max_message_size: 10 * 1024 * 1024,
            streams: Mutex::new(HashMap::new()),
            counters: HttpCounters::default(),
            reporter: ErrorReporter::detached("http"),
        }
    }

    fn stream(&self, key: FlowKey) -> Arc<Mutex<HttpStream>> {
        let mut streams = self.streams.lock();
        Arc::clone(
            streams
                .entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(HttpStream::Exchanging(Exchange::default())))),
        )
    }

    fn on_data(
        &self,
        ctx: &StreamContext,
        direction: Direction,
        data: &[u8],
        timestamp: DateTime<Utc>,
    ) -> Vec<AuditRecord> {
        let stream = self.stream(ctx.key);
        let mut state = stream.lock();
        let HttpStream::Exchanging(exchange) = &mut *state else {
            return Vec::new();
        };

        let (records, failure) = match direction {
            Direction::ClientToServer => {
                exchange.client.extend_from_slice(data);
                (Vec::new(), self.read_requests(ctx, exchange, timestamp))
            }
            Direction::ServerToClient => {
                exchange.server.extend_from_slice(data);
                self.read_responses(exchange, false)
            }
        };

        if let Some(err) = failure {
            *state = self.abandon(ctx, exchange, err);
        }
        records
    }

    fn read_requests(
        &self,
        ctx: &StreamContext,
        exchange: &mut Exchange,
        timestamp: DateTime<Utc>,
    ) -> Option<DecodeError> {
        loop {
            match parse_request(&exchange.client, self.max_message_size) {
                Ok(Parsed::Complete { message, consumed }) => {
                    exchange.client.drain(..consumed);
                    exchange.requests += 1;
                    self.counters.requests.fetch_add(1, Ordering::Relaxed);
                    exchange.pending.push_back(PendingRequest {
                        request: message,
                        timestamp,
                        src_ip: ctx.network.src.to_string(),
                        dst_ip: ctx.network.dst.to_string(),
                        src_port: ctx.transport.src_port,
                        dst_port: ctx.transport.dst_port,
                    });
                }
                Ok(Parsed::Partial) => return None,
                Err(e) => return Some(DecodeError::malformed("http request", e)),
            }
        }
    }

    fn read_responses(
        &self,
        exchange: &mut Exchange,
        at_eof: bool,
    ) -> (Vec<AuditRecord>, Option<DecodeError>) {
        let mut records = Vec::new();
        while !exchange.server.is_empty() {
            let method = exchange.pending.front().map(|p| p.request.method.clone());
            let parsed = parse_response(
                &exchange.server,
                method.as_deref(),
                at_eof,
                self.max_message_size,
            );
            match parsed {
                Ok(Parsed::Complete { message, consumed }) => {
                    exchange.server.drain(..consumed);
                    if message.is_informational() {
                        debug!(status = message.status, "Skipping interim response");
                        continue;
                    }
                    exchange.responses += 1;
                    self.counters.responses.fetch_add(1, Ordering::Relaxed);
                    match exchange.pending.pop_front() {
                        Some(request) => {
                            self.counters.matched.fetch_add(1, Ordering::Relaxed);
                            records.push(AuditRecord::Http(self.pair(request, message)));
                        }
                        None => {
                            self.counters.unmatched_responses.fetch_add(1, Ordering::Relaxed);
                            debug!(status = message.status, "Dropping response without request");
                        }
                    }
                }
                Ok(Parsed::Partial) => break,
                Err(e) => return (records, Some(DecodeError::malformed("http response", e))),
            }
        }
        (records, None)
    }

    /// Next state after a parse failure.
    fn abandon(&self, ctx: &StreamContext, exchange: &Exchange, err: DecodeError) -> HttpStream {
        if exchange.requests == 0 && exchange.responses == 0 {
            self.counters.ignored_streams.fetch_add(1, Ordering::Relaxed);
            debug!(stream = %ctx.ident(), "Stream is not HTTP");
            return HttpStream::Ignored;
        }
        self.reporter.report(&err);
        HttpStream::Desynced {
            unanswered: exchange.pending.len(),
        }
    }

    fn on_close(&self, ctx: &StreamContext) -> Vec<AuditRecord> {
        let Some(stream) = self.streams.lock().remove(&ctx.key) else {
            return Vec::new();
        };
        let mut state = stream.lock();

        let (records, unanswered) = match &mut *state {
            HttpStream::Exchanging(exchange) => {
                // a response without framing ends with the connection
                let (records, failure) = self.read_responses(exchange, true);
                if let Some(err) = failure {
                    if exchange.requests > 0 || exchange.responses > 0 {
                        self.reporter.report(&err);
                    }
                }
                (records, exchange.pending.len())
            }
            HttpStream::Desynced { unanswered } => (Vec::new(), *unanswered),
            HttpStream::Ignored => (Vec::new(), 0),
        };

        if unanswered > 0 {
            self.counters
                .unanswered_requests
                .fetch_add(unanswered as u64, Ordering::Relaxed);
            debug!(stream = %ctx.ident(), unanswered, "Dropping unanswered requests");
        }
        records
    }

    fn pair(&self, pending: PendingRequest, response: HttpResponse) -> HttpRecord {
        let request = &pending.request;
        let req_encoding = request.header("Content-Encoding").unwrap_or_default();
        let res_encoding = response.header("Content-Encoding").unwrap_or_default();

        HttpRecord {
            timestamp: pending.timestamp,
            proto: request.proto(),
            method: request.method.clone(),
            host: request.host().to_string(),
            url: sanitize_commas(&request.target),
            user_agent: sanitize_commas(request.user_agent()),
            referer: sanitize_commas(request.referer()),
            src_ip: pending.src_ip,
            dst_ip: pending.dst_ip,
            src_port: pending.src_port,
            dst_port: pending.dst_port,

            req_content_length: request.content_length(),
            req_content_encoding: req_encoding.to_string(),
            content_type: request.header("Content-Type").unwrap_or_default().to_string(),
            content_type_detected: self.sniff(&request.body, req_encoding),
            req_cookies: header_values(&request.headers, "Cookie")
                .flat_map(parse_cookie_header)
                .collect(),

            status_code: response.status,
            server_name: response.header("Server").unwrap_or_default().to_string(),
            res_content_length: response
                .content_length()
                .unwrap_or(response.body.len() as u64),
            res_content_encoding: res_encoding.to_string(),
            res_content_type: response.header("Content-Type").unwrap_or_default().to_string(),
            res_content_type_detected: self.sniff(&response.body, res_encoding),
            res_cookies: header_values(&response.headers, "Set-Cookie")
                .filter_map(parse_set_cookie)
                .collect::<Vec<HttpCookie>>(),
        }
    }

    /// Content type of a body, looking through gzip when it decompresses.
    fn sniff(&self, body: &[u8], encoding: &str) -> String {
        let detected = detect_content_type(body);
        if !encoding.eq_ignore_ascii_case("gzip") {
            return detected.to_string();
        }
        match decompress_gzip(body) {
            Ok(plain) => detect_content_type(&plain).to_string(),
            Err(e) => {
                self.counters.gzip_failures.fetch_add(1, Ordering::Relaxed);
                self.reporter
                    .report(&DecodeError::malformed("http gzip", e));
                detected.to_string()
            }
        }
    }
}

impl DecoderPlugin for HttpDecoder {
    fn name(&self) -> &'static str {
        "http"
    }

    fn record_type(&self) -> &'static str {
        "HTTP"
    }

    fn post_init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), DecodeError> {
        self.max_message_size = ctx.config.decoders.http.max_message_size;
        self.reporter = ctx.reporter();
        ctx.subscribe_streams();
        Ok(())
    }

    fn decode(&self, event: &DecodeEvent<'_>) -> Result<Vec<AuditRecord>, DecodeError> {
        Ok(match event {
            DecodeEvent::StreamData {
                ctx,
                direction,
                data,
                timestamp,
            } => self.on_data(ctx, *direction, data, *timestamp),
            DecodeEvent::StreamClosed { ctx } => self.on_close(ctx),
            DecodeEvent::Packet(_) => Vec::new(),
        })
    }

    fn finalize(&self) -> Result<Finalized, DecodeError> {
        let leftover: Vec<_> = self.streams.lock().drain().map(|(_, s)| s).collect();
        for stream in leftover {
            let unanswered = match &*stream.lock() {
                HttpStream::Exchanging(exchange) => exchange.pending.len(),
                HttpStream::Desynced { unanswered } => *unanswered,
                HttpStream::Ignored => 0,
            };
            self.counters
                .unanswered_requests
                .fetch_add(unanswered as u64, Ordering::Relaxed);
        }

        let c = &self.counters;
        Ok(Finalized {
            records: Vec::new(),
            counters: vec![
                ("requests", c.requests.load(Ordering::Relaxed)),
                ("responses", c.responses.load(Ordering::Relaxed)),
                ("matched", c.matched.load(Ordering::Relaxed)),
                ("unmatched responses", c.unmatched_responses.load(Ordering::Relaxed)),
                ("unanswered requests", c.unanswered_requests.load(Ordering::Relaxed)),
                ("gzip failures", c.gzip_failures.load(Ordering::Relaxed)),
                ("non-HTTP streams", c.ignored_streams.load(Ordering::Relaxed)),
            ],
        })
    }
}
