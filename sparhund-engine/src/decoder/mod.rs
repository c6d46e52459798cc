//! ## sparhund-engine::decoder
//! **Decoder lifecycle framework**
//!
//! Every protocol plugin implements [`DecoderPlugin`] and is wrapped in a
//! [`CustomDecoder`], which owns the shared counters, routes errors by
//! [`ErrorKind`] and guards the post-init, decode, finalize lifecycle. The
//! list of decoders is built once by [`DecoderRegistry`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use sparhund_config::SparhundConfig;
use sparhund_core::packet::CapturedPacket;
use sparhund_telemetry::MetricsRecorder;
use tracing::{debug, error, info, warn};

use crate::error::{DecodeError, ErrorKind};
use crate::record::AuditRecord;
use crate::stats::SharedStats;
use crate::stream::{Direction, StreamContext};

pub mod http;
pub mod ssh;

pub use http::HttpDecoder;
pub use ssh::SshDecoder;

/// Input to [`DecoderPlugin::decode`].
#[derive(Debug, Clone, Copy)]
pub enum DecodeEvent<'a> {
    /// A single captured packet, for decoders that did not subscribe to streams.
    Packet(&'a CapturedPacket),
    /// Ordered bytes of one direction of a TCP stream.
    StreamData {
        ctx: &'a StreamContext,
        direction: Direction,
        data: &'a [u8],
        timestamp: DateTime<Utc>,
    },
    StreamClosed { ctx: &'a StreamContext },
}

/// What a plugin hands back at shutdown.
#[derive(Debug, Default)]
pub struct Finalized {
    /// Records still buffered when the run ended.
    pub records: Vec<AuditRecord>,
    /// Protocol-specific counters for the report.
    pub counters: Vec<(&'static str, u64)>,
}

pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    fn record_type(&self) -> &'static str;

    /// Runs once after configuration is known.
    fn post_init(&mut self, ctx: &mut InitContext<'_>) -> Result<(), DecodeError>;

    fn decode(&self, event: &DecodeEvent<'_>) -> Result<Vec<AuditRecord>, DecodeError>;

    /// Flushes buffered state. Runs once, at shutdown.
    fn finalize(&self) -> Result<Finalized, DecodeError>;
}

pub struct InitContext<'a> {
    pub config: &'a SparhundConfig,
    reporter: ErrorReporter,
    streams: bool,
}

impl InitContext<'_> {
    /// Requests delivery of reassembled TCP streams instead of packets.
    pub fn subscribe_streams(&mut self) {
        self.streams = true;
    }

    /// Handle for reporting errors that do not abort the current call.
    pub fn reporter(&self) -> ErrorReporter {
        self.reporter.clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DecoderState {
    Uninit,
    Ready,
    /// post_init failed or a fatal error occurred; decode is skipped.
    Failed,
    Finalized,
}

struct Health {
    name: &'static str,
    processed: AtomicU64,
    errors: AtomicU64,
    state: RwLock<DecoderState>,
    stats: Arc<SharedStats>,
    metrics: Option<Arc<MetricsRecorder>>,
}

/// Counts and logs decoder errors on behalf of the framework.
#[derive(Clone)]
pub struct ErrorReporter {
    health: Arc<Health>,
}

impl ErrorReporter {
    fn new(name: &'static str, stats: Arc<SharedStats>, metrics: Option<Arc<MetricsRecorder>>) -> Self {
        Self {
            health: Arc::new(Health {
                name,
                processed: AtomicU64::new(0),
                errors: AtomicU64::new(0),
                state: RwLock::new(DecoderState::Uninit),
                stats,
                metrics,
            }),
        }
    }

    /// A reporter with private statistics, for using a plugin on its own.
    pub fn detached(name: &'static str) -> Self {
        Self::new(name, Arc::new(SharedStats::new()), None)
    }

    pub fn report(&self, err: &DecodeError) {
        let health = &self.health;
        health.errors.fetch_add(1, Ordering::Relaxed);
        health.stats.record_error(&err.subject);
        if let Some(metrics) = &health.metrics {
            metrics.inc_decode_error(health.name);
        }

        match err.kind {
            ErrorKind::Malformed => debug!(decoder = health.name, error = %err, "Malformed input"),
            ErrorKind::Io => warn!(decoder = health.name, error = %err, "Decoder I/O error"),
            ErrorKind::Timeout => warn!(decoder = health.name, error = %err, "Decoder timeout"),
            ErrorKind::Fatal => {
                error!(decoder = health.name, error = %err, "Decoder disabled after fatal error");
                *health.state.write() = DecoderState::Failed;
            }
        }
    }

    pub fn errors(&self) -> u64 {
        self.health.errors.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> &Arc<SharedStats> {
        &self.health.stats
    }
}

/// Final per-decoder figures.
#[derive(Debug, Clone, Serialize)]
pub struct DecoderSummary {
    pub name: &'static str,
    pub record_type: &'static str,
    pub state: DecoderState,
    pub processed: u64,
    pub errors: u64,
    pub counters: Vec<(&'static str, u64)>,
}

/// A plugin plus its lifecycle state and counters.
pub struct CustomDecoder {
    plugin: Box<dyn DecoderPlugin>,
    reporter: ErrorReporter,
    streams: bool,
    initialized: bool,
    summary: Mutex<Option<DecoderSummary>>,
}

impl CustomDecoder {
    pub fn new(
        plugin: Box<dyn DecoderPlugin>,
        stats: Arc<SharedStats>,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> Self {
        let reporter = ErrorReporter::new(plugin.name(), stats, metrics);
        Self {
            plugin,
            reporter,
            streams: false,
            initialized: false,
            summary: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &'static str {
        self.plugin.name()
    }

    pub fn record_type(&self) -> &'static str {
        self.plugin.record_type()
    }

    pub fn state(&self) -> DecoderState {
        *self.reporter.health.state.read()
    }

    pub fn subscribed_streams(&self) -> bool {
        self.streams
    }

    pub fn processed(&self) -> u64 {
        self.reporter.health.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.reporter.errors()
    }

    /// Runs the plugin's post-init. On failure the decoder stays disabled
    /// and the error is returned for reporting.
    pub fn post_init(&mut self, config: &SparhundConfig) -> Result<(), DecodeError> {
        let mut ctx = InitContext {
            config,
            reporter: self.reporter.clone(),
            streams: false,
        };
        match self.plugin.post_init(&mut ctx) {
            Ok(()) => {
                self.streams = ctx.streams;
                self.initialized = true;
                *self.reporter.health.state.write() = DecoderState::Ready;
                debug!(decoder = self.name(), streams = self.streams, "Decoder ready");
                Ok(())
            }
            Err(e) => {
                *self.reporter.health.state.write() = DecoderState::Failed;
                error!(decoder = self.name(), error = %e, "Decoder post-init failed");
                Err(e)
            }
        }
    }

    /// Decodes one event. Errors are counted and routed here; callers only
    /// ever see records.
    pub fn decode(&self, event: &DecodeEvent<'_>) -> Vec<AuditRecord> {
        if self.state() != DecoderState::Ready {
            return Vec::new();
        }
        self.reporter.health.processed.fetch_add(1, Ordering::Relaxed);

        match self.plugin.decode(event) {
            Ok(records) => records,
            Err(e) => {
                self.reporter.report(&e);
                Vec::new()
            }
        }
    }

    /// Flushes the plugin and returns its summary plus any late records.
    ///
    /// Only the first call reaches the plugin; later calls return the same
    /// summary. Plugins that never initialized are not called at all.
    pub fn finalize(&self) -> (DecoderSummary, Vec<AuditRecord>) {
        let mut done_once = self.summary.lock();
        if let Some(summary) = done_once.as_ref() {
            return (summary.clone(), Vec::new());
        }

        let mut records = Vec::new();
        let mut counters = Vec::new();
        if self.initialized {
            match catch_unwind(AssertUnwindSafe(|| self.plugin.finalize())) {
                Ok(Ok(done)) => {
                    records = done.records;
                    counters = done.counters;
                }
                Ok(Err(e)) => self.reporter.report(&e),
                Err(_) => {
                    error!(decoder = self.name(), "Decoder panicked during finalize");
                    self.reporter.health.stats.record_error("decoder finalize");
                }
            }
        }

        let state = match self.state() {
            DecoderState::Failed => DecoderState::Failed,
            _ => DecoderState::Finalized,
        };
        *self.reporter.health.state.write() = state;

        let summary = DecoderSummary {
            name: self.name(),
            record_type: self.record_type(),
            state,
            processed: self.processed(),
            errors: self.errors(),
            counters,
        };
        *done_once = Some(summary.clone());
        (summary, records)
    }
}

/// Builder for the closed set of decoders used by one engine.
#[derive(Default)]
pub struct DecoderRegistry {
    plugins: Vec<Box<dyn DecoderPlugin>>,
}

/// Initialized decoders plus the ones whose post-init failed.
pub struct DecoderSet {
    pub decoders: Vec<Arc<CustomDecoder>>,
    pub init_failures: Vec<(&'static str, DecodeError)>,
}

impl DecoderSet {
    pub fn stream_decoders(&self) -> Vec<Arc<CustomDecoder>> {
        self.decoders
            .iter()
            .filter(|d| d.subscribed_streams())
            .cloned()
            .collect()
    }

    pub fn packet_decoders(&self) -> Vec<Arc<CustomDecoder>> {
        self.decoders
            .iter()
            .filter(|d| d.state() == DecoderState::Ready && !d.subscribed_streams())
            .cloned()
            .collect()
    }
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in HTTP and SSH decoders.
    pub fn with_defaults() -> Self {
        Self::new()
            .register(Box::new(HttpDecoder::new()))
            .register(Box::new(SshDecoder::new()))
    }

    pub fn register(mut self, plugin: Box<dyn DecoderPlugin>) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    /// Applies the include/exclude filters and runs every post-init.
    pub fn build(
        self,
        config: &SparhundConfig,
        stats: Arc<SharedStats>,
        metrics: Option<Arc<MetricsRecorder>>,
    ) -> DecoderSet {
        let mut set = DecoderSet {
            decoders: Vec::new(),
            init_failures: Vec::new(),
        };

        for plugin in self.plugins {
            let name = plugin.name();
            if !config.decoders.is_enabled(name) {
                info!(decoder = name, "Decoder disabled by configuration");
                continue;
            }
            let mut decoder = CustomDecoder::new(plugin, Arc::clone(&stats), metrics.clone());
            if let Err(e) = decoder.post_init(config) {
                set.init_failures.push((name, e));
            }
            // failed decoders stay listed so they show up in the report
            set.decoders.push(Arc::new(decoder));
        }

        info!(
            decoders = set.decoders.len(),
            failed = set.init_failures.len(),
            "Decoders initialized"
        );
        set
    }
}
