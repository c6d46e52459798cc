//! Deadline-bounded submission into a [`StreamAssembler`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sparhund_config::ReassemblyConfig;
use sparhund_core::packet::CapturedPacket;
use tokio::task::spawn_blocking;
use tracing::{debug, instrument, warn};

use super::{AssemblerStats, FlushCutoffs, FlushOutcome, StreamAssembler};
use crate::error::DecodeError;

/// Feeds TCP segments to an assembler without letting a stalled call block
/// the capture path, and flushes idle connections every `flush_every`
/// segments.
pub struct TcpStreamDriver {
    assembler: Arc<dyn StreamAssembler>,
    flush_every: u64,
    timeout: Duration,
    close_timeout: Duration,
    submit_timeout: Duration,
    final_flush_timeout: Duration,
    checksum: bool,
    allow_missing_init: bool,
    /// Every segment seen, including dropped and timed-out ones.
    segments: AtomicU64,
    timeouts: AtomicU64,
}

impl TcpStreamDriver {
    pub fn new(assembler: Arc<dyn StreamAssembler>, config: &ReassemblyConfig) -> Self {
        Self {
            assembler,
            flush_every: config.flush_every as u64,
            timeout: config.timeout(),
            close_timeout: config.close_timeout(),
            submit_timeout: config.submit_timeout(),
            final_flush_timeout: config.final_flush_timeout(),
            checksum: config.checksum,
            allow_missing_init: config.allow_missing_init,
            segments: AtomicU64::new(0),
            timeouts: AtomicU64::new(0),
        }
    }

    pub fn assembler(&self) -> &Arc<dyn StreamAssembler> {
        &self.assembler
    }

    /// Submits one segment.
    ///
    /// If the assembler has not returned within the submit timeout the wait
    /// is abandoned with a [`Timeout`](crate::error::ErrorKind::Timeout)
    /// error. The call itself keeps running in the background and the
    /// connection stays open for later segments. The segment counts toward
    /// the periodic flush either way.
    pub async fn submit(&self, packet: CapturedPacket) -> Result<(), DecodeError> {
        let reference = packet.timestamp;
        let seen = self.segments.fetch_add(1, Ordering::Relaxed) + 1;

        let submitted = self.submit_segment(packet).await;
        let flushed = self.flush_if_due(seen, reference).await;
        submitted.and(flushed)
    }

    /// Counts a segment dropped before submission (e.g. a bad checksum)
    /// toward the periodic flush.
    pub async fn skip(&self, reference: DateTime<Utc>) -> Result<(), DecodeError> {
        let seen = self.segments.fetch_add(1, Ordering::Relaxed) + 1;
        self.flush_if_due(seen, reference).await
    }

    async fn submit_segment(&self, packet: CapturedPacket) -> Result<(), DecodeError> {
        let flow = packet.flow_key();
        let assembler = Arc::clone(&self.assembler);
        let task = spawn_blocking(move || assembler.submit(&packet));
        match tokio::time::timeout(self.submit_timeout, task).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(DecodeError::io("tcp submit", e)),
            Err(_) => {
                self.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!(
                    %flow,
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "assembler submit timeout, continuing without it"
                );
                Err(DecodeError::timeout(
                    "tcp submit",
                    format!("no return within {:?}", self.submit_timeout),
                ))
            }
        }
    }

    async fn flush_if_due(&self, seen: u64, reference: DateTime<Utc>) -> Result<(), DecodeError> {
        if self.flush_every == 0 || seen % self.flush_every != 0 {
            return Ok(());
        }
        let cutoffs = FlushCutoffs::relative_to(reference, self.timeout, self.close_timeout);
        let outcome = self.flush_older_than(cutoffs).await?;
        debug!(
            segments = seen,
            flushed = outcome.flushed,
            closed = outcome.closed,
            "Periodic stream flush"
        );
        Ok(())
    }

    /// Time-windowed flush, bounded by the submit timeout.
    pub async fn flush_older_than(&self, cutoffs: FlushCutoffs) -> Result<FlushOutcome, DecodeError> {
        let assembler = Arc::clone(&self.assembler);
        let task = spawn_blocking(move || assembler.flush_older_than(cutoffs));
        match tokio::time::timeout(self.submit_timeout, task).await {
            Ok(outcome) => outcome.map_err(|e| DecodeError::io("tcp flush", e)),
            Err(_) => {
                warn!(
                    timeout_ms = self.submit_timeout.as_millis() as u64,
                    "assembler flush timeout, continuing without it"
                );
                Err(DecodeError::timeout(
                    "tcp flush",
                    format!("no return within {:?}", self.submit_timeout),
                ))
            }
        }
    }

    /// Closes every open connection.
    ///
    /// Gives up after the final flush timeout; connections held by a stalled
    /// call are then left to that call.
    #[instrument(skip(self))]
    pub async fn flush_all(&self) -> Result<usize, DecodeError> {
        let assembler = Arc::clone(&self.assembler);
        let task = spawn_blocking(move || assembler.flush_all());
        let closed = match tokio::time::timeout(self.final_flush_timeout, task).await {
            Ok(closed) => closed.map_err(|e| DecodeError::io("tcp flush", e))?,
            Err(_) => {
                warn!(
                    timeout_ms = self.final_flush_timeout.as_millis() as u64,
                    "final stream flush timeout, finalizing without it"
                );
                return Err(DecodeError::timeout(
                    "tcp flush",
                    format!("no return within {:?}", self.final_flush_timeout),
                ));
            }
        };
        debug!(closed, "Closed remaining TCP connections");
        Ok(closed)
    }

    /// Submissions abandoned after the submit timeout.
    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Relaxed)
    }

    pub fn segments(&self) -> u64 {
        self.segments.load(Ordering::Relaxed)
    }

    pub fn assembler_stats(&self) -> AssemblerStats {
        self.assembler.stats()
    }

    /// Reassembly settings as label/value pairs for the report.
    pub fn settings(&self) -> Vec<(&'static str, String)> {
        vec![
            ("FlushEvery", self.flush_every.to_string()),
            ("Timeout", format!("{:?}", self.timeout)),
            ("CloseTimeout", format!("{:?}", self.close_timeout)),
            ("SubmitTimeout", format!("{:?}", self.submit_timeout)),
            ("FinalFlushTimeout", format!("{:?}", self.final_flush_timeout)),
            ("AllowMissingInit", self.allow_missing_init.to_string()),
            ("Checksum", self.checksum.to_string()),
        ]
    }
}
