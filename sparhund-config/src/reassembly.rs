//! TCP reassembly parameters.
//!
//! Controls how often the assembler is flushed and how long a single
//! segment submission may block the capture loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct ReassemblyConfig {
    /// Run a time-windowed flush every N packets.
    #[validate(range(min = 1))]
    #[serde(default = "default_flush_every")]
    pub flush_every: usize,

    /// Pending data older than this (relative to the current packet) is force-flushed.
    #[validate(range(min = 1, max = 86400))]
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Connections idle longer than this are force-closed.
    #[validate(range(min = 1, max = 86400))]
    #[serde(default = "default_close_timeout")]
    pub close_timeout_secs: u64,

    /// Upper bound for a single submission to the assembler.
    #[validate(range(min = 1, max = 60000))]
    #[serde(default = "default_submit_timeout")]
    pub submit_timeout_ms: u64,

    /// Upper bound for the final flush of every open connection at shutdown.
    #[validate(range(min = 1, max = 600000))]
    #[serde(default = "default_final_flush_timeout")]
    pub final_flush_timeout_ms: u64,

    /// Verify TCP checksums before submitting segments.
    #[serde(default)]
    pub checksum: bool,

    /// Accept streams whose handshake was not captured.
    #[serde(default = "default_true")]
    pub allow_missing_init: bool,
}

fn default_flush_every() -> usize {
    10_000
}

fn default_timeout() -> u64 {
    60
}

fn default_close_timeout() -> u64 {
    120
}

fn default_submit_timeout() -> u64 {
    3000
}

fn default_final_flush_timeout() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl ReassemblyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_secs(self.close_timeout_secs)
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_millis(self.submit_timeout_ms)
    }

    pub fn final_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.final_flush_timeout_ms)
    }
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        Self {
            flush_every: default_flush_every(),
            timeout_secs: default_timeout(),
            close_timeout_secs: default_close_timeout(),
            submit_timeout_ms: default_submit_timeout(),
            final_flush_timeout_ms: default_final_flush_timeout(),
            checksum: false,
            allow_missing_init: default_true(),
        }
    }
}
