//! Statistics printed when a run ends.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use comfy_table::{Cell, Table};
use serde::Serialize;
use sparhund_capture::CaptureStats;

use crate::decoder::DecoderSummary;
use crate::stream::AssemblerStats;

#[derive(Debug, Clone, Serialize)]
pub struct FinalReport {
    pub packets: u64,
    pub bytes: u64,
    pub elapsed: Duration,
    pub decoders: Vec<DecoderSummary>,
    /// Decoders whose post-init failed, with the reason.
    pub init_failures: Vec<(String, String)>,
    /// Error subject to occurrence count.
    pub errors: BTreeMap<String, u64>,
    pub tcp_settings: Vec<(&'static str, String)>,
    pub assembler: AssemblerStats,
    pub submit_timeouts: u64,
    pub conversations: usize,
    pub services: usize,
    pub records: u64,
    #[serde(skip)]
    pub capture: Option<CaptureStats>,
    /// Set when the packet source stopped with an error.
    pub capture_error: Option<String>,
}

impl FinalReport {
    pub fn total_errors(&self) -> u64 {
        self.errors.values().sum()
    }
}

impl fmt::Display for FinalReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "processed {} packets ({} bytes) in {:.3}s, {} records, {} conversations, {} services",
            self.packets,
            self.bytes,
            self.elapsed.as_secs_f64(),
            self.records,
            self.conversations,
            self.services
        )?;
        if let Some(capture) = &self.capture {
            writeln!(
                f,
                "capture: {} frames, {} decoded, {} skipped",
                capture.frames, capture.decoded, capture.skipped
            )?;
        }
        writeln!(f)?;

        let mut decoders = Table::new();
        decoders.set_header(vec!["Decoder", "Processed", "Errors", "State", "Counters"]);
        for d in &self.decoders {
            let extra = d
                .counters
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join(" ");
            decoders.add_row(vec![
                Cell::new(d.name),
                Cell::new(d.processed),
                Cell::new(d.errors),
                Cell::new(format!("{:?}", d.state)),
                Cell::new(extra),
            ]);
        }
        writeln!(f, "{decoders}")?;

        for (name, reason) in &self.init_failures {
            writeln!(f, "decoder {} failed to initialize: {}", name, reason)?;
        }

        let mut settings = Table::new();
        settings.set_header(vec!["TCP Reassembly Setting", "Value"]);
        for (name, value) in &self.tcp_settings {
            settings.add_row(vec![Cell::new(name), Cell::new(value)]);
        }
        writeln!(f, "{settings}")?;

        let a = &self.assembler;
        let mut tcp_stats = Table::new();
        tcp_stats.set_header(vec!["TCP Stat", "Value"]);
        for (name, value) in [
            ("Packets", a.packets),
            ("Bytes", a.bytes),
            ("Connections", a.connections),
            ("Closed", a.closed),
            ("Rejected", a.rejected),
            ("SubmitTimeouts", self.submit_timeouts),
        ] {
            tcp_stats.add_row(vec![Cell::new(name), Cell::new(value)]);
        }
        writeln!(f, "{tcp_stats}")?;

        if !self.errors.is_empty() {
            let mut errors = Table::new();
            errors.set_header(vec!["Error Subject", "Count"]);
            for (subject, count) in &self.errors {
                errors.add_row(vec![Cell::new(subject), Cell::new(count)]);
            }
            writeln!(f, "{errors}")?;
        }

        if let Some(err) = &self.capture_error {
            writeln!(f, "capture stopped with error: {}", err)?;
        }
        Ok(())
    }
}
