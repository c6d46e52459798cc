//! # Sparhund Detection
//!
//! Service identification from reconstructed conversation bytes.

pub mod probes;

pub use probes::{ProbeError, ProbeMatch, ServiceProbe, ServiceProbes};
