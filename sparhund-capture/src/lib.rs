//! sparhund-capture
//!
//! Packet sources for sparhund: offline pcap files and live interfaces.
//! Frames are decoded down to TCP/UDP with etherparse and handed to the
//! caller as [`CapturedPacket`]s.

pub mod capture;
pub mod decode;
pub mod error;

pub use capture::{read_file, run_live, CaptureStats};
pub use decode::{decode_frame, LinkLayer};
pub use error::CaptureError;
pub use sparhund_core::packet::CapturedPacket;
