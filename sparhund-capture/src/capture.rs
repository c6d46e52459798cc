use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use pcap::{Capture, Device};
use tracing::{debug, error, info};

use crate::decode::{decode_frame, LinkLayer};
use crate::error::CaptureError;
use sparhund_core::packet::CapturedPacket;

/// Frame counters for one capture run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub frames: u64,
    pub decoded: u64,
    pub skipped: u64,
}

fn frame_timestamp(header: &pcap::PacketHeader) -> DateTime<Utc> {
    let secs = header.ts.tv_sec as i64;
    let nanos = (header.ts.tv_usec as u32).saturating_mul(1_000);
    DateTime::from_timestamp(secs, nanos).unwrap_or_default()
}

/// Reads every frame of a pcap file, calling `callback` for each TCP/UDP
/// packet in file order.
pub fn read_file<F>(
    path: &Path,
    verify_checksum: bool,
    mut callback: F,
) -> Result<CaptureStats, CaptureError>
where
    F: FnMut(CapturedPacket),
{
    let mut cap = Capture::from_file(path).map_err(|source| CaptureError::OpenFile {
        path: path.to_path_buf(),
        source,
    })?;
    let link = LinkLayer::from_datalink(cap.get_datalink());
    info!(path = %path.display(), ?link, "Reading capture file");

    let mut stats = CaptureStats::default();
    loop {
        match cap.next_packet() {
            Ok(frame) => {
                stats.frames += 1;
                let ts = frame_timestamp(frame.header);
                match decode_frame(link, frame.data, ts, verify_checksum) {
                    Some(packet) => {
                        stats.decoded += 1;
                        callback(packet);
                    }
                    None => stats.skipped += 1,
                }
            }
            Err(pcap::Error::NoMorePackets) => break,
            Err(e) => return Err(e.into()),
        }
    }
    debug!(?stats, "Capture file exhausted");
    Ok(stats)
}

/// Runs a live capture loop on the specified interface.
/// Blocks until `terminate` is set or the capture fails.
pub fn run_live<F>(
    interface: &str,
    buffer_size: usize,
    promiscuous: bool,
    verify_checksum: bool,
    terminate: &AtomicBool,
    mut callback: F,
) -> Result<CaptureStats, CaptureError>
where
    F: FnMut(CapturedPacket) + Send,
{
    let device = Device::list()?
        .into_iter()
        .find(|d| d.name == interface)
        .ok_or_else(|| CaptureError::DeviceNotFound(interface.to_string()))?;

    let snaplen = i32::try_from(buffer_size).unwrap_or(i32::MAX);
    let mut cap = Capture::from_device(device)
        .and_then(|c| c.promisc(promiscuous).snaplen(snaplen).timeout(1000).open())
        .map_err(|source| CaptureError::OpenDevice {
            interface: interface.to_string(),
            source,
        })?;
    let link = LinkLayer::from_datalink(cap.get_datalink());
    info!(interface, ?link, promiscuous, "Live capture started");

    let mut stats = CaptureStats::default();
    while !terminate.load(Ordering::Relaxed) {
        match cap.next_packet() {
            Ok(frame) => {
                stats.frames += 1;
                let ts = frame_timestamp(frame.header);
                match decode_frame(link, frame.data, ts, verify_checksum) {
                    Some(packet) => {
                        stats.decoded += 1;
                        callback(packet);
                    }
                    None => stats.skipped += 1,
                }
            }
            // no packet in this timeout window
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                error!(interface, error = %e, "Error capturing packet");
                return Err(e.into());
            }
        }
    }
    info!(interface, ?stats, "Live capture stopped");
    Ok(stats)
}
