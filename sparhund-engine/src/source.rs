//! Packet sources feeding the engine's dispatch channel.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use async_trait::async_trait;
use sparhund_capture::{read_file, run_live, CaptureStats};
use sparhund_config::CaptureConfig;
use sparhund_core::packet::CapturedPacket;
use tokio::sync::mpsc;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::error::EngineError;

#[async_trait]
pub trait PacketSource: Send {
    /// Sends packets until the source is exhausted or stopped. Dropping `tx`
    /// on return ends the run.
    async fn run(self: Box<Self>, tx: mpsc::Sender<CapturedPacket>)
        -> Result<CaptureStats, EngineError>;
}

/// Forwards a decoded packet from a blocking capture thread.
fn forward(tx: &mpsc::Sender<CapturedPacket>, packet: CapturedPacket) {
    if tx.blocking_send(packet).is_err() {
        debug!("Dispatcher gone, dropping packet");
    }
}

pub struct PcapFileSource {
    path: PathBuf,
    verify_checksum: bool,
}

impl PcapFileSource {
    pub fn new(path: impl Into<PathBuf>, verify_checksum: bool) -> Self {
        Self {
            path: path.into(),
            verify_checksum,
        }
    }
}

#[async_trait]
impl PacketSource for PcapFileSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<CapturedPacket>,
    ) -> Result<CaptureStats, EngineError> {
        let PcapFileSource {
            path,
            verify_checksum,
        } = *self;
        let stats = spawn_blocking(move || {
            read_file(&path, verify_checksum, |packet| forward(&tx, packet))
        })
        .await??;
        info!(?stats, "Capture file processed");
        Ok(stats)
    }
}

/// Live capture until `terminate` is set.
pub struct LiveSource {
    interface: String,
    buffer_size: usize,
    promiscuous: bool,
    verify_checksum: bool,
    terminate: Arc<AtomicBool>,
}

impl LiveSource {
    pub fn new(config: &CaptureConfig, verify_checksum: bool, terminate: Arc<AtomicBool>) -> Self {
        Self {
            interface: config.interface.clone(),
            buffer_size: config.buffer_size,
            promiscuous: config.promiscuous,
            verify_checksum,
            terminate,
        }
    }
}

#[async_trait]
impl PacketSource for LiveSource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<CapturedPacket>,
    ) -> Result<CaptureStats, EngineError> {
        let source = *self;
        let stats = spawn_blocking(move || {
            info!(interface = %source.interface, "Starting live capture");
            run_live(
                &source.interface,
                source.buffer_size,
                source.promiscuous,
                source.verify_checksum,
                &source.terminate,
                |packet| forward(&tx, packet),
            )
        })
        .await??;
        Ok(stats)
    }
}

/// Packets already in memory, sent in order.
pub struct MemorySource {
    packets: Vec<CapturedPacket>,
}

impl MemorySource {
    pub fn new(packets: Vec<CapturedPacket>) -> Self {
        Self { packets }
    }
}

#[async_trait]
impl PacketSource for MemorySource {
    async fn run(
        self: Box<Self>,
        tx: mpsc::Sender<CapturedPacket>,
    ) -> Result<CaptureStats, EngineError> {
        let count = self.packets.len() as u64;
        for packet in self.packets {
            if tx.send(packet).await.is_err() {
                break;
            }
        }
        Ok(CaptureStats {
            frames: count,
            decoded: count,
            skipped: 0,
        })
    }
}
