use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Device '{0}' not found")]
    DeviceNotFound(String),

    #[error("Failed to open capture file {path}: {source}")]
    OpenFile {
        path: PathBuf,
        #[source]
        source: pcap::Error,
    },

    #[error("Failed to open device '{interface}': {source}")]
    OpenDevice {
        interface: String,
        #[source]
        source: pcap::Error,
    },

    #[error("Capture error: {0}")]
    Pcap(#[from] pcap::Error),
}
