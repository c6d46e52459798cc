use std::path::PathBuf;

use thiserror::Error;

/// Failures while writing a conversation to disk.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("Failed to open {path} for {ident}: {source}")]
    Open {
        ident: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{ident}: failed to write {bytes} bytes to {path}: {source}")]
    Write {
        ident: String,
        path: PathBuf,
        bytes: usize,
        #[source]
        source: std::io::Error,
    },
}
