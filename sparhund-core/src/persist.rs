//! ## sparhund-core::persist
//! **Connection persistence**
//!
//! Writes reconstructed conversations below
//! `<root>/<protocol>/<service>/<sanitized ident><extension>`. Files are only
//! ever appended to, so repeated or resumed runs accumulate data.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use sparhund_config::OutputConfig;
use tracing::{info, warn};

use crate::conversation::Conversation;
use crate::error::PersistError;
use crate::flow::sanitize_ident;

#[derive(Clone, Debug)]
pub struct ConnectionWriter {
    root: PathBuf,
    extension: String,
    enabled: bool,
}

impl ConnectionWriter {
    pub fn new(root: impl Into<PathBuf>, extension: impl Into<String>, enabled: bool) -> Self {
        Self {
            root: root.into(),
            extension: extension.into(),
            enabled,
        }
    }

    pub fn from_config(config: &OutputConfig) -> Self {
        Self::new(&config.root, &config.file_extension, config.save_conns)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Target file for a conversation.
    pub fn path_for(&self, conversation: &Conversation, service_type: &str) -> PathBuf {
        self.root
            .join(conversation.protocol.label())
            .join(service_type)
            .join(format!("{}{}", sanitize_ident(&conversation.ident), self.extension))
    }

    /// Appends the colorized conversation to its file.
    ///
    /// Returns the written path, or `None` when nothing was written because
    /// the conversation is empty or persistence is disabled. The file is
    /// closed before returning on every path.
    pub fn persist(
        &self,
        conversation: &Conversation,
        service_type: &str,
    ) -> Result<Option<PathBuf>, PersistError> {
        if conversation.raw.is_empty() || !self.enabled {
            return Ok(None);
        }

        let path = self.path_for(conversation, service_type);
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir) {
                warn!(path = %dir.display(), error = %e, "Failed to create directory");
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| PersistError::Open {
                ident: conversation.ident.clone(),
                path: path.clone(),
                source,
            })?;

        // a lone keepalive byte is kept as is
        let data = if conversation.raw.len() == 1 {
            &conversation.raw
        } else {
            &conversation.colored
        };

        file.write_all(data)
            .and_then(|_| file.flush())
            .map_err(|source| PersistError::Write {
                ident: conversation.ident.clone(),
                path: path.clone(),
                bytes: data.len(),
                source,
            })?;

        info!(
            ident = %conversation.ident,
            path = %path.display(),
            bytes = data.len(),
            "Saved conversation"
        );
        Ok(Some(path))
    }
}
