//! Output configuration: where reconstructed conversations and audit
//! records land on disk, and how much of a banner is kept.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct OutputConfig {
    /// Root directory for `<protocol>/<service>/<flow>` trees and record files.
    #[serde(default = "default_root")]
    pub root: PathBuf,

    /// Persist conversation bytes to disk. Banners are harvested either way.
    #[serde(default = "default_true")]
    pub save_conns: bool,

    /// Maximum number of server bytes kept as a service banner.
    #[validate(range(min = 1, max = 65536))]
    #[serde(default = "default_banner_size")]
    pub banner_size: usize,

    /// Extension appended to every persisted conversation file.
    #[validate(custom(function = validation::validate_extension))]
    #[serde(default = "default_extension")]
    pub file_extension: String,
}

fn default_root() -> PathBuf {
    PathBuf::from("sparhund-out")
}

fn default_true() -> bool {
    true
}

fn default_banner_size() -> usize {
    512
}

fn default_extension() -> String {
    ".bin".into()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            save_conns: default_true(),
            banner_size: default_banner_size(),
            file_extension: default_extension(),
        }
    }
}
