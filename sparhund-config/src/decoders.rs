//! Decoder selection and per-decoder limits.

use serde::{Deserialize, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Names of the stream decoders the engine knows how to build.
pub const KNOWN_DECODERS: &[&str] = &["http", "ssh"];

#[derive(Debug, Serialize, Deserialize, Validate, Clone, Default)]
pub struct DecoderConfig {
    /// Only these decoders run. Empty means all known decoders.
    #[validate(custom(function = validation::validate_decoder_names))]
    #[serde(default)]
    pub include: Vec<String>,

    /// Decoders that never run, even if included.
    #[validate(custom(function = validation::validate_decoder_names))]
    #[serde(default)]
    pub exclude: Vec<String>,

    #[validate(nested)]
    #[serde(default)]
    pub http: HttpDecoderConfig,
}

impl DecoderConfig {
    /// Whether the named decoder survives the include/exclude filters.
    pub fn is_enabled(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|n| n == name);
        included && !self.exclude.iter().any(|n| n == name)
    }
}

#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct HttpDecoderConfig {
    /// Messages with a larger head or body are dropped and counted as errors.
    #[validate(range(min = 1024))]
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

impl Default for HttpDecoderConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}
