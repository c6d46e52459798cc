//! Packet acquisition parameters.
//!
//! Covers both offline replay of a capture file and live capture from a
//! network interface.

use serde::{Deserialize, Deserializer, Serialize};
use validator::{self, Validate};

use crate::validation;

/// Packet capture configuration.
#[derive(Debug, Serialize, Deserialize, Validate, Clone)]
pub struct CaptureConfig {
    /// Capture mode (`file` or `live`).
    #[validate(custom(function = validation::validate_mode))]
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Network interface for live capture.
    #[validate(custom(function = validation::validate_interface))]
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Run in promiscuous mode?
    #[serde(default = "default_promiscuous")]
    pub promiscuous: bool,

    /// Capture buffer size in bytes.
    #[validate(range(min = 4096, max = 1073741824))]
    #[serde(default = "default_buffer_size", deserialize_with = "deserialize_size")]
    pub buffer_size: usize,

    /// Number of workers consuming decoded packets.
    #[validate(range(min = 1, max = 1024))]
    #[serde(default = "default_workers")]
    pub workers: usize,
}

fn default_mode() -> String {
    "file".into()
}

fn default_interface() -> String {
    "eth0".into()
}

fn default_promiscuous() -> bool {
    true
}

fn default_buffer_size() -> usize {
    1048576
}

fn default_workers() -> usize {
    num_cpus::get().max(1)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SizeValue {
    Num(usize),
    Str(String),
}

/// Accepts human-friendly sizes ("4MiB", "512kb") or plain numbers.
fn deserialize_size<'de, D>(deserializer: D) -> Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    match SizeValue::deserialize(deserializer)? {
        SizeValue::Num(n) => Ok(n),
        SizeValue::Str(s) => parse_size(&s).map_err(serde::de::Error::custom),
    }
}

fn parse_size(raw: &str) -> Result<usize, String> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (num_part, unit_part) = raw.split_at(split);
    let number: f64 = num_part
        .parse()
        .map_err(|e| format!("invalid size '{}': {}", raw, e))?;
    let multiplier = match unit_part.trim().to_lowercase().as_str() {
        "" | "b" => 1.0,
        "kb" | "kib" => 1024.0,
        "mb" | "mib" => 1024.0 * 1024.0,
        "gb" | "gib" => 1024.0 * 1024.0 * 1024.0,
        other => return Err(format!("unknown size unit '{}'", other)),
    };
    Ok((number * multiplier) as usize)
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            interface: default_interface(),
            promiscuous: default_promiscuous(),
            buffer_size: default_buffer_size(),
            workers: default_workers(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_sizes() {
        assert_eq!(parse_size("4MiB").unwrap(), 4 * 1024 * 1024);
        assert_eq!(parse_size("512 kb").unwrap(), 512 * 1024);
        assert_eq!(parse_size("8192").unwrap(), 8192);
        assert!(parse_size("3 parsecs").is_err());
    }

    #[test]
    fn defaults_validate() {
        let config = CaptureConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.workers >= 1);
    }

    #[test]
    fn unknown_mode_rejected() {
        let config = CaptureConfig {
            mode: "xdp".into(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
