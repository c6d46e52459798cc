//! Custom validation functions shared by the configuration sections.

use once_cell::sync::Lazy;
use regex::Regex;
use validator::ValidationError;

use crate::decoders::KNOWN_DECODERS;

static INTERFACE_RE: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_.\-]+$").ok());

static MODE_RE: Lazy<Option<Regex>> = Lazy::new(|| Regex::new("^(file|live)$").ok());

/// Validate that an interface name follows Linux naming conventions.
pub fn validate_interface(name: &str) -> Result<(), ValidationError> {
    let re = INTERFACE_RE
        .as_ref()
        .ok_or_else(|| ValidationError::new("invalid_regex"))?;
    if !name.is_empty() && name.len() <= 15 && re.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_interface"))
    }
}

/// Validate capture mode.
pub fn validate_mode(mode: &str) -> Result<(), ValidationError> {
    let re = MODE_RE
        .as_ref()
        .ok_or_else(|| ValidationError::new("invalid_regex"))?;
    if re.is_match(mode) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_capture_mode"))
    }
}

/// Extensions must be empty or start with a dot and contain no path separators.
pub fn validate_extension(ext: &str) -> Result<(), ValidationError> {
    if ext.is_empty() || (ext.starts_with('.') && ext.len() > 1 && !ext.contains(['/', '\\'])) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_extension"))
    }
}

pub fn validate_decoder_names(names: &[String]) -> Result<(), ValidationError> {
    match names
        .iter()
        .find(|n| !KNOWN_DECODERS.contains(&n.as_str()))
    {
        None => Ok(()),
        Some(_) => Err(ValidationError::new("unknown_decoder")),
    }
}

pub fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    if level.trim().is_empty() {
        Err(ValidationError::new("empty_log_level"))
    } else {
        Ok(())
    }
}
