//! # Sparhund Configuration System
//!
//! Hierarchical configuration for the capture-to-audit-record pipeline.
//!
//! ## Features
//! - **Unified Configuration**: one struct shared by capture, reassembly, decoders and output
//! - **Validation**: runtime validation of every section before the engine starts
//! - **Environment Awareness**: per-environment YAML overrides plus `SPARHUND_*` variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod capture;
mod decoders;
mod error;
mod output;
mod reassembly;
mod resolvers;
mod telemetry;
mod validation;

pub use capture::CaptureConfig;
pub use decoders::{DecoderConfig, HttpDecoderConfig, KNOWN_DECODERS};
pub use error::ConfigError;
pub use output::OutputConfig;
pub use reassembly::ReassemblyConfig;
pub use resolvers::ResolverConfig;
pub use telemetry::TelemetryConfig;

/// Top‑level configuration container for all Sparhund components.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
pub struct SparhundConfig {
    /// Where conversations and audit records are written.
    #[validate(nested)]
    #[serde(default)]
    pub output: OutputConfig,

    /// TCP reassembly cadence and timeouts.
    #[validate(nested)]
    #[serde(default)]
    pub reassembly: ReassemblyConfig,

    /// Decoder selection and per-protocol limits.
    #[validate(nested)]
    #[serde(default)]
    pub decoders: DecoderConfig,

    /// Local name databases.
    #[validate(nested)]
    #[serde(default)]
    pub resolvers: ResolverConfig,

    /// Packet capture parameters.
    #[validate(nested)]
    #[serde(default)]
    pub capture: CaptureConfig,

    /// Logging configuration.
    #[validate(nested)]
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SparhundConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/sparhund.yaml` - Base settings. If missing, defaults are used.
    /// 3. `config/<environment>.yaml` - Environment‑specific overrides (`SPARHUND_ENV`).
    /// 4. `SPARHUND_*` environment variables, `__` separating sections.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(SparhundConfig::default()));

        if Path::new("config/sparhund.yaml").exists() {
            figment = figment.merge(Yaml::file("config/sparhund.yaml"));
        }

        let env = std::env::var("SPARHUND_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment)
    }

    /// Load configuration from a specific path, layered over the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        let figment =
            Figment::from(Serialized::defaults(SparhundConfig::default())).merge(Yaml::file(path));
        Self::extract(figment)
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .merge(Env::prefixed("SPARHUND_").split("__"))
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}
