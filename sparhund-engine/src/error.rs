use std::fmt;

use serde::Serialize;
use sparhund_capture::CaptureError;
use sparhund_config::ConfigError;
use sparhund_core::PersistError;
use sparhund_detection::ProbeError;
use thiserror::Error;
use tokio::task::JoinError;

/// How a decode failure is routed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    /// Transient I/O; logged and returned, never retried.
    Io,
    /// Bad input; counted and dropped.
    Malformed,
    /// A call was abandoned after its deadline.
    Timeout,
    /// The decoder cannot continue and is disabled.
    Fatal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Io => "io",
            ErrorKind::Malformed => "malformed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Fatal => "fatal",
        })
    }
}

/// A decoder failure. `subject` is the key under which it is counted in the
/// error table of the final report.
#[derive(Debug, Clone, Error)]
#[error("{subject} ({kind}): {message}")]
pub struct DecodeError {
    pub kind: ErrorKind,
    pub subject: String,
    pub message: String,
}

impl DecodeError {
    pub fn new(kind: ErrorKind, subject: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.to_string(),
        }
    }

    pub fn io(subject: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Io, subject, message)
    }

    pub fn malformed(subject: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Malformed, subject, message)
    }

    pub fn timeout(subject: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Timeout, subject, message)
    }

    pub fn fatal(subject: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::new(ErrorKind::Fatal, subject, message)
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Probe setup failed: {0}")]
    Probes(#[from] ProbeError),

    #[error("Metrics setup failed: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("Persistence error: {0}")]
    Persist(#[from] PersistError),

    #[error("Record output error: {0}")]
    Sink(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Task failed: {0}")]
    Task(String),

    #[error("Engine already finalized")]
    Finalized,
}

impl From<JoinError> for EngineError {
    fn from(err: JoinError) -> Self {
        EngineError::Task(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Sink(err.to_string())
    }
}
