use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the database layer.
///
/// Connectivity failures are transient by design: the session keeps retrying
/// and callers see `NotConnected` until it succeeds again.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("not connected to the database")]
    NotConnected,

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("execution failed: {0}")]
    Execution(String),

    #[error("command dropped before completion")]
    Dropped,
}

/// Errors surfaced by the push gateway.
#[derive(Debug, Error)]
pub enum PushError {
    /// The provider accepted the request but rejected the message.
    #[error("delivery rejected ({code}): {message}")]
    Provider { code: String, message: String },

    /// The request never produced a provider verdict.
    #[error("transport error: {0}")]
    Transport(String),
}

impl PushError {
    /// Result code recorded against the notification row.
    pub fn code(&self) -> &str {
        match self {
            PushError::Provider { code, .. } => code,
            PushError::Transport(_) => "messaging/internal-error",
        }
    }
}

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}
