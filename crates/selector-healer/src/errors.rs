//! Error types for the healing engine

use dom_adapter::DomError;
use std::path::PathBuf;
use thiserror::Error;

/// Fault raised by a strategy.
///
/// Failing to find a replacement is not an error; strategies report that as
/// an unsuccessful [`HealingResult`](crate::HealingResult). An `Err` means the
/// strategy itself broke and the engine demotes it.
#[derive(Debug, Error)]
pub enum HealError {
    #[error("DOM capability failed: {0}")]
    Dom(#[from] DomError),

    #[error("AI backend failed: {0}")]
    AiBackend(#[from] AiBackendError),
}

/// Errors talking to the Ollama-compatible AI backend
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AiBackendError {
    #[error("AI backend unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("AI backend returned {code}: {body}")]
    Status { code: u16, body: String },

    #[error("AI request timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },

    #[error("AI request cancelled")]
    Cancelled,

    #[error("model {model} not available on AI backend")]
    ModelMissing { model: String },

    #[error("failed to decode AI backend response: {0}")]
    Decode(String),
}

impl AiBackendError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AiBackendError::TimedOut { .. })
    }
}

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported config file {0}; use JSON or YAML")]
    UnsupportedFormat(PathBuf),

    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}
