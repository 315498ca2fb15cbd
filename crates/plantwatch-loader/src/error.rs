//! Error types for the phased loader
//!
//! Provides error handling for:
//! - Per-field fetch failures (recovered inside a load cycle)
//! - Tier plan construction
//! - Configuration loading
//! - Entity identifier validation

use std::path::PathBuf;

/// Failure of a single field fetch
///
/// Never escapes a load cycle: the loader logs it and keeps the field's
/// previous value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connection-level failure (DNS, refused, reset, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-success status
    #[error("service returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The payload could not be decoded
    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The service has no data for the entity
    #[error("data unavailable: {0}")]
    Unavailable(String),

    /// The fetcher panicked while producing a value
    #[error("fetcher panicked: {0}")]
    Panicked(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Create transport error
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create status error
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Check if a later retry could plausibly succeed
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(err.to_string())
    }
}

/// Invalid entity identifier
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntityIdError {
    /// Identifier is empty or whitespace only
    #[error("entity identifier must not be empty")]
    Empty,
}

/// Tier plan construction errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// Plan has no tiers
    #[error("tier plan must contain at least one tier")]
    EmptyPlan,

    /// A tier has no fields
    #[error("tier {tier} has no fields")]
    EmptyTier { tier: usize },

    /// A field appears more than once in the plan
    #[error("field '{field}' is declared more than once")]
    DuplicateField { field: String },

    /// Layout names a field with no registered fetcher
    #[error("tier {tier} names field '{field}' but no fetcher is registered for it")]
    UnknownField { field: String, tier: usize },
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// IO error while reading a config file
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Malformed YAML
    #[error("invalid YAML config: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// File extension is not a supported config format
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(PathBuf),

    /// A value is out of range
    #[error("invalid config value: {0}")]
    Invalid(String),

    /// The declared tier layout is invalid
    #[error("invalid tier layout: {0}")]
    Layout(#[from] PlanError),
}

impl ConfigError {
    /// Create IO error for path
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Top-level loader error
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    /// Invalid entity identifier
    #[error("entity error: {0}")]
    Entity(#[from] EntityIdError),

    /// Invalid tier plan
    #[error("plan error: {0}")]
    Plan(#[from] PlanError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Refresh interval of zero
    #[error("refresh interval must be greater than zero")]
    ZeroInterval,
}
