use std::path::PathBuf;
use thiserror::Error;

/// Why retry settings could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A source could not be read or did not deserialize into [`RetryConfig`](super::RetryConfig).
    #[error("failed to read retry settings: {0}")]
    Source(#[from] config::ConfigError),

    /// An explicitly requested settings file does not exist.
    #[error("retry settings file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to encode default retry settings: {0}")]
    Defaults(#[from] serde_json::Error),

    /// A value was read but would make every call fail or spin.
    #[error("invalid retry setting `{key}`: {reason}")]
    Invalid { key: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
