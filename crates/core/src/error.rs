//! Error types shared across CouchSync crates

use thiserror::Error;

/// Top-level error type for CouchSync services
#[derive(Debug, Error)]
pub enum CouchSyncError {
    /// Configuration loading or validation failed
    #[error("Configuration error: {message}")]
    ConfigurationError {
        message: String,
        key: Option<String>,
    },
}

impl CouchSyncError {
    /// Configuration error tied to a specific environment variable
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            key: Some(key.into()),
        }
    }
}
