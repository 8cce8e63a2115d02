//! # CouchSync Core
//!
//! Shared building blocks for the CouchSync companion-client sync queue:
//! configuration loading and the common error type used across the workspace.
//!
//! ## Modules
//!
//! - `config`: Environment-driven configuration loading and validation
//! - `error`: Error types and handling

pub mod config;
pub mod error;

pub use config::{
    load_dotenv, ConfigLoader, RetentionConfig, StorageConfig, SyncConfig, DEFAULT_DEBOUNCE_MS,
};
pub use error::CouchSyncError;

/// Result type alias for CouchSync operations
pub type Result<T> = std::result::Result<T, CouchSyncError>;
