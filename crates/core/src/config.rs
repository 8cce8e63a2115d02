//! Configuration loader for CouchSync services
//!
//! Unified configuration loading with environment variable parsing, validation,
//! and `.env` file support. All configuration uses the `COUCHSYNC_` prefix for
//! environment variables.
//!
//! # Example
//!
//! ```no_run
//! use couchsync_core::config::{load_dotenv, ConfigLoader, RetentionConfig, StorageConfig, SyncConfig};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Load .env file (optional)
//! load_dotenv();
//!
//! let storage = StorageConfig::from_env()?;
//! let sync = SyncConfig::from_env()?;
//! let retention = RetentionConfig::from_env()?;
//!
//! storage.validate()?;
//! sync.validate()?;
//! retention.validate()?;
//! # Ok(())
//! # }
//! ```

use crate::error::CouchSyncError;
use std::path::PathBuf;
use std::time::Duration;

/// Default debounce quiet period in milliseconds
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Configuration loader trait
///
/// Provides standardized methods for loading and validating configuration from
/// environment variables.
pub trait ConfigLoader: Sized {
    /// Load configuration from environment variables
    ///
    /// Reads environment variables with the `COUCHSYNC_` prefix and constructs
    /// a configuration instance with defaults for missing optional values.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if environment variable values cannot be
    /// parsed.
    fn from_env() -> Result<Self, CouchSyncError>;

    /// Validate configuration values
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if any validation check fails.
    fn validate(&self) -> Result<(), CouchSyncError>;
}

/// Storage configuration
///
/// Location of the on-disk sync queue database.
///
/// # Environment Variables
///
/// - `COUCHSYNC_DATA_DIR` (optional): Directory holding the queue database
///   (default: "./data")
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Directory holding the queue database file
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl ConfigLoader for StorageConfig {
    fn from_env() -> Result<Self, CouchSyncError> {
        let data_dir = std::env::var("COUCHSYNC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| StorageConfig::default().data_dir);

        Ok(Self { data_dir })
    }

    fn validate(&self) -> Result<(), CouchSyncError> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(CouchSyncError::config(
                "data_dir must not be empty",
                "COUCHSYNC_DATA_DIR",
            ));
        }
        Ok(())
    }
}

/// Sync aggregation configuration
///
/// # Environment Variables
///
/// - `COUCHSYNC_DEBOUNCE_MS` (optional): Debounce quiet period in milliseconds
///   (default: 500)
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Quiet period the aggregator waits for before flushing a batch
    pub debounce: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

impl ConfigLoader for SyncConfig {
    fn from_env() -> Result<Self, CouchSyncError> {
        let debounce_ms = parse_env_var("COUCHSYNC_DEBOUNCE_MS", DEFAULT_DEBOUNCE_MS)?;

        Ok(Self {
            debounce: Duration::from_millis(debounce_ms),
        })
    }

    fn validate(&self) -> Result<(), CouchSyncError> {
        if self.debounce.is_zero() {
            return Err(CouchSyncError::config(
                "debounce must be greater than 0 milliseconds",
                "COUCHSYNC_DEBOUNCE_MS",
            ));
        }
        Ok(())
    }
}

/// Retention sweep configuration
///
/// The retention window is carried as a string and parsed only when a sweep
/// runs: an unparseable or zero value disables retention for that run rather
/// than failing configuration loading.
///
/// # Environment Variables
///
/// - `COUCHSYNC_RETENTION_DAYS` (optional): Queue entries older than this many
///   days are pruned; "0" or a non-numeric value disables pruning (default: "0")
/// - `COUCHSYNC_RETENTION_TIME` (optional): UTC time of day for the daily
///   sweep, in HH:MM (default: "00:01")
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Retention window in days, unparsed
    pub retention_days: String,
    /// UTC time of day the daily sweep runs at, "HH:MM"
    pub run_at: String,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_days: "0".to_string(),
            run_at: "00:01".to_string(),
        }
    }
}

impl RetentionConfig {
    /// Parse the configured daily run time into (hour, minute)
    ///
    /// # Errors
    ///
    /// Returns a `ConfigurationError` if the value is not a valid HH:MM time.
    pub fn run_at_hour_minute(&self) -> Result<(u32, u32), CouchSyncError> {
        let invalid = || {
            CouchSyncError::config(
                format!("Invalid run_at '{}': expected HH:MM", self.run_at),
                "COUCHSYNC_RETENTION_TIME",
            )
        };

        let (hour, minute) = self.run_at.split_once(':').ok_or_else(invalid)?;
        let hour: u32 = hour.parse().map_err(|_| invalid())?;
        let minute: u32 = minute.parse().map_err(|_| invalid())?;

        if hour > 23 || minute > 59 {
            return Err(invalid());
        }
        Ok((hour, minute))
    }
}

impl ConfigLoader for RetentionConfig {
    fn from_env() -> Result<Self, CouchSyncError> {
        let retention_days = std::env::var("COUCHSYNC_RETENTION_DAYS")
            .unwrap_or_else(|_| RetentionConfig::default().retention_days);

        let run_at = std::env::var("COUCHSYNC_RETENTION_TIME")
            .unwrap_or_else(|_| RetentionConfig::default().run_at);

        Ok(Self {
            retention_days,
            run_at,
        })
    }

    fn validate(&self) -> Result<(), CouchSyncError> {
        // retention_days is intentionally not validated here: a bad value
        // disables the sweep at run time instead of blocking startup.
        self.run_at_hour_minute().map(|_| ())
    }
}

/// Helper function to parse environment variable with default value
///
/// # Errors
///
/// Returns a `ConfigurationError` if the value cannot be parsed
fn parse_env_var<T>(key: &str, default: T) -> Result<T, CouchSyncError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    std::env::var(key)
        .ok()
        .map(|v| {
            v.parse::<T>().map_err(|e| CouchSyncError::ConfigurationError {
                message: format!("Failed to parse {}: {}", key, e),
                key: Some(key.to_string()),
            })
        })
        .unwrap_or(Ok(default))
}

/// Load .env file if present
///
/// Convenience wrapper over dotenvy that ignores a missing .env file.
pub fn load_dotenv() {
    if let Err(e) = dotenvy::dotenv() {
        if !e.to_string().contains("not found") {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }
}
