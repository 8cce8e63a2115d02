//! SQLite-backed queue store
//!
//! One queue table per sync category, each row keyed uniquely by
//! (user id, item id) with upsert semantics: the queue holds at most one live
//! record per item per user, carrying the latest synced state for a
//! downstream companion client to drain.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Queue table for per-user item state changes
pub const USER_DATA_QUEUE_TABLE: &str = "user_data_changed_queue";

/// Unique index enforcing one row per (user id, item id)
pub const USER_DATA_QUEUE_INDEX: &str = "udcq_user_item";

/// Naming convention for tables managed by the retention sweep
const QUEUE_TABLE_SUFFIX: &str = "_queue";

const DB_FILE_NAME: &str = "couchsync.db";

/// Queue store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Data directory error: {0}")]
    DataDir(#[from] std::io::Error),

    #[error("Invalid table name: {0}")]
    InvalidTable(String),
}

/// Persistence gateway for sync queue tables
///
/// Implementations must be safe for concurrent calls; callers do not
/// serialize access beyond what the implementation requires.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Create a queue table and its (user_id, item_id) unique index if absent
    async fn create_table(&self, table: &str, unique_index: &str) -> Result<(), StoreError>;

    /// Upsert one queue record, stamping the current UTC time.
    /// Returns the number of rows affected.
    async fn upsert_user_data(
        &self,
        table: &str,
        user_id: &str,
        item_id: &str,
        payload: &str,
    ) -> Result<usize, StoreError>;

    /// List all queue tables subject to retention
    async fn retention_tables(&self) -> Result<Vec<String>, StoreError>;

    /// Delete records strictly older than the cutoff.
    /// Returns the number of rows deleted.
    async fn delete_older_than(
        &self,
        table: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    /// Store-wide compaction
    async fn cleanup(&self) -> Result<(), StoreError>;
}

/// SQLite implementation of the queue store
pub struct SqliteQueueStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteQueueStore {
    /// Ensure the data directory exists and return the database file path.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::DataDir` if the directory cannot be created.
    pub fn check_create_files(data_dir: &Path) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(data_dir)?;
        Ok(data_dir.join(DB_FILE_NAME))
    }

    /// Open the queue database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path.as_ref())?;
        info!("Opened sync queue database at {}", path.as_ref().display());
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory queue database (for testing)
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    /// Shared handle to the underlying connection
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.db)
    }

    /// Number of rows currently queued in a table
    pub fn count(&self, table: &str) -> Result<usize, StoreError> {
        validate_table_name(table)?;
        let db = self.db.lock();
        let count: i64 = db.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }
}

/// Table names are interpolated into SQL; restrict them to identifier characters.
fn validate_table_name(table: &str) -> Result<(), StoreError> {
    let valid = !table.is_empty()
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn create_table(&self, table: &str, unique_index: &str) -> Result<(), StoreError> {
        validate_table_name(table)?;
        validate_table_name(unique_index)?;

        let db = self.db.lock();
        db.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    user_id TEXT NOT NULL,
                    item_id TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                )"
            ),
            [],
        )?;
        db.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS {unique_index} ON {table}(user_id, item_id)"
            ),
            [],
        )?;

        info!("Queue table '{}' ready", table);
        Ok(())
    }

    async fn upsert_user_data(
        &self,
        table: &str,
        user_id: &str,
        item_id: &str,
        payload: &str,
    ) -> Result<usize, StoreError> {
        validate_table_name(table)?;
        let updated_at = Utc::now().timestamp_millis();

        let db = self.db.lock();
        let rows = db.execute(
            &format!(
                "INSERT INTO {table} (user_id, item_id, payload, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, item_id) DO UPDATE SET
                     payload = excluded.payload,
                     updated_at = excluded.updated_at"
            ),
            params![user_id, item_id, payload, updated_at],
        )?;

        debug!(
            "Upserted queue record (table: {}, user: {}, item: {})",
            table, user_id, item_id
        );
        Ok(rows)
    }

    async fn retention_tables(&self) -> Result<Vec<String>, StoreError> {
        let db = self.db.lock();
        let mut stmt = db.prepare(
            "SELECT name FROM sqlite_master
             WHERE type = 'table' AND name LIKE ?1
             ORDER BY name",
        )?;

        let rows = stmt.query_map([format!("%{QUEUE_TABLE_SUFFIX}")], |row| {
            row.get::<_, String>(0)
        })?;

        let mut tables = Vec::new();
        for row in rows {
            tables.push(row?);
        }
        Ok(tables)
    }

    async fn delete_older_than(
        &self,
        table: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        validate_table_name(table)?;
        let db = self.db.lock();
        let rows = db.execute(
            &format!("DELETE FROM {table} WHERE updated_at < ?1"),
            params![cutoff.timestamp_millis()],
        )?;
        Ok(rows)
    }

    async fn cleanup(&self) -> Result<(), StoreError> {
        let db = self.db.lock();
        db.execute_batch("VACUUM")?;
        debug!("Queue database compacted");
        Ok(())
    }
}
