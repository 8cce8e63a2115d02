//! User data change events and host-boundary traits
//!
//! The host media server publishes a `UserDataChanged` notification every time
//! it saves per-user state for a library item. The aggregator consumes these
//! over a broadcast channel and reads the item's current state back through
//! the `UserDataReader` boundary when a batch is flushed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Why the host saved user data for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveReason {
    PlaybackStart,
    /// Periodic position heartbeat during playback. Excluded from sync.
    PlaybackProgress,
    PlaybackFinished,
    TogglePlayed,
    UpdateUserRating,
    Import,
}

/// Reference to a changed library item
///
/// Carries the parent container id when the item has one, so rollup
/// indicators on folders and series get queue records of their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub id: Uuid,
    pub parent_id: Option<Uuid>,
}

impl ItemRef {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            parent_id: None,
        }
    }

    pub fn with_parent(id: Uuid, parent_id: Uuid) -> Self {
        Self {
            id,
            parent_id: Some(parent_id),
        }
    }
}

/// Notification payload published by the host when user data is saved
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDataChanged {
    pub user_id: Uuid,
    pub item: ItemRef,
    pub reason: SaveReason,
}

/// Per-user state of a library item, as persisted into the queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserDataDto {
    /// Stamped by the flush dispatcher before persistence
    pub item_id: String,
    pub played: bool,
    pub play_count: u32,
    pub is_favorite: bool,
    pub playback_position_ticks: i64,
    pub last_played_date: Option<DateTime<Utc>>,
}

impl Default for UserDataDto {
    fn default() -> Self {
        Self {
            item_id: String::new(),
            played: false,
            play_count: 0,
            is_favorite: false,
            playback_position_ticks: 0,
            last_played_date: None,
        }
    }
}

/// Read access to the host's current per-user item state
#[async_trait]
pub trait UserDataReader: Send + Sync {
    /// Fetch the current user data for an item. The flush dispatcher calls
    /// this once per deduplicated item, so the returned state is the latest
    /// queryable one rather than any intermediate value.
    async fn user_data(&self, user_id: Uuid, item_id: Uuid) -> anyhow::Result<UserDataDto>;
}

/// In-memory reader (for testing and embedding without a live host)
///
/// Returns a default unplayed state for entries that were never set.
#[derive(Default)]
pub struct InMemoryUserDataReader {
    entries: RwLock<HashMap<(Uuid, Uuid), UserDataDto>>,
}

impl InMemoryUserDataReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the current state returned for a (user, item) pair
    pub fn set(&self, user_id: Uuid, item_id: Uuid, dto: UserDataDto) {
        self.entries.write().insert((user_id, item_id), dto);
    }
}

#[async_trait]
impl UserDataReader for InMemoryUserDataReader {
    async fn user_data(&self, user_id: Uuid, item_id: Uuid) -> anyhow::Result<UserDataDto> {
        Ok(self
            .entries
            .read()
            .get(&(user_id, item_id))
            .cloned()
            .unwrap_or_default())
    }
}
