//! Change aggregation and debounced flush
//!
//! Turns a stream of per-item user data notifications into a bounded number
//! of flush operations regardless of burst rate. Changes are buffered per
//! user under a single lock shared with the debounce timer's arming decision;
//! when the quiet period elapses with no further events the entire buffer is
//! snapshotted, deduplicated, and written through the queue store.

use crate::events::{ItemRef, SaveReason, UserDataReader};
use crate::store::QueueStore;
use futures::future::try_join_all;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};
use uuid::Uuid;

/// Pending changes and the debounce timer handle, guarded together so timer
/// arming decisions cannot race with concurrent notification handling.
#[derive(Default)]
struct AggregatorState {
    pending: HashMap<Uuid, Vec<ItemRef>>,
    timer: Option<JoinHandle<()>>,
}

/// Debounced per-user change aggregator
///
/// Cheap to clone; clones share the same pending buffer and timer.
#[derive(Clone)]
pub struct ChangeAggregator {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<AggregatorState>,
    store: Arc<dyn QueueStore>,
    reader: Arc<dyn UserDataReader>,
    table: String,
    quiet_period: Duration,
    cancel: CancellationToken,
}

impl ChangeAggregator {
    pub fn new(
        store: Arc<dyn QueueStore>,
        reader: Arc<dyn UserDataReader>,
        table: impl Into<String>,
        quiet_period: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(AggregatorState::default()),
                store,
                reader,
                table: table.into(),
                quiet_period,
                cancel,
            }),
        }
    }

    /// Buffer one change notification and arm (or reset) the debounce timer.
    ///
    /// Playback-progress heartbeats are excluded from sync entirely: they
    /// neither buffer the item nor touch the timer. For all other reasons the
    /// item is appended to the user's pending list together with a synthetic
    /// entry for its parent container, and the timer is reset to the full
    /// quiet period. A continuous burst keeps deferring the flush, bounded
    /// only by natural gaps in activity.
    pub fn on_user_data_saved(&self, user_id: Uuid, item: ItemRef, reason: SaveReason) {
        if reason == SaveReason::PlaybackProgress {
            return;
        }

        let mut state = self.inner.state.lock();

        let entry = state.pending.entry(user_id).or_default();
        entry.push(item);
        if let Some(parent_id) = item.parent_id {
            entry.push(ItemRef::new(parent_id));
        }

        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        let inner = Arc::clone(&self.inner);
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(inner.quiet_period).await;
            Inner::fire(&inner);
        }));
    }

    /// Tear the aggregator down: trigger cancellation and disarm any pending
    /// timer. Idempotent. An in-flight flush observes cancellation at its
    /// next user boundary; buffered changes that never flushed are dropped.
    pub fn shutdown(&self) {
        if !self.inner.cancel.is_cancelled() {
            self.inner.cancel.cancel();
        }
        let mut state = self.inner.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.pending.clear();
    }
}

impl Inner {
    /// Timer expiry: snapshot-and-clear the buffer, disarm the timer, and
    /// hand the snapshot to a flush task. The handle is cleared before any
    /// flush logic runs, so a fresh burst can arm a new timer immediately and
    /// re-entrant firing is impossible.
    fn fire(inner: &Arc<Inner>) {
        let changes = {
            let mut state = inner.state.lock();
            state.timer = None;
            std::mem::take(&mut state.pending)
        };
        if changes.is_empty() {
            return;
        }

        let inner = Arc::clone(inner);
        tokio::spawn(async move {
            inner.flush(changes).await;
        });
    }

    /// Persist one debounce cycle's snapshot, one user at a time.
    ///
    /// A failed user batch is logged and dropped as a whole (at-most-once per
    /// cycle, nothing is re-queued); remaining users still proceed.
    /// Cancellation is checked before each user's batch and abandons all
    /// untouched users quietly.
    async fn flush(&self, changes: HashMap<Uuid, Vec<ItemRef>>) {
        for (user_id, items) in changes {
            if self.cancel.is_cancelled() {
                debug!("Flush abandoned: shutdown in progress");
                return;
            }

            debug!("Starting to save changed items for user {}", user_id);
            if let Err(e) = self.flush_user(user_id, &items).await {
                error!("Failed to persist changes for user {}: {:#}", user_id, e);
            }
        }
    }

    async fn flush_user(&self, user_id: Uuid, items: &[ItemRef]) -> anyhow::Result<()> {
        // Dedupe by item identity; only the final queryable state matters,
        // so one read per identity is enough.
        let mut seen = HashSet::new();
        let unique: Vec<Uuid> = items
            .iter()
            .map(|item| item.id)
            .filter(|id| seen.insert(*id))
            .collect();

        let mut dtos = Vec::with_capacity(unique.len());
        for item_id in unique {
            let mut dto = self.reader.user_data(user_id, item_id).await?;
            dto.item_id = item_id.simple().to_string();
            dtos.push(dto);
        }

        let user = user_id.simple().to_string();
        let upserts = dtos.iter().map(|dto| async {
            let payload = serde_json::to_string(dto)?;
            self.store
                .upsert_user_data(&self.table, &user, &dto.item_id, &payload)
                .await?;
            Ok::<_, anyhow::Error>(())
        });
        try_join_all(upserts).await?;

        debug!("Persisted {} queue records for user {}", dtos.len(), user);
        Ok(())
    }
}
