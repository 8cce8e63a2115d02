//! Sync queue service lifecycle
//!
//! Wires the notification bus to the change aggregator and owns startup and
//! teardown. Startup is fail-fast: if the data files, the connection, or the
//! queue table cannot be set up, the service refuses to start.

use crate::aggregator::ChangeAggregator;
use crate::events::{UserDataChanged, UserDataReader};
use crate::store::{QueueStore, SqliteQueueStore, USER_DATA_QUEUE_INDEX, USER_DATA_QUEUE_TABLE};
use anyhow::Context;
use couchsync_core::{StorageConfig, SyncConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Running sync queue service
pub struct SyncQueueService {
    aggregator: ChangeAggregator,
    cancel: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl SyncQueueService {
    /// Open the on-disk queue store and start the service.
    ///
    /// Returns the running service together with the store handle so the
    /// caller can hand the store to the retention task.
    ///
    /// # Errors
    ///
    /// Fails fast when the data directory, the database connection, or the
    /// queue table cannot be set up.
    pub async fn run(
        storage: &StorageConfig,
        sync: &SyncConfig,
        events: &broadcast::Sender<UserDataChanged>,
        reader: Arc<dyn UserDataReader>,
    ) -> anyhow::Result<(Self, Arc<SqliteQueueStore>)> {
        let db_path = SqliteQueueStore::check_create_files(&storage.data_dir)
            .with_context(|| format!("could not prepare data dir {}", storage.data_dir.display()))?;
        let store =
            Arc::new(SqliteQueueStore::open(&db_path).context("could not open the queue database")?);

        let service = Self::start(
            Arc::clone(&store) as Arc<dyn QueueStore>,
            reader,
            events,
            sync,
        )
        .await?;
        Ok((service, store))
    }

    /// Start the service against an already-open store.
    pub async fn start(
        store: Arc<dyn QueueStore>,
        reader: Arc<dyn UserDataReader>,
        events: &broadcast::Sender<UserDataChanged>,
        sync: &SyncConfig,
    ) -> anyhow::Result<Self> {
        info!("User sync notification startup...");

        store
            .create_table(USER_DATA_QUEUE_TABLE, USER_DATA_QUEUE_INDEX)
            .await
            .context("could not create the user data queue table")?;

        let cancel = CancellationToken::new();
        let aggregator = ChangeAggregator::new(
            store,
            reader,
            USER_DATA_QUEUE_TABLE,
            sync.debounce,
            cancel.child_token(),
        );

        let mut rx = events.subscribe();
        let agg = aggregator.clone();
        let consumer = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        agg.on_user_data_saved(event.user_id, event.item, event.reason);
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!("Dropped {} change notifications (consumer lagging)", missed);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(Self {
            aggregator,
            cancel,
            consumer: Mutex::new(Some(consumer)),
        })
    }

    /// Tear the service down. Idempotent and safe to call multiple times.
    ///
    /// Notifications arriving after the subscription is dropped are simply
    /// lost; an in-flight flush observes cancellation at its next checkpoint.
    pub fn shutdown(&self) {
        if let Some(consumer) = self.consumer.lock().take() {
            consumer.abort();
        }
        if !self.cancel.is_cancelled() {
            self.cancel.cancel();
        }
        self.aggregator.shutdown();
        info!("User sync notification stopped");
    }
}
