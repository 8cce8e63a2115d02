/// CouchSync Sync Queue Service
///
/// Companion-client synchronization queue for a media library host
///
/// Features:
/// - Debounced per-user aggregation of user data change notifications
/// - De-duplicated upsert queue records for a downstream client to drain
/// - Daily retention sweep pruning stale queue records
/// - SQLite persistence with one queue table per sync category
pub mod aggregator;
pub mod events;
pub mod retention;
pub mod service;
pub mod store;

pub use aggregator::ChangeAggregator;
pub use events::{
    InMemoryUserDataReader, ItemRef, SaveReason, UserDataChanged, UserDataDto, UserDataReader,
};
pub use retention::{run_retention_schedule, NoopProgress, ProgressReporter, RetentionTask};
pub use service::SyncQueueService;
pub use store::{
    QueueStore, SqliteQueueStore, StoreError, USER_DATA_QUEUE_INDEX, USER_DATA_QUEUE_TABLE,
};

/// Initialize tracing for the sync queue service
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "couchsync_sync=debug,couchsync_core=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
