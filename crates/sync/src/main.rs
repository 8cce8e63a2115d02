/// CouchSync Service - Main Entry Point
///
/// Starts the sync queue service and the daily retention schedule, then runs
/// until interrupted. The notification bus and user data reader are wired to
/// in-process defaults here; an embedding host replaces both.
use couchsync_core::{load_dotenv, ConfigLoader, RetentionConfig, StorageConfig, SyncConfig};
use couchsync_sync::{
    init_tracing, run_retention_schedule, InMemoryUserDataReader, QueueStore, RetentionTask,
    SyncQueueService, UserDataReader,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    load_dotenv();

    let storage = StorageConfig::from_env()?;
    storage.validate()?;
    let sync = SyncConfig::from_env()?;
    sync.validate()?;
    let retention = RetentionConfig::from_env()?;
    retention.validate()?;

    tracing::info!(
        "CouchSync service starting (data dir: {})",
        storage.data_dir.display()
    );

    let (events, _) = broadcast::channel(1024);
    let reader: Arc<dyn UserDataReader> = Arc::new(InMemoryUserDataReader::new());

    let (service, store) = SyncQueueService::run(&storage, &sync, &events, reader).await?;

    let shutdown = CancellationToken::new();
    let task = Arc::new(RetentionTask::new(
        Arc::clone(&store) as Arc<dyn QueueStore>,
        retention,
    ));
    let schedule = tokio::spawn(run_retention_schedule(task, shutdown.child_token()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    shutdown.cancel();
    service.shutdown();
    let _ = schedule.await;

    Ok(())
}
