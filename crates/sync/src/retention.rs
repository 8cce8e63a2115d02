//! Scheduled retention sweep for queue tables
//!
//! Once a day, every queue table is pruned of records older than the
//! configured retention window. The window is read as a string and parsed
//! per run: an unparseable or zero value disables the sweep for that run
//! without touching storage.

use crate::store::QueueStore;
use chrono::{DateTime, Datelike, NaiveTime, TimeZone, Utc};
use couchsync_core::RetentionConfig;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Progress sink for a retention run, reporting 0-100
pub trait ProgressReporter: Send + Sync {
    fn report(&self, percent: f64);
}

/// No-op reporter used when no progress surface is wired up
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _percent: f64) {}
}

/// Prunes stale queue records across all managed queue tables
pub struct RetentionTask {
    store: Arc<dyn QueueStore>,
    config: RetentionConfig,
}

impl RetentionTask {
    pub fn new(store: Arc<dyn QueueStore>, config: RetentionConfig) -> Self {
        Self { store, config }
    }

    /// Run one retention sweep.
    ///
    /// Idempotent: immediately re-running with no new writes deletes nothing.
    /// Errors inside the loop end the run early and are only observable in
    /// the logs; the next scheduled run catches up. Cancellation stops the
    /// loop before the next table. The store-wide compaction runs on the
    /// success, error, and cancellation paths alike.
    pub async fn execute(&self, cancel: &CancellationToken, progress: &dyn ProgressReporter) {
        let Some(retention_days) = parse_retention_days(&self.config.retention_days) else {
            info!("Retention sweep skipped: retention window is zero or not numeric");
            return;
        };

        let cutoff = retention_cutoff(Utc::now(), retention_days);
        info!(
            "Retention sweep started, pruning records older than {}",
            cutoff.format("%Y-%m-%dT%H:%M:%SZ")
        );
        let total_start = Instant::now();

        if let Err(e) = self.prune_tables(cutoff, cancel, progress).await {
            info!("Retention sweep ended early: {}", e);
        }

        if let Err(e) = self.store.cleanup().await {
            warn!("Queue store cleanup failed: {}", e);
        }

        info!(
            "Retention sweep finished in {:.2?}",
            total_start.elapsed()
        );
    }

    async fn prune_tables(
        &self,
        cutoff: DateTime<Utc>,
        cancel: &CancellationToken,
        progress: &dyn ProgressReporter,
    ) -> Result<(), crate::store::StoreError> {
        let tables = self.store.retention_tables().await?;
        let total = tables.len();

        for (done, table) in tables.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(
                    "Retention sweep cancelled after {} of {} tables",
                    done, total
                );
                return Ok(());
            }

            let table_start = Instant::now();
            let removed = self.store.delete_older_than(table, cutoff).await?;
            info!(
                "Deleted {} records from table '{}' in {:.2?}",
                removed,
                table,
                table_start.elapsed()
            );
            progress.report(((done + 1) * 100 / total) as f64);
        }
        Ok(())
    }
}

/// Run the retention task once a day at the configured UTC time of day.
///
/// Runs never overlap: the next sleep starts only after the previous run
/// returns. Cancellation exits the loop.
pub async fn run_retention_schedule(task: Arc<RetentionTask>, cancel: CancellationToken) {
    let (hour, minute) = match task.config.run_at_hour_minute() {
        Ok(at) => at,
        Err(e) => {
            error!("Retention schedule not started: {}", e);
            return;
        }
    };
    info!(
        "Retention schedule active: daily at {:02}:{:02} UTC",
        hour, minute
    );

    loop {
        let wait = duration_until_next(Utc::now(), hour, minute);
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Retention schedule stopped");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }
        task.execute(&cancel, &NoopProgress).await;
    }
}

/// Parse the configured retention window. `None` disables the sweep:
/// non-numeric input and an explicit zero both mean "keep everything".
/// Negative values pass through unclamped.
fn parse_retention_days(raw: &str) -> Option<i64> {
    match raw.trim().parse::<i64>() {
        Ok(0) | Err(_) => None,
        Ok(days) => Some(days),
    }
}

/// Midnight of the current UTC day, minus the retention window
fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    midnight - chrono::Duration::days(retention_days)
}

/// Time until the next occurrence of the given UTC time of day
fn duration_until_next(now: DateTime<Utc>, hour: u32, minute: u32) -> Duration {
    let today = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), hour, minute, 0)
        .single()
        .unwrap_or(now);
    let next = if today > now {
        today
    } else {
        today + chrono::Duration::days(1)
    };
    (next - now).to_std().unwrap_or(Duration::from_secs(60))
}
