//! End-to-end tests for the debounced sync queue flow:
//! notification bus -> aggregator -> flush -> SQLite queue table.

use async_trait::async_trait;
use couchsync_core::SyncConfig;
use couchsync_sync::{
    InMemoryUserDataReader, ItemRef, QueueStore, SaveReason, SqliteQueueStore, SyncQueueService,
    UserDataChanged, UserDataDto, UserDataReader, USER_DATA_QUEUE_INDEX, USER_DATA_QUEUE_TABLE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

const QUIET: Duration = Duration::from_millis(500);

async fn start_service(
    reader: Arc<dyn UserDataReader>,
) -> (
    SyncQueueService,
    Arc<SqliteQueueStore>,
    broadcast::Sender<UserDataChanged>,
) {
    let store = Arc::new(SqliteQueueStore::open_in_memory().unwrap());
    let (events, _) = broadcast::channel(64);

    let service = SyncQueueService::start(
        Arc::clone(&store) as Arc<dyn QueueStore>,
        reader,
        &events,
        &SyncConfig { debounce: QUIET },
    )
    .await
    .unwrap();

    (service, store, events)
}

/// Wait (in virtual time) until the queue table holds `expected` rows.
async fn wait_for_rows(store: &SqliteQueueStore, expected: usize) {
    for _ in 0..200 {
        tokio::time::sleep(Duration::from_millis(25)).await;
        if store.count(USER_DATA_QUEUE_TABLE).unwrap() >= expected {
            return;
        }
    }
}

fn rows_for_user(store: &SqliteQueueStore, user_id: Uuid) -> usize {
    let count: i64 = store
        .connection()
        .lock()
        .query_row(
            &format!("SELECT COUNT(*) FROM {USER_DATA_QUEUE_TABLE} WHERE user_id = ?1"),
            [user_id.simple().to_string()],
            |row| row.get(0),
        )
        .unwrap();
    count as usize
}

fn payload_for_item(store: &SqliteQueueStore, user_id: Uuid, item_id: Uuid) -> UserDataDto {
    let payload: String = store
        .connection()
        .lock()
        .query_row(
            &format!(
                "SELECT payload FROM {USER_DATA_QUEUE_TABLE} WHERE user_id = ?1 AND item_id = ?2"
            ),
            [user_id.simple().to_string(), item_id.simple().to_string()],
            |row| row.get(0),
        )
        .unwrap();
    serde_json::from_str(&payload).unwrap()
}

#[tokio::test(start_paused = true)]
async fn burst_coalesces_into_one_deduplicated_flush_with_final_state() {
    let reader = Arc::new(InMemoryUserDataReader::new());
    let (service, store, events) = start_service(Arc::clone(&reader) as Arc<dyn UserDataReader>).await;

    let user = Uuid::new_v4();
    let item_a = Uuid::new_v4();
    let parent_b = Uuid::new_v4();
    let item_c = Uuid::new_v4();

    // t=0ms: watched toggled on A (parent B)
    reader.set(
        user,
        item_a,
        UserDataDto {
            played: true,
            play_count: 1,
            ..Default::default()
        },
    );
    events
        .send(UserDataChanged {
            user_id: user,
            item: ItemRef::with_parent(item_a, parent_b),
            reason: SaveReason::TogglePlayed,
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // t=100ms: watched toggled back on A; only this final state may persist
    reader.set(
        user,
        item_a,
        UserDataDto {
            played: false,
            play_count: 1,
            ..Default::default()
        },
    );
    events
        .send(UserDataChanged {
            user_id: user,
            item: ItemRef::with_parent(item_a, parent_b),
            reason: SaveReason::TogglePlayed,
        })
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // t=200ms: favorite toggled on C (no parent)
    reader.set(
        user,
        item_c,
        UserDataDto {
            is_favorite: true,
            ..Default::default()
        },
    );
    events
        .send(UserDataChanged {
            user_id: user,
            item: ItemRef::new(item_c),
            reason: SaveReason::UpdateUserRating,
        })
        .unwrap();

    // One flush at ~t=700ms containing deduplicated {A, B, C}
    wait_for_rows(&store, 3).await;
    assert_eq!(store.count(USER_DATA_QUEUE_TABLE).unwrap(), 3);
    assert_eq!(rows_for_user(&store, user), 3);

    let dto_a = payload_for_item(&store, user, item_a);
    assert!(!dto_a.played, "A must carry its final state at fetch time");
    assert_eq!(dto_a.item_id, item_a.simple().to_string());

    let dto_b = payload_for_item(&store, user, parent_b);
    assert_eq!(dto_b.item_id, parent_b.simple().to_string());

    let dto_c = payload_for_item(&store, user, item_c);
    assert!(dto_c.is_favorite);

    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn playback_progress_events_are_never_queued() {
    let reader = Arc::new(InMemoryUserDataReader::new());
    let (service, store, events) = start_service(reader).await;

    let user = Uuid::new_v4();
    for _ in 0..10 {
        events
            .send(UserDataChanged {
                user_id: user,
                item: ItemRef::new(Uuid::new_v4()),
                reason: SaveReason::PlaybackProgress,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Well past any quiet period; nothing may have been flushed
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(store.count(USER_DATA_QUEUE_TABLE).unwrap(), 0);

    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn repeated_item_changes_persist_exactly_once() {
    let reader = Arc::new(InMemoryUserDataReader::new());
    let (service, store, events) = start_service(reader).await;

    let user = Uuid::new_v4();
    let item = Uuid::new_v4();

    for _ in 0..8 {
        events
            .send(UserDataChanged {
                user_id: user,
                item: ItemRef::new(item),
                reason: SaveReason::TogglePlayed,
            })
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
    }

    wait_for_rows(&store, 1).await;
    assert_eq!(store.count(USER_DATA_QUEUE_TABLE).unwrap(), 1);

    service.shutdown();
}

/// Reader that fails for one specific user and answers normally for others
struct FailingReader {
    failing_user: Uuid,
}

#[async_trait]
impl UserDataReader for FailingReader {
    async fn user_data(&self, user_id: Uuid, _item_id: Uuid) -> anyhow::Result<UserDataDto> {
        if user_id == self.failing_user {
            anyhow::bail!("user data unavailable");
        }
        Ok(UserDataDto::default())
    }
}

#[tokio::test(start_paused = true)]
async fn failed_user_batch_does_not_abort_other_users() {
    let failing_user = Uuid::new_v4();
    let healthy_user = Uuid::new_v4();
    let reader = Arc::new(FailingReader { failing_user });
    let (service, store, events) = start_service(reader).await;

    for user in [failing_user, healthy_user] {
        events
            .send(UserDataChanged {
                user_id: user,
                item: ItemRef::new(Uuid::new_v4()),
                reason: SaveReason::TogglePlayed,
            })
            .unwrap();
    }

    wait_for_rows(&store, 1).await;
    assert_eq!(rows_for_user(&store, healthy_user), 1);
    // The failing user's cycle is dropped, not retried
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(rows_for_user(&store, failing_user), 0);

    service.shutdown();
}

#[tokio::test(start_paused = true)]
async fn events_after_shutdown_are_dropped() {
    let reader = Arc::new(InMemoryUserDataReader::new());
    let (service, store, events) = start_service(reader).await;

    service.shutdown();

    let _ = events.send(UserDataChanged {
        user_id: Uuid::new_v4(),
        item: ItemRef::new(Uuid::new_v4()),
        reason: SaveReason::TogglePlayed,
    });

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(store.count(USER_DATA_QUEUE_TABLE).unwrap(), 0);
}

#[tokio::test]
async fn create_table_is_idempotent_across_restarts() {
    let tmp = tempfile::tempdir().unwrap();
    let db_path = tmp.path().join("couchsync.db");

    {
        let store = Arc::new(SqliteQueueStore::open(&db_path).unwrap());
        store
            .create_table(USER_DATA_QUEUE_TABLE, USER_DATA_QUEUE_INDEX)
            .await
            .unwrap();
        store
            .upsert_user_data(USER_DATA_QUEUE_TABLE, "u", "i", "{}")
            .await
            .unwrap();
    }

    let store = Arc::new(SqliteQueueStore::open(&db_path).unwrap());
    store
        .create_table(USER_DATA_QUEUE_TABLE, USER_DATA_QUEUE_INDEX)
        .await
        .unwrap();
    assert_eq!(store.count(USER_DATA_QUEUE_TABLE).unwrap(), 1);
}
