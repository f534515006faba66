//! Integration tests for task persistence and restore.

mod support;

use std::sync::Arc;

use download_scheduler::{
    Database, MemorySink, SchedulerConfig, SqliteTaskSink, TaskSink, TaskStatus,
};
use support::{
    CONTENT_SIZE, FixedTransfer, StalledTransfer, USER, create_running, fast_config, request,
    scheduler_with_sink, wait_for_status,
};
use tempfile::TempDir;

#[tokio::test]
async fn test_memory_sink_tracks_transitions() {
    let sink = Arc::new(MemorySink::new());
    let scheduler = scheduler_with_sink(fast_config(), StalledTransfer::new(), sink.clone());

    let task = create_running(&scheduler, "1").await;
    assert_eq!(sink.get(&task.id).unwrap().status, TaskStatus::Downloading);

    scheduler.pause(&task.id, USER).await.unwrap();
    assert_eq!(sink.get(&task.id).unwrap().status, TaskStatus::Paused);

    scheduler.set_priority(&task.id, USER, 9).await.unwrap();
    assert_eq!(sink.get(&task.id).unwrap().priority, 9);

    scheduler.remove(&task.id, USER).await.unwrap();
    assert!(sink.is_empty());
}

#[tokio::test]
async fn test_denied_create_is_not_persisted() {
    let sink = Arc::new(MemorySink::new());
    let config = SchedulerConfig {
        max_concurrent: 1,
        ..fast_config()
    };
    let scheduler = scheduler_with_sink(config, StalledTransfer::new(), sink.clone());

    create_running(&scheduler, "1").await;
    let outcome = scheduler.create(request("2")).await.unwrap();
    assert!(outcome.task.is_none());
    assert_eq!(sink.len(), 1);
}

#[tokio::test]
async fn test_sqlite_restore_parks_running_downloads() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("tasks.db");

    let (running, paused, completed) = {
        let db = Database::new(&db_path).await.unwrap();
        let sink = Arc::new(SqliteTaskSink::new(db));
        let first = scheduler_with_sink(fast_config(), StalledTransfer::new(), sink.clone());
        let running = create_running(&first, "1").await;
        let paused = create_running(&first, "2").await;
        first.pause(&paused.id, USER).await.unwrap();
        first.shutdown();

        let finisher =
            scheduler_with_sink(fast_config(), FixedTransfer::new(CONTENT_SIZE), sink.clone());
        let completed = create_running(&finisher, "3").await;
        wait_for_status(&finisher, &completed.id, USER, TaskStatus::Completed).await;
        (running, paused, completed)
    };

    let db = Database::new(&db_path).await.unwrap();
    let sink = Arc::new(SqliteTaskSink::new(db));
    let restored = scheduler_with_sink(fast_config(), StalledTransfer::new(), sink.clone());
    assert_eq!(restored.restore_from_sink().await.unwrap(), 3);

    let was_running = restored.get(&running.id, USER).unwrap();
    assert_eq!(was_running.status, TaskStatus::Paused);
    assert!(was_running.paused_at.is_some());
    assert_eq!(
        restored.get(&paused.id, USER).unwrap().status,
        TaskStatus::Paused
    );
    let done = restored.get(&completed.id, USER).unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.transferred_bytes, CONTENT_SIZE);
    assert_eq!(restored.active_slots(), 0);
    assert_eq!(restored.active_workers(), 0);

    // The parked state is written back.
    let stored = sink.load_all().await.unwrap();
    let parked = stored.iter().find(|t| t.id == running.id).unwrap();
    assert_eq!(parked.status, TaskStatus::Paused);

    let resumed = restored.resume(&running.id, USER).await.unwrap();
    assert_eq!(resumed.status, TaskStatus::Downloading);
}

#[tokio::test]
async fn test_restore_promotes_pending_tasks() {
    let sink = Arc::new(MemorySink::new());
    let config = SchedulerConfig {
        max_concurrent: 1,
        queue_when_busy: true,
        ..fast_config()
    };

    let (running, queued) = {
        let first = scheduler_with_sink(config.clone(), StalledTransfer::new(), sink.clone());
        let running = create_running(&first, "1").await;
        let queued = first.create(request("2")).await.unwrap().task.unwrap();
        assert_eq!(queued.status, TaskStatus::Pending);
        (running, queued)
    };

    let restored = scheduler_with_sink(config, StalledTransfer::new(), sink.clone());
    assert_eq!(restored.restore_from_sink().await.unwrap(), 2);

    assert_eq!(
        restored.get(&running.id, USER).unwrap().status,
        TaskStatus::Paused
    );
    assert_eq!(
        restored.get(&queued.id, USER).unwrap().status,
        TaskStatus::Downloading
    );
    assert_eq!(sink.get(&queued.id).unwrap().status, TaskStatus::Downloading);
    assert_eq!(restored.active_slots(), 1);
}

#[tokio::test]
async fn test_restore_without_sink_is_a_no_op() {
    let scheduler = support::scheduler(fast_config(), StalledTransfer::new());
    assert_eq!(scheduler.restore_from_sink().await.unwrap(), 0);
    assert!(scheduler.list(USER).is_empty());
}
