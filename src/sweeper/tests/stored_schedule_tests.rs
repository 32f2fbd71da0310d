//! Drains armed by one process are seen by another sharing the store.

use std::sync::Arc;
use std::time::Duration;

use common::config::{Configuration, DatabaseConfig};
use common::model::Post;
use common::store::{ContentRepository, SqlStore};
use common::testing::{Seeder, TestConfigBuilder};
use sweeper::{DrainOutcome, Hooks, Scheduler, StoredScheduler, Sweeper, ensure_scheduled};
use tempfile::TempDir;

/// One process's view of a shared SQLite file.
struct Process {
    store: Arc<SqlStore>,
    scheduler: Arc<StoredScheduler>,
    sweeper: Sweeper,
}

impl Process {
    async fn open(dir: &TempDir, config: &Configuration) -> Self {
        let database = DatabaseConfig {
            dsn: format!("sqlite://{}", dir.path().join("content.db").display()),
            uploads_dir: dir.path().join("uploads"),
            max_connections: 2,
        };
        let store = Arc::new(
            SqlStore::connect(&database)
                .await
                .expect("Failed to open store"),
        );
        let scheduler = Arc::new(StoredScheduler::new(
            store.clone(),
            Duration::from_millis(20),
        ));
        let sweeper = Sweeper::new(store.clone(), scheduler.clone(), Hooks::new(), config)
            .expect("Failed to build sweeper");
        Self {
            store,
            scheduler,
            sweeper,
        }
    }

    async fn close(self) {
        self.store.pool().close().await;
    }
}

fn config() -> Configuration {
    let mut config = TestConfigBuilder::new().build();
    config.queue.initial_delay = Duration::from_millis(50);
    config
}

#[tokio::test]
async fn test_drain_armed_by_exited_process_reaches_worker() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = config();

    // A short-lived command handles the deletion and exits
    let command = Process::open(&dir, &config).await;
    let seed = Seeder::new(&command.store);
    seed.post(1, "post", "").await;
    seed.media(10, Some(1), "2024/05/orphan.jpg").await;
    command.store.delete_post(1).await.expect("Failed to delete post");

    let stats = command
        .sweeper
        .coordinator()
        .on_post_permanently_deleted(&Post::new(1, "post"), None)
        .await
        .expect("Failed to handle deletion");
    assert_eq!(stats.queued, 1);
    assert!(command.scheduler.is_scheduled().await);
    command.close().await;

    let worker = Process::open(&dir, &config).await;
    let status = worker.sweeper.status().await.expect("Failed to read status");
    assert_eq!(status.pending, 1);
    assert!(status.scheduled);
    assert!(status.next_run.is_some());

    tokio::time::timeout(Duration::from_secs(5), worker.scheduler.wait_due())
        .await
        .expect("Armed drain never fired in the worker");
    assert!(!worker.scheduler.is_scheduled().await);

    match worker
        .sweeper
        .processor()
        .drain()
        .await
        .expect("Failed to drain")
    {
        DrainOutcome::Drained(report) => assert_eq!(report.stats.deleted, 1),
        other => panic!("Expected a drain, got {other:?}"),
    }
    assert!(
        worker
            .store
            .get_media(10)
            .await
            .expect("Failed to load media")
            .is_none()
    );
    worker.close().await;
}

#[tokio::test]
async fn test_pending_drain_is_not_duplicated_across_processes() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = config();

    let first = Process::open(&dir, &config).await;
    let second = Process::open(&dir, &config).await;

    assert!(ensure_scheduled(first.scheduler.as_ref(), Duration::from_secs(60)).await);
    assert!(!ensure_scheduled(second.scheduler.as_ref(), Duration::from_secs(1)).await);

    // An explicit earlier retry still wins
    let armed = second
        .scheduler
        .deadline()
        .await
        .expect("Failed to read schedule")
        .expect("Drain should be armed");
    second.scheduler.schedule_once(Duration::from_secs(1)).await;
    let retry = first
        .scheduler
        .deadline()
        .await
        .expect("Failed to read schedule")
        .expect("Drain should be armed");
    assert!(retry < armed);

    first.close().await;
    second.close().await;
}
