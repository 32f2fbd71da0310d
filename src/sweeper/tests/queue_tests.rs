//! Deletion queue drains: ordering, budgets, locking and rescheduling.

mod support;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::config::Configuration;
use common::model::{MediaId, MediaObject, Post, PostId, QueueItem};
use common::store::{
    ContentRepository, QUEUE_KEY, QUEUE_LOCK_NAME, ReferenceProbe, SqlStore, StoreError,
    StoreResult, SweepStateStore,
};
use common::testing::TestConfigBuilder;
use mockall::mock;
use mockall::predicate::eq;
use support::Harness;
use sweeper::{
    CandidateResolver, DrainOutcome, Hooks, QueueLock, QueueProcessor, Scheduler, SweepError,
    SweepMetrics,
};

mock! {
    pub DrainTrigger {}

    #[async_trait]
    impl Scheduler for DrainTrigger {
        async fn schedule_once(&self, delay: Duration);
        async fn is_scheduled(&self) -> bool;
    }
}

/// Queue `count` unreferenced media, one per post, in id order.
async fn queue_orphans(harness: &Harness, count: i64) -> Vec<QueueItem> {
    let now = Utc::now();
    let mut items = Vec::new();
    for i in 1..=count {
        let media_id = 100 + i;
        harness.media_with_file(media_id, Some(i)).await;
        items.push(QueueItem::new(media_id, i, now));
    }
    harness
        .store
        .append_queue(&items)
        .await
        .expect("Failed to append queue");
    items
}

fn drained(outcome: DrainOutcome) -> sweeper::DrainReport {
    match outcome {
        DrainOutcome::Drained(report) => report,
        other => panic!("Expected a drain, got {other:?}"),
    }
}

#[tokio::test]
async fn test_empty_queue_is_idle() {
    let harness = Harness::new(TestConfigBuilder::new().build()).await;

    let outcome = harness
        .sweeper
        .processor()
        .drain()
        .await
        .expect("Failed to drain");
    assert_eq!(outcome, DrainOutcome::Idle);
    assert!(!harness.sweeper.status().await.expect("Failed to get status").scheduled);
}

#[tokio::test]
async fn test_batch_limit_preserves_fifo() {
    let harness = Harness::new(TestConfigBuilder::new().with_batch_size(2).build()).await;
    let items = queue_orphans(&harness, 5).await;

    let report = drained(
        harness
            .sweeper
            .processor()
            .drain()
            .await
            .expect("Failed to drain"),
    );

    assert_eq!(report.processed, 2);
    assert_eq!(report.remaining, 3);
    assert_eq!(report.stats.deleted, 2);

    // Head of the queue went first, the rest kept its relative order
    assert!(!harness.media_exists(101).await);
    assert!(!harness.media_exists(102).await);
    assert!(harness.media_exists(103).await);
    assert_eq!(
        harness.store.load_queue().await.expect("Failed to load queue"),
        items[2..].to_vec()
    );
}

#[tokio::test]
async fn test_carried_items_drain_before_new_appends() {
    let harness = Harness::new(TestConfigBuilder::new().with_batch_size(2).build()).await;
    let items = queue_orphans(&harness, 3).await;

    harness
        .sweeper
        .processor()
        .drain()
        .await
        .expect("Failed to drain");

    harness.media_with_file(200, Some(20)).await;
    let late = QueueItem::new(200, 20, Utc::now());
    harness
        .store
        .append_queue(&[late])
        .await
        .expect("Failed to append queue");

    assert_eq!(
        harness.store.load_queue().await.expect("Failed to load queue"),
        vec![items[2], late]
    );
}

#[tokio::test]
async fn test_zero_time_budget_still_makes_progress() {
    let config = TestConfigBuilder::new()
        .with_batch_size(10)
        .with_time_budget(Duration::ZERO)
        .build();
    let harness = Harness::new(config).await;
    queue_orphans(&harness, 3).await;

    let report = drained(
        harness
            .sweeper
            .processor()
            .drain()
            .await
            .expect("Failed to drain"),
    );
    assert_eq!(report.processed, 1);
    assert_eq!(report.remaining, 2);
    assert!(!harness.media_exists(101).await);
}

#[tokio::test]
async fn test_remaining_work_reschedules() {
    let harness = Harness::new(TestConfigBuilder::new().with_batch_size(1).build()).await;
    queue_orphans(&harness, 2).await;

    harness
        .sweeper
        .processor()
        .drain()
        .await
        .expect("Failed to drain");
    assert!(harness.scheduler.deadline().await.is_some());
}

#[tokio::test]
async fn test_finished_queue_does_not_reschedule() {
    let harness = Harness::new(TestConfigBuilder::new().build()).await;
    queue_orphans(&harness, 2).await;

    let report = drained(
        harness
            .sweeper
            .processor()
            .drain()
            .await
            .expect("Failed to drain"),
    );
    assert_eq!(report.remaining, 0);
    assert!(harness.scheduler.deadline().await.is_none());

    let status = harness.sweeper.status().await.expect("Failed to get status");
    assert!(status.is_idle());
    assert!(status.last_run.is_some());
    assert!(status.lock_expires_at.is_none());
}

#[tokio::test]
async fn test_malformed_and_vanished_items_are_dropped() {
    let harness = Harness::new(TestConfigBuilder::new().build()).await;
    harness.media_with_file(101, Some(1)).await;
    harness
        .store
        .set_option(
            QUEUE_KEY,
            r#"[
                {"media_id": 0, "post_id": 1, "enqueued_at": 1},
                {"media_id": 77, "post_id": 1, "enqueued_at": 1},
                "garbage",
                {"media_id": 101, "post_id": 1, "enqueued_at": 1}
            ]"#,
        )
        .await
        .expect("Failed to write queue");

    let report = drained(
        harness
            .sweeper
            .processor()
            .drain()
            .await
            .expect("Failed to drain"),
    );

    assert_eq!(report.processed, 4);
    assert_eq!(report.stats.dropped, 3);
    assert_eq!(report.stats.deleted, 1);
    assert_eq!(report.stats.kept, 0);
    assert_eq!(report.remaining, 0);
}

#[tokio::test]
async fn test_held_lock_reschedules_without_touching_queue() {
    let config = TestConfigBuilder::new().build();
    let harness = Harness::new(config.clone()).await;
    let items = queue_orphans(&harness, 2).await;

    let holder = QueueLock::acquire(harness.store.clone(), config.queue.lock_ttl)
        .await
        .expect("Failed to acquire lock")
        .expect("Lock should be free");

    let mut trigger = MockDrainTrigger::new();
    trigger
        .expect_schedule_once()
        .with(eq(config.queue.contention_delay))
        .times(1)
        .return_const(());
    trigger.expect_is_scheduled().never();

    let processor = QueueProcessor::new(
        harness.store.clone(),
        harness.store.clone(),
        Arc::new(CandidateResolver::new(harness.store.clone(), Hooks::new())),
        Arc::new(trigger),
        config.queue.clone(),
        SweepMetrics::new(),
    )
    .expect("Failed to build processor");

    let outcome = processor.drain().await.expect("Failed to drain");
    assert_eq!(outcome, DrainOutcome::Contended);
    assert_eq!(
        harness.store.load_queue().await.expect("Failed to load queue"),
        items
    );
    assert!(harness.media_exists(101).await);

    assert!(holder.release().await.expect("Failed to release lock"));
    assert!(matches!(
        harness
            .sweeper
            .processor()
            .drain()
            .await
            .expect("Failed to drain"),
        DrainOutcome::Drained(_)
    ));
}

#[tokio::test]
async fn test_expired_lock_of_crashed_drain_is_recovered() {
    let harness = Harness::new(TestConfigBuilder::new().build()).await;
    queue_orphans(&harness, 1).await;

    harness
        .store
        .try_acquire_lock(QUEUE_LOCK_NAME, "crashed-run", Duration::from_millis(1))
        .await
        .expect("Failed to acquire lock");
    tokio::time::sleep(Duration::from_millis(20)).await;

    let report = drained(
        harness
            .sweeper
            .processor()
            .drain()
            .await
            .expect("Failed to drain"),
    );
    assert_eq!(report.stats.deleted, 1);
}

#[tokio::test]
async fn test_lock_is_released_after_drain() {
    let harness = Harness::new(TestConfigBuilder::new().with_batch_size(1).build()).await;
    queue_orphans(&harness, 2).await;

    harness
        .sweeper
        .processor()
        .drain()
        .await
        .expect("Failed to drain");

    assert!(
        harness
            .store
            .lock_expiry(QUEUE_LOCK_NAME)
            .await
            .expect("Failed to read lock")
            .is_none()
    );
}

#[tokio::test]
async fn test_run_now_drains_everything_within_cap() {
    let harness = Harness::new(TestConfigBuilder::new().with_batch_size(2).build()).await;
    queue_orphans(&harness, 5).await;

    let report = harness
        .sweeper
        .run_now(Some("admin"))
        .await
        .expect("Failed to run now");

    assert_eq!(report.drains, 3);
    assert_eq!(report.processed, 5);
    assert_eq!(report.remaining, 0);
    assert_eq!(report.stats.deleted, 5);
    assert!(!report.contended);

    let notice = harness
        .sweeper
        .notices()
        .take("admin")
        .await
        .expect("Failed to read notice")
        .expect("Notice should exist");
    assert_eq!(notice.deleted, 5);
}

#[tokio::test]
async fn test_run_now_leaves_remainder_to_schedule() {
    let config = TestConfigBuilder::new()
        .with_batch_size(2)
        .with_run_now(Duration::from_secs(25), 2)
        .build();
    let harness = Harness::new(config).await;
    queue_orphans(&harness, 5).await;

    let report = harness
        .sweeper
        .run_now(None)
        .await
        .expect("Failed to run now");

    assert_eq!(report.drains, 2);
    assert_eq!(report.remaining, 1);
    assert!(harness.scheduler.deadline().await.is_some());
}

#[tokio::test]
async fn test_run_now_reports_contention() {
    let config = TestConfigBuilder::new().build();
    let harness = Harness::new(config.clone()).await;
    queue_orphans(&harness, 2).await;

    harness
        .store
        .try_acquire_lock(QUEUE_LOCK_NAME, "other", config.queue.lock_ttl)
        .await
        .expect("Failed to acquire lock");

    let report = harness
        .sweeper
        .run_now(None)
        .await
        .expect("Failed to run now");
    assert!(report.contended);
    assert_eq!(report.drains, 0);
    assert_eq!(report.remaining, 2);
    assert_eq!(harness.sweeper.metrics().drains_contended(), 1);
}

#[tokio::test]
async fn test_clear_queue() {
    let harness = Harness::new(TestConfigBuilder::new().build()).await;
    queue_orphans(&harness, 3).await;

    assert_eq!(harness.sweeper.clear_queue().await.expect("Failed to clear"), 3);
    assert!(harness.sweeper.status().await.expect("Failed to get status").is_idle());
    assert!(harness.media_exists(101).await);
}

#[tokio::test]
async fn test_invalid_queue_config_is_rejected() {
    let harness = Harness::new(TestConfigBuilder::new().build()).await;
    let config = TestConfigBuilder::new().with_batch_size(0).build();

    let result = QueueProcessor::new(
        harness.store.clone(),
        harness.store.clone(),
        Arc::new(CandidateResolver::new(harness.store.clone(), Hooks::new())),
        harness.scheduler.clone(),
        config.queue,
        SweepMetrics::new(),
    );
    assert!(result.is_err());
}

/// Repository with scripted misbehaviour on top of the real store.
struct ScriptedRepository {
    inner: Arc<SqlStore>,
    refuse_delete: Option<MediaId>,
    media_delay: Duration,
    steal_lock_at: Option<MediaId>,
}

impl ScriptedRepository {
    fn new(inner: Arc<SqlStore>) -> Self {
        Self {
            inner,
            refuse_delete: None,
            media_delay: Duration::ZERO,
            steal_lock_at: None,
        }
    }

    fn refusing_delete(mut self, id: MediaId) -> Self {
        self.refuse_delete = Some(id);
        self
    }

    fn slow_media(mut self, delay: Duration) -> Self {
        self.media_delay = delay;
        self
    }

    /// Outlive the lock while loading `id`, then let another drain take it.
    fn stealing_lock_at(mut self, id: MediaId, delay: Duration) -> Self {
        self.steal_lock_at = Some(id);
        self.media_delay = delay;
        self
    }
}

#[async_trait]
impl ContentRepository for ScriptedRepository {
    async fn get_post(&self, id: PostId) -> StoreResult<Option<Post>> {
        self.inner.get_post(id).await
    }

    async fn get_media(&self, id: MediaId) -> StoreResult<Option<MediaObject>> {
        if !self.media_delay.is_zero() && self.steal_lock_at.is_none_or(|at| at == id) {
            tokio::time::sleep(self.media_delay).await;
        }
        if self.steal_lock_at == Some(id) {
            let taken = self
                .inner
                .try_acquire_lock(QUEUE_LOCK_NAME, "other-drain", Duration::from_secs(60))
                .await?;
            assert!(taken, "lock should have expired");
        }
        self.inner.get_media(id).await
    }

    async fn attached_media_ids(&self, parent_id: PostId) -> StoreResult<Vec<MediaId>> {
        self.inner.attached_media_ids(parent_id).await
    }

    async fn site_icon_id(&self) -> StoreResult<Option<MediaId>> {
        self.inner.site_icon_id().await
    }

    async fn custom_logo_id(&self) -> StoreResult<Option<MediaId>> {
        self.inner.custom_logo_id().await
    }

    async fn media_file_exists(&self, media: &MediaObject) -> StoreResult<bool> {
        self.inner.media_file_exists(media).await
    }

    async fn find_reference(
        &self,
        probe: &ReferenceProbe,
        exclude_post_id: PostId,
    ) -> StoreResult<bool> {
        self.inner.find_reference(probe, exclude_post_id).await
    }

    async fn delete_media_and_files(&self, id: MediaId) -> StoreResult<bool> {
        if self.refuse_delete == Some(id) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only uploads",
            )));
        }
        self.inner.delete_media_and_files(id).await
    }
}

fn processor_with(
    harness: &Harness,
    repository: ScriptedRepository,
    config: &Configuration,
) -> QueueProcessor {
    QueueProcessor::new(
        harness.store.clone(),
        harness.store.clone(),
        Arc::new(CandidateResolver::new(Arc::new(repository), Hooks::new())),
        harness.scheduler.clone(),
        config.queue.clone(),
        SweepMetrics::new(),
    )
    .expect("Failed to build processor")
}

#[tokio::test]
async fn test_failed_delete_does_not_abort_run() {
    let config = TestConfigBuilder::new().build();
    let harness = Harness::new(config.clone()).await;
    queue_orphans(&harness, 3).await;

    let repository = ScriptedRepository::new(harness.store.clone()).refusing_delete(102);
    let processor = processor_with(&harness, repository, &config);

    let report = drained(processor.drain().await.expect("Failed to drain"));
    assert_eq!(report.processed, 3);
    assert_eq!(report.stats.deleted, 2);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.remaining, 0);
    assert!(harness.media_exists(102).await);
    assert!(!harness.media_exists(103).await);
}

#[tokio::test]
async fn test_time_budget_cuts_batch_short() {
    let config = TestConfigBuilder::new()
        .with_batch_size(10)
        .with_time_budget(Duration::from_millis(100))
        .build();
    let harness = Harness::new(config.clone()).await;
    let items = queue_orphans(&harness, 6).await;

    let repository =
        ScriptedRepository::new(harness.store.clone()).slow_media(Duration::from_millis(40));
    let processor = processor_with(&harness, repository, &config);

    let report = drained(processor.drain().await.expect("Failed to drain"));

    // Six slow items cannot fit in the budget, but the head always runs
    assert!(report.processed >= 1);
    assert!(report.processed < items.len());
    assert_eq!(report.remaining, items.len() - report.processed);
    assert_eq!(report.stats.deleted, report.processed);
    assert_eq!(
        harness.store.load_queue().await.expect("Failed to load queue"),
        items[report.processed..].to_vec()
    );
    assert!(harness.scheduler.deadline().await.is_some());
}

#[tokio::test]
async fn test_drain_that_loses_its_lock_leaves_queue_untouched() {
    let config = TestConfigBuilder::new()
        .with_lock_ttl(Duration::from_millis(50))
        .build();
    let harness = Harness::new(config.clone()).await;
    let items = queue_orphans(&harness, 3).await;

    let repository = ScriptedRepository::new(harness.store.clone())
        .stealing_lock_at(102, Duration::from_millis(80));
    let processor = processor_with(&harness, repository, &config);

    let result = processor.drain().await;
    assert!(matches!(
        result,
        Err(SweepError::LockLost { processed: 2 })
    ));

    // The other drain owns the queue now; nothing was written back
    assert_eq!(
        harness.store.load_queue().await.expect("Failed to load queue"),
        items
    );
    assert!(
        harness
            .store
            .lock_expiry(QUEUE_LOCK_NAME)
            .await
            .expect("Failed to read lock")
            .is_some()
    );
}
