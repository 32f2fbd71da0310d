//! Conservative media garbage collection.
//!
//! When a post is permanently deleted, its media are deleted as well unless
//! something else in the store still appears to use them.
//!
//! ## Safety Principles
//!
//! 1. **Conservative verdicts**: any hint of use, or any failed read, keeps the media
//! 2. **Protected media**: listed IDs are never deleted
//! 3. **Single drainer**: the queue is only rewritten under the queue lock
//! 4. **Bounded runs**: every drain respects a batch size and a time budget
//!
//! ## Architecture
//!
//! - `scanner`: reference checks and the per-run scan session
//! - `resolver`: re-fetch, scan, skip decision and delete for one candidate
//! - `coordinator`: reaction to a permanent post deletion
//! - `queue`: lock-protected drains of the persisted deletion queue
//! - `scheduler`: one-shot drain triggers, in process or stored
//! - `hooks`: ordered extension points
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use common::config::Configuration;
//! use common::model::Post;
//! use common::store::SqlStore;
//! use sweeper::{DrainScheduler, Hooks, Sweeper};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Configuration::default();
//! let store = Arc::new(SqlStore::connect(&config.database).await?);
//! let sweeper = Sweeper::new(store, Arc::new(DrainScheduler::new()), Hooks::new(), &config)?;
//!
//! let post = Post::new(42, "post").with_thumbnail(7);
//! let stats = sweeper
//!     .coordinator()
//!     .on_post_permanently_deleted(&post, Some("admin"))
//!     .await?;
//! println!("{stats}");
//! # Ok(())
//! # }
//! ```

pub mod coordinator;
pub mod error;
pub mod hooks;
pub mod metrics;
pub mod notices;
pub mod queue;
pub mod resolver;
pub mod scanner;
pub mod scheduler;
pub mod stats;
pub mod status;

use std::sync::Arc;

use common::config::Configuration;
use common::store::{ContentRepository, ScanConfigProvider, SweepStateStore};

pub use coordinator::DeletionCoordinator;
pub use error::{SweepError, SweepResult};
pub use hooks::{Hooks, ScanCategory, SweepHook};
pub use metrics::{MetricsSummary, SweepMetrics};
pub use notices::{Notice, NoticeBoard};
pub use queue::{DrainOutcome, DrainReport, QueueLock, QueueProcessor, RunNowReport};
pub use resolver::CandidateResolver;
pub use scanner::{Reference, ReferenceScanner, ScanSession};
pub use scheduler::{DrainScheduler, Scheduler, StoredScheduler, ensure_scheduled, read_next_run};
pub use stats::{ItemOutcome, RunStats};
pub use status::QueueStatus;

/// Every sweep component wired to one store and one scheduler.
pub struct Sweeper {
    coordinator: DeletionCoordinator,
    processor: QueueProcessor,
    notices: NoticeBoard,
    state: Arc<dyn SweepStateStore>,
    scheduler: Arc<dyn Scheduler>,
    metrics: SweepMetrics,
}

impl Sweeper {
    pub fn new<S>(
        store: Arc<S>,
        scheduler: Arc<dyn Scheduler>,
        hooks: Hooks,
        config: &Configuration,
    ) -> SweepResult<Self>
    where
        S: ContentRepository + SweepStateStore + ScanConfigProvider + 'static,
    {
        let repository: Arc<dyn ContentRepository> = store.clone();
        let state: Arc<dyn SweepStateStore> = store.clone();
        let settings: Arc<dyn ScanConfigProvider> = store;

        let metrics = SweepMetrics::new();
        let notices = NoticeBoard::new(state.clone(), config.notices.ttl);
        let resolver = Arc::new(CandidateResolver::new(repository.clone(), hooks.clone()));

        let processor = QueueProcessor::new(
            state.clone(),
            settings.clone(),
            resolver.clone(),
            scheduler.clone(),
            config.queue.clone(),
            metrics.clone(),
        )?;

        let coordinator = DeletionCoordinator::new(
            repository,
            state.clone(),
            settings,
            resolver,
            scheduler.clone(),
            hooks,
            config.queue.clone(),
            metrics.clone(),
        )
        .with_notices(notices.clone());

        Ok(Self {
            coordinator,
            processor,
            notices,
            state,
            scheduler,
            metrics,
        })
    }

    pub fn coordinator(&self) -> &DeletionCoordinator {
        &self.coordinator
    }

    pub fn processor(&self) -> &QueueProcessor {
        &self.processor
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn metrics(&self) -> &SweepMetrics {
        &self.metrics
    }

    /// Operator "run now": bounded repeated drains, with the outcome
    /// recorded as the operator's notice.
    pub async fn run_now(&self, operator: Option<&str>) -> SweepResult<RunNowReport> {
        let report = self.processor.run_now().await?;
        if let Some(operator) = operator
            && !report.stats.is_empty()
        {
            self.notices.record(operator, &report.stats).await?;
        }
        Ok(report)
    }

    pub async fn status(&self) -> SweepResult<QueueStatus> {
        QueueStatus::collect(self.state.as_ref(), self.scheduler.as_ref()).await
    }

    /// Drop every queued item without processing it.
    pub async fn clear_queue(&self) -> SweepResult<usize> {
        let dropped = self.state.clear_queue().await?;
        tracing::info!(dropped, "Cleared deletion queue");
        Ok(dropped)
    }
}
