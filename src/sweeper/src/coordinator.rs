use std::sync::Arc;

use chrono::Utc;
use common::config::{QueueConfig, ScanConfig};
use common::model::{MediaId, Post, QueueItem};
use common::store::{ContentRepository, ScanConfigProvider, SweepStateStore};

use crate::error::SweepResult;
use crate::hooks::Hooks;
use crate::metrics::SweepMetrics;
use crate::notices::NoticeBoard;
use crate::resolver::CandidateResolver;
use crate::scanner::ScanSession;
use crate::scheduler::{Scheduler, ensure_scheduled};
use crate::stats::RunStats;

/// Reacts to permanent post deletions by cleaning up the post's media,
/// either inline or through the deletion queue.
pub struct DeletionCoordinator {
    repository: Arc<dyn ContentRepository>,
    state: Arc<dyn SweepStateStore>,
    settings: Arc<dyn ScanConfigProvider>,
    resolver: Arc<CandidateResolver>,
    scheduler: Arc<dyn Scheduler>,
    hooks: Hooks,
    queue: QueueConfig,
    metrics: SweepMetrics,
    notices: Option<NoticeBoard>,
}

impl DeletionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        repository: Arc<dyn ContentRepository>,
        state: Arc<dyn SweepStateStore>,
        settings: Arc<dyn ScanConfigProvider>,
        resolver: Arc<CandidateResolver>,
        scheduler: Arc<dyn Scheduler>,
        hooks: Hooks,
        queue: QueueConfig,
        metrics: SweepMetrics,
    ) -> Self {
        Self {
            repository,
            state,
            settings,
            resolver,
            scheduler,
            hooks,
            queue,
            metrics,
            notices: None,
        }
    }

    /// Record each invocation's outcome for the triggering operator.
    pub fn with_notices(mut self, notices: NoticeBoard) -> Self {
        self.notices = Some(notices);
        self
    }

    /// Whether deleting a post of this type may trigger cleanup, after the
    /// supported-types hooks have run.
    pub fn is_eligible(&self, post_type: &str, config: &ScanConfig) -> bool {
        let allowed = self
            .hooks
            .supported_post_types(config.allowed_post_types.clone());
        let effective = ScanConfig {
            allowed_post_types: allowed,
            ..ScanConfig::default()
        };
        effective.is_post_type_supported(post_type)
    }

    /// Parented media in retrieval order, then the featured image if new.
    pub async fn collect_candidates(&self, post: &Post) -> SweepResult<Vec<MediaId>> {
        let mut candidates: Vec<MediaId> = Vec::new();
        for id in self.repository.attached_media_ids(post.id).await? {
            if id > 0 && !candidates.contains(&id) {
                candidates.push(id);
            }
        }
        if let Some(thumbnail_id) = post.thumbnail_id.filter(|id| *id > 0)
            && !candidates.contains(&thumbnail_id)
        {
            candidates.push(thumbnail_id);
        }
        Ok(candidates)
    }

    /// Handle the permanent deletion of `post`, described by the snapshot
    /// taken before its row was removed.
    pub async fn on_post_permanently_deleted(
        &self,
        post: &Post,
        operator: Option<&str>,
    ) -> SweepResult<RunStats> {
        let config = self.settings.scan_config().await?;

        if !self.is_eligible(&post.post_type, &config) {
            tracing::debug!(
                post_id = post.id,
                post_type = %post.post_type,
                "Post type does not trigger media cleanup"
            );
            return Ok(RunStats::default());
        }

        let candidates = self.collect_candidates(post).await?;
        if candidates.is_empty() {
            tracing::debug!(post_id = post.id, "Deleted post had no media");
            return Ok(RunStats::default());
        }

        tracing::info!(
            post_id = post.id,
            candidates = candidates.len(),
            background = config.background_processing,
            "Cleaning up media of deleted post"
        );

        let stats = if config.background_processing {
            self.enqueue(post, &candidates).await?
        } else {
            self.process_inline(post, &candidates, &config).await
        };

        if let (Some(notices), Some(operator)) = (&self.notices, operator)
            && !stats.is_empty()
            && let Err(e) = notices.record(operator, &stats).await
        {
            tracing::warn!(operator, error = %e, "Failed to record operator notice");
        }

        Ok(stats)
    }

    async fn enqueue(&self, post: &Post, candidates: &[MediaId]) -> SweepResult<RunStats> {
        let now = Utc::now();
        let items: Vec<QueueItem> = candidates
            .iter()
            .map(|media_id| QueueItem::new(*media_id, post.id, now))
            .collect();

        self.state.append_queue(&items).await?;
        self.metrics.record_queued(items.len());
        ensure_scheduled(self.scheduler.as_ref(), self.queue.initial_delay).await;

        tracing::info!(post_id = post.id, queued = items.len(), "Queued media for deletion");

        Ok(RunStats {
            queued: items.len(),
            ..Default::default()
        })
    }

    async fn process_inline(
        &self,
        post: &Post,
        candidates: &[MediaId],
        config: &ScanConfig,
    ) -> RunStats {
        let mut session = ScanSession::new();
        for media_id in candidates {
            self.resolver
                .resolve(*media_id, post.id, config, &mut session)
                .await;
        }

        let stats = session.into_stats();
        self.metrics.record_outcomes(&stats);
        tracing::info!(
            post_id = post.id,
            deleted = stats.deleted,
            kept = stats.kept,
            failed = stats.failed,
            "Inline media cleanup complete"
        );
        stats
    }
}
