use std::sync::Arc;

use common::config::ScanConfig;
use common::model::{MediaId, PostId};
use common::store::ContentRepository;

use crate::hooks::Hooks;
use crate::scanner::{ReferenceScanner, ScanSession};
use crate::stats::ItemOutcome;

/// Turns one candidate into a delete-or-keep decision and applies it.
///
/// Shared by inline processing and queue drains: re-fetch, scan, apply the
/// skip filter and the protected list, then delete with files.
pub struct CandidateResolver {
    repository: Arc<dyn ContentRepository>,
    scanner: ReferenceScanner,
    hooks: Hooks,
}

impl CandidateResolver {
    pub fn new(repository: Arc<dyn ContentRepository>, hooks: Hooks) -> Self {
        Self {
            scanner: ReferenceScanner::new(repository.clone(), hooks.clone()),
            repository,
            hooks,
        }
    }

    pub fn scanner(&self) -> &ReferenceScanner {
        &self.scanner
    }

    /// Final skip decision; protected media are always skipped.
    pub fn should_skip(
        &self,
        used: bool,
        media_id: MediaId,
        post_id: PostId,
        config: &ScanConfig,
    ) -> bool {
        let skip = self.hooks.skip_delete(used, media_id, post_id);
        skip || config.is_protected(media_id)
    }

    /// Resolve a candidate and record the outcome in the session stats.
    pub async fn resolve(
        &self,
        media_id: MediaId,
        post_id: PostId,
        config: &ScanConfig,
        session: &mut ScanSession,
    ) -> ItemOutcome {
        let outcome = self.resolve_inner(media_id, post_id, config, session).await;
        session.stats_mut().record(&outcome);
        outcome
    }

    async fn resolve_inner(
        &self,
        media_id: MediaId,
        post_id: PostId,
        config: &ScanConfig,
        session: &mut ScanSession,
    ) -> ItemOutcome {
        let media = match self.repository.get_media(media_id).await {
            Ok(Some(media)) => media,
            Ok(None) => {
                tracing::debug!(media_id, post_id, "Media no longer exists, skipping");
                return ItemOutcome::Dropped;
            }
            Err(e) => {
                tracing::warn!(media_id, post_id, error = %e, "Failed to load media, keeping it");
                return ItemOutcome::Failed(e.to_string());
            }
        };

        let used = self
            .scanner
            .is_referenced_elsewhere(&media, post_id, config, session)
            .await;

        if self.should_skip(used, media_id, post_id, config) {
            tracing::info!(
                media_id,
                post_id,
                used,
                protected = config.is_protected(media_id),
                "Keeping media"
            );
            return ItemOutcome::Kept;
        }

        self.hooks.before_delete(&media, post_id);

        match self.repository.delete_media_and_files(media_id).await {
            Ok(true) => {
                tracing::info!(
                    media_id,
                    post_id,
                    file = media.file_path.as_deref().unwrap_or_default(),
                    "Deleted orphaned media"
                );
                self.hooks.after_delete(media_id, post_id);
                ItemOutcome::Deleted
            }
            Ok(false) => {
                tracing::debug!(media_id, post_id, "Media vanished before delete");
                ItemOutcome::Dropped
            }
            Err(e) => {
                tracing::error!(media_id, post_id, error = %e, "Failed to delete media");
                ItemOutcome::Failed(e.to_string())
            }
        }
    }
}
