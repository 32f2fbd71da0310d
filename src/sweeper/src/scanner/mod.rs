//! Reference scanner.
//!
//! Decides, conservatively, whether a media object is still referenced by
//! anything other than the post being removed. Checks run cheapest and most
//! authoritative first and stop at the first hit. Any read failure counts as
//! a reference: the item is kept and the failure logged.

pub mod patterns;
mod session;

use std::fmt;
use std::sync::Arc;

use common::config::ScanConfig;
use common::model::{MediaObject, PostId};
use common::store::probe::numeric_id_matchers;
use common::store::{ContentRepository, Matcher, ReferenceProbe, ReferenceSource};

use crate::error::SweepResult;
use crate::hooks::{Hooks, ScanCategory};

pub use session::ScanSession;

/// The check that found a media object in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    SiteIcon,
    CustomLogo,
    Thumbnail,
    ContentMarkup,
    Filename,
    PostmetaUrl,
    PostmetaId,
    Termmeta,
    Options,
    Comments,
    /// Reported by an extension hook
    Extension,
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reference::SiteIcon => "site icon",
            Reference::CustomLogo => "custom logo",
            Reference::Thumbnail => "featured image",
            Reference::ContentMarkup => "content markup",
            Reference::Filename => "content filename",
            Reference::PostmetaUrl => "post metadata url",
            Reference::PostmetaId => "post metadata id",
            Reference::Termmeta => "term metadata",
            Reference::Options => "site option",
            Reference::Comments => "comment",
            Reference::Extension => "extension",
        };
        f.write_str(name)
    }
}

pub struct ReferenceScanner {
    repository: Arc<dyn ContentRepository>,
    hooks: Hooks,
}

impl ReferenceScanner {
    pub fn new(repository: Arc<dyn ContentRepository>, hooks: Hooks) -> Self {
        Self { repository, hooks }
    }

    /// Whether `media` appears to be used by anything but `exclude_post_id`.
    ///
    /// Read-only. Verdicts are memoized in the session per
    /// (media, excluded post) pair.
    pub async fn is_referenced_elsewhere(
        &self,
        media: &MediaObject,
        exclude_post_id: PostId,
        config: &ScanConfig,
        session: &mut ScanSession,
    ) -> bool {
        if let Some(used) = session.verdict(media.id, exclude_post_id) {
            return used;
        }

        self.track_missing_file(media, session).await;

        let used = match self.find_reference(media, exclude_post_id, config).await {
            Ok(Some(reference)) => {
                tracing::debug!(
                    media_id = media.id,
                    post_id = exclude_post_id,
                    reference = %reference,
                    "Media is referenced elsewhere"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(
                    media_id = media.id,
                    post_id = exclude_post_id,
                    error = %e,
                    "Reference scan failed, keeping media"
                );
                true
            }
        };

        session.remember(media.id, exclude_post_id, used);
        used
    }

    /// Run the checks in order and name the first one that hits.
    pub async fn find_reference(
        &self,
        media: &MediaObject,
        exclude_post_id: PostId,
        config: &ScanConfig,
    ) -> SweepResult<Option<Reference>> {
        let id = media.id;
        let urls = [media.url.clone(), media.url_path()];

        if self.repository.site_icon_id().await? == Some(id) {
            return Ok(Some(Reference::SiteIcon));
        }

        if self.repository.custom_logo_id().await? == Some(id) {
            return Ok(Some(Reference::CustomLogo));
        }

        let probe =
            ReferenceProbe::new(ReferenceSource::Thumbnail).with(Matcher::Exact(id.to_string()));
        if self.hit(&probe, exclude_post_id).await? {
            return Ok(Some(Reference::Thumbnail));
        }

        if self.enabled(ScanCategory::ContentRegex, config) {
            let probe = ReferenceProbe::new(ReferenceSource::PostContent)
                .with(patterns::content_markup_matcher(id)?);
            if self.hit(&probe, exclude_post_id).await? {
                return Ok(Some(Reference::ContentMarkup));
            }
        }

        if self.enabled(ScanCategory::FilenameLike, config) {
            let probe = ReferenceProbe::new(ReferenceSource::PostContent)
                .with_substrings([media.basename()]);
            if self.hit(&probe, exclude_post_id).await? {
                return Ok(Some(Reference::Filename));
            }
        }

        if self.enabled(ScanCategory::PostmetaUrl, config) {
            let probe = ReferenceProbe::new(ReferenceSource::PostMeta).with_substrings(urls.clone());
            if self.hit(&probe, exclude_post_id).await? {
                return Ok(Some(Reference::PostmetaUrl));
            }
        }

        if self.enabled(ScanCategory::PostmetaId, config) {
            let probe = ReferenceProbe {
                source: ReferenceSource::PostMeta,
                matchers: numeric_id_matchers(id)?,
            };
            if self.hit(&probe, exclude_post_id).await? {
                return Ok(Some(Reference::PostmetaId));
            }
        }

        // The numeric term metadata check always runs; URLs only when enabled
        let mut probe = ReferenceProbe {
            source: ReferenceSource::TermMeta,
            matchers: numeric_id_matchers(id)?,
        };
        if self.enabled(ScanCategory::TermmetaUrl, config) {
            probe = probe.with_substrings(urls.clone());
        }
        if self.hit(&probe, exclude_post_id).await? {
            return Ok(Some(Reference::Termmeta));
        }

        if self.enabled(ScanCategory::OptionsUrl, config) {
            let probe = ReferenceProbe::new(ReferenceSource::Options).with_substrings(urls.clone());
            if self.hit(&probe, exclude_post_id).await? {
                return Ok(Some(Reference::Options));
            }
        }

        if self.enabled(ScanCategory::CommentsUrl, config) {
            let probe = ReferenceProbe::new(ReferenceSource::Comments).with_substrings(urls);
            if self.hit(&probe, exclude_post_id).await? {
                return Ok(Some(Reference::Comments));
            }
        }

        if self.hooks.used_elsewhere(id, exclude_post_id) {
            return Ok(Some(Reference::Extension));
        }

        Ok(None)
    }

    fn enabled(&self, category: ScanCategory, config: &ScanConfig) -> bool {
        self.hooks.scan_enabled(category, config)
    }

    async fn hit(&self, probe: &ReferenceProbe, exclude_post_id: PostId) -> SweepResult<bool> {
        if probe.is_empty() {
            return Ok(false);
        }
        Ok(self.repository.find_reference(probe, exclude_post_id).await?)
    }

    /// A missing file is informational only and never forces a verdict.
    async fn track_missing_file(&self, media: &MediaObject, session: &mut ScanSession) {
        match self.repository.media_file_exists(media).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!(media_id = media.id, "Media file is missing");
                session.mark_missing_file(media.id);
            }
            Err(e) => {
                tracing::debug!(media_id = media.id, error = %e, "Could not check media file");
            }
        }
    }
}
