//! Extension points consulted by the scanner and the deletion paths.
//!
//! Hooks are registered once, in order, when the sweeper is built. Filters
//! receive the value produced by the previous hook; observers are called in
//! registration order.

use std::fmt;
use std::sync::Arc;

use common::config::ScanConfig;
use common::model::{MediaId, MediaObject, PostId};

/// The independently switchable reference checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScanCategory {
    ContentRegex,
    FilenameLike,
    PostmetaId,
    PostmetaUrl,
    TermmetaUrl,
    OptionsUrl,
    CommentsUrl,
}

impl ScanCategory {
    pub const ALL: [ScanCategory; 7] = [
        ScanCategory::ContentRegex,
        ScanCategory::FilenameLike,
        ScanCategory::PostmetaId,
        ScanCategory::PostmetaUrl,
        ScanCategory::TermmetaUrl,
        ScanCategory::OptionsUrl,
        ScanCategory::CommentsUrl,
    ];

    /// Switch value in the given configuration.
    pub fn enabled_in(self, config: &ScanConfig) -> bool {
        match self {
            ScanCategory::ContentRegex => config.content_regex,
            ScanCategory::FilenameLike => config.filename_like,
            ScanCategory::PostmetaId => config.postmeta_id,
            ScanCategory::PostmetaUrl => config.postmeta_url,
            ScanCategory::TermmetaUrl => config.termmeta_url,
            ScanCategory::OptionsUrl => config.options_url,
            ScanCategory::CommentsUrl => config.comments_url,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ScanCategory::ContentRegex => "content_regex",
            ScanCategory::FilenameLike => "filename_like",
            ScanCategory::PostmetaId => "postmeta_id",
            ScanCategory::PostmetaUrl => "postmeta_url",
            ScanCategory::TermmetaUrl => "termmeta_url",
            ScanCategory::OptionsUrl => "options_url",
            ScanCategory::CommentsUrl => "comments_url",
        }
    }
}

impl fmt::Display for ScanCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A rule plugged into the sweep. Every method has a pass-through default,
/// so implementors override only what they need. Hooks never touch the
/// queue or the lock.
pub trait SweepHook: Send + Sync {
    /// Filter the post-type allow-list; an empty list means the default deny-list.
    fn supported_post_types(&self, types: Vec<String>) -> Vec<String> {
        types
    }

    /// Filter whether a reference check runs.
    fn scan_enabled(&self, _category: ScanCategory, enabled: bool) -> bool {
        enabled
    }

    /// Report a usage the built-in checks do not know about. Only consulted
    /// when no built-in check found a reference.
    fn used_elsewhere(&self, _media_id: MediaId, _post_id: PostId) -> bool {
        false
    }

    /// Filter the final skip decision, seeded with the scanner verdict.
    fn skip_delete(&self, skip: bool, _media_id: MediaId, _post_id: PostId) -> bool {
        skip
    }

    fn before_delete(&self, _media: &MediaObject, _post_id: PostId) {}

    fn after_delete(&self, _media_id: MediaId, _post_id: PostId) {}
}

/// Ordered hook chain.
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: Vec<Arc<dyn SweepHook>>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, hook: Arc<dyn SweepHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub fn supported_post_types(&self, types: Vec<String>) -> Vec<String> {
        self.hooks
            .iter()
            .fold(types, |types, hook| hook.supported_post_types(types))
    }

    pub fn scan_enabled(&self, category: ScanCategory, config: &ScanConfig) -> bool {
        self.hooks
            .iter()
            .fold(category.enabled_in(config), |enabled, hook| {
                hook.scan_enabled(category, enabled)
            })
    }

    pub fn used_elsewhere(&self, media_id: MediaId, post_id: PostId) -> bool {
        self.hooks
            .iter()
            .any(|hook| hook.used_elsewhere(media_id, post_id))
    }

    pub fn skip_delete(&self, used: bool, media_id: MediaId, post_id: PostId) -> bool {
        self.hooks
            .iter()
            .fold(used, |skip, hook| hook.skip_delete(skip, media_id, post_id))
    }

    pub fn before_delete(&self, media: &MediaObject, post_id: PostId) {
        for hook in &self.hooks {
            hook.before_delete(media, post_id);
        }
    }

    pub fn after_delete(&self, media_id: MediaId, post_id: PostId) {
        for hook in &self.hooks {
            hook.after_delete(media_id, post_id);
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks").field("len", &self.hooks.len()).finish()
    }
}
