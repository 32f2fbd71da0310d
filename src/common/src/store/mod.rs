//! Storage seams of the sweeper.
//!
//! [`ContentRepository`] is the read side plus the single destructive
//! command, [`SweepStateStore`] owns the queue, lock, last-run stamp and
//! notice records, and [`ScanConfigProvider`] serves the scan switches.
//! [`SqlStore`] implements all three on SQLite or PostgreSQL.

pub mod probe;
pub mod sql;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::config::ScanConfig;
use crate::model::{MediaId, MediaObject, Post, PostId, QueueItem};

pub use probe::{Matcher, ReferenceProbe, ReferenceSource};
pub use sql::SqlStore;

/// Option holding the persisted [`ScanConfig`] JSON.
pub const SETTINGS_KEY: &str = "mediasweep_settings";
/// Option holding the JSON array of queued items.
pub const QUEUE_KEY: &str = "mediasweep_queue";
/// Option holding the unix timestamp of the last completed drain.
pub const LAST_RUN_KEY: &str = "mediasweep_last_run";
/// Option holding the due time (unix milliseconds) of the next armed drain.
pub const NEXT_RUN_KEY: &str = "mediasweep_next_run";
/// Prefix of per-operator notice options.
pub const NOTICE_KEY_PREFIX: &str = "mediasweep_notice_";
/// Name of the lock row guarding queue drains.
pub const QUEUE_LOCK_NAME: &str = "mediasweep_queue";
/// Prefix shared by every internal record, excluded from the options scan.
pub const INTERNAL_OPTION_PREFIX: &str = "mediasweep_";

pub const SITE_ICON_OPTION: &str = "site_icon";
pub const CUSTOM_LOGO_OPTION: &str = "custom_logo";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Read access to posts and media, plus the idempotent media delete.
#[async_trait]
pub trait ContentRepository: Send + Sync {
    async fn get_post(&self, id: PostId) -> StoreResult<Option<Post>>;

    /// Returns `None` when the row is gone or is not a media object.
    async fn get_media(&self, id: MediaId) -> StoreResult<Option<MediaObject>>;

    /// Media parented to the post, in ascending id order.
    async fn attached_media_ids(&self, parent_id: PostId) -> StoreResult<Vec<MediaId>>;

    async fn site_icon_id(&self) -> StoreResult<Option<MediaId>>;

    async fn custom_logo_id(&self) -> StoreResult<Option<MediaId>>;

    async fn media_file_exists(&self, media: &MediaObject) -> StoreResult<bool>;

    /// Whether any record of the probed family, outside `exclude_post_id`,
    /// satisfies one of the probe's matchers.
    async fn find_reference(
        &self,
        probe: &ReferenceProbe,
        exclude_post_id: PostId,
    ) -> StoreResult<bool>;

    /// Remove the media row, its metadata and its file. Deleting an unknown
    /// id is a no-op returning `false`.
    async fn delete_media_and_files(&self, id: MediaId) -> StoreResult<bool>;
}

/// Persisted queue, drain lock and small sweep records.
#[async_trait]
pub trait SweepStateStore: Send + Sync {
    /// Load the queue in insertion order. Entries that fail to parse are
    /// returned as malformed items instead of failing the whole load.
    async fn load_queue(&self) -> StoreResult<Vec<QueueItem>>;

    /// Append items to the tail of the queue.
    async fn append_queue(&self, items: &[QueueItem]) -> StoreResult<()>;

    /// Remove one occurrence of each processed item, keeping the relative
    /// order of everything else, including items appended meanwhile.
    /// Returns the number of items left.
    async fn remove_from_queue(&self, processed: &[QueueItem]) -> StoreResult<usize>;

    /// Drop every queued item, returning how many there were.
    async fn clear_queue(&self) -> StoreResult<usize>;

    /// Take the named lock unless an unexpired holder exists.
    async fn try_acquire_lock(&self, name: &str, token: &str, ttl: Duration)
    -> StoreResult<bool>;

    /// Push the expiry of the lock out to `ttl` from now, provided `token`
    /// still holds it. `false` means the lock was taken over.
    async fn renew_lock(&self, name: &str, token: &str, ttl: Duration) -> StoreResult<bool>;

    /// Release the lock if `token` still holds it.
    async fn release_lock(&self, name: &str, token: &str) -> StoreResult<bool>;

    /// Expiry of the current unexpired holder, if any.
    async fn lock_expiry(&self, name: &str) -> StoreResult<Option<DateTime<Utc>>>;

    async fn get_option(&self, name: &str) -> StoreResult<Option<String>>;

    async fn set_option(&self, name: &str, value: &str) -> StoreResult<()>;

    async fn delete_option(&self, name: &str) -> StoreResult<()>;
}

/// Source of the scan switches; defaults are served when nothing is stored.
#[async_trait]
pub trait ScanConfigProvider: Send + Sync {
    async fn scan_config(&self) -> StoreResult<ScanConfig>;
}

#[async_trait]
impl ScanConfigProvider for ScanConfig {
    async fn scan_config(&self) -> StoreResult<ScanConfig> {
        Ok(self.clone())
    }
}
