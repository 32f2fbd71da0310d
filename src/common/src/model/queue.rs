use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{MediaId, PostId};

/// A deferred deletion candidate.
///
/// Missing fields deserialize to zero so that damaged entries survive
/// loading and are dropped as malformed by the queue processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueItem {
    pub media_id: MediaId,
    pub post_id: PostId,
    /// Unix timestamp (seconds) of the enqueue
    pub enqueued_at: i64,
}

impl QueueItem {
    pub fn new(media_id: MediaId, post_id: PostId, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            media_id,
            post_id,
            enqueued_at: enqueued_at.timestamp(),
        }
    }

    /// Entries with a non-positive media ID are dropped without scanning.
    pub fn is_malformed(&self) -> bool {
        self.media_id <= 0
    }
}
