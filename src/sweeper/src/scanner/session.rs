use std::collections::{BTreeSet, HashMap};

use common::model::{MediaId, PostId};

use crate::stats::RunStats;

/// Per-run scan context: verdict memo, missing-file tracking and counters.
///
/// One session lives for a single coordinator invocation or a single queue
/// drain and is then dropped; nothing is shared across runs.
#[derive(Debug, Default)]
pub struct ScanSession {
    verdicts: HashMap<(MediaId, PostId), bool>,
    missing_files: BTreeSet<MediaId>,
    stats: RunStats,
}

impl ScanSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verdict(&self, media_id: MediaId, post_id: PostId) -> Option<bool> {
        self.verdicts.get(&(media_id, post_id)).copied()
    }

    pub(crate) fn remember(&mut self, media_id: MediaId, post_id: PostId, used: bool) {
        self.verdicts.insert((media_id, post_id), used);
    }

    pub(crate) fn mark_missing_file(&mut self, media_id: MediaId) {
        self.missing_files.insert(media_id);
    }

    /// Media whose stored file was not found during this run.
    pub fn missing_files(&self) -> Vec<MediaId> {
        self.missing_files.iter().copied().collect()
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut RunStats {
        &mut self.stats
    }

    pub fn into_stats(self) -> RunStats {
        self.stats
    }
}
