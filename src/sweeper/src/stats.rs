use std::fmt;

use serde::{Deserialize, Serialize};

/// Resolution of a single deletion candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Deleted,
    Kept,
    /// The media object was already gone, or the queue entry was unusable
    Dropped,
    /// The repository rejected the delete; the media is left in place
    Failed(String),
}

/// Counters of one coordinator invocation or one queue run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunStats {
    pub deleted: usize,
    pub kept: usize,
    pub queued: usize,
    pub failed: usize,
    pub dropped: usize,
}

impl RunStats {
    pub fn record(&mut self, outcome: &ItemOutcome) {
        match outcome {
            ItemOutcome::Deleted => self.deleted += 1,
            ItemOutcome::Kept => self.kept += 1,
            ItemOutcome::Dropped => self.dropped += 1,
            ItemOutcome::Failed(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: &RunStats) {
        self.deleted += other.deleted;
        self.kept += other.kept;
        self.queued += other.queued;
        self.failed += other.failed;
        self.dropped += other.dropped;
    }

    /// Whether there is anything worth reporting to an operator.
    pub fn is_empty(&self) -> bool {
        self.deleted == 0 && self.kept == 0 && self.queued == 0 && self.failed == 0
    }
}

impl fmt::Display for RunStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "deleted {}, kept {}, queued {}",
            self.deleted, self.kept, self.queued
        )?;
        if self.failed > 0 {
            write!(f, ", failed {}", self.failed)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_merge() {
        let mut stats = RunStats::default();
        stats.record(&ItemOutcome::Deleted);
        stats.record(&ItemOutcome::Kept);
        stats.record(&ItemOutcome::Dropped);
        stats.record(&ItemOutcome::Failed("locked".to_string()));

        assert_eq!(stats.deleted, 1);
        assert_eq!(stats.kept, 1);
        assert_eq!(stats.dropped, 1);
        assert_eq!(stats.failed, 1);

        let mut total = RunStats {
            queued: 2,
            ..Default::default()
        };
        total.merge(&stats);
        assert_eq!(total.queued, 2);
        assert_eq!(total.deleted, 1);
    }

    #[test]
    fn test_dropped_alone_is_not_reportable() {
        let stats = RunStats {
            dropped: 3,
            ..Default::default()
        };
        assert!(stats.is_empty());
        assert!(!RunStats { queued: 1, ..Default::default() }.is_empty());
    }

    #[test]
    fn test_display() {
        let stats = RunStats {
            deleted: 1,
            kept: 1,
            ..Default::default()
        };
        assert_eq!(stats.to_string(), "deleted 1, kept 1, queued 0");

        let stats = RunStats {
            failed: 2,
            ..Default::default()
        };
        assert_eq!(stats.to_string(), "deleted 0, kept 0, queued 0, failed 2");
    }
}
