use std::fmt;

use chrono::{DateTime, Utc};
use common::store::{LAST_RUN_KEY, QUEUE_LOCK_NAME, SweepStateStore};

use crate::error::SweepResult;
use crate::scheduler::{Scheduler, read_next_run};

/// Pending-work indicator for operators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStatus {
    pub pending: usize,
    /// Entries that will be dropped without scanning
    pub malformed: usize,
    pub oldest_enqueued_at: Option<DateTime<Utc>>,
    pub last_run: Option<DateTime<Utc>>,
    /// Expiry of the lock while a drain is in progress
    pub lock_expires_at: Option<DateTime<Utc>>,
    pub scheduled: bool,
    /// Due time of the drain armed in the store
    pub next_run: Option<DateTime<Utc>>,
}

impl QueueStatus {
    pub async fn collect(
        state: &dyn SweepStateStore,
        scheduler: &dyn Scheduler,
    ) -> SweepResult<Self> {
        let queue = state.load_queue().await?;

        let last_run = state
            .get_option(LAST_RUN_KEY)
            .await?
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(Self {
            pending: queue.len(),
            malformed: queue.iter().filter(|item| item.is_malformed()).count(),
            oldest_enqueued_at: queue
                .iter()
                .filter(|item| !item.is_malformed() && item.enqueued_at > 0)
                .map(|item| item.enqueued_at)
                .min()
                .and_then(|secs| DateTime::from_timestamp(secs, 0)),
            last_run,
            lock_expires_at: state.lock_expiry(QUEUE_LOCK_NAME).await?,
            scheduled: scheduler.is_scheduled().await,
            next_run: read_next_run(state).await?,
        })
    }

    pub fn is_idle(&self) -> bool {
        self.pending == 0
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Pending items: {}", self.pending)?;
        if self.malformed > 0 {
            writeln!(f, "Malformed items: {}", self.malformed)?;
        }
        if let Some(oldest) = self.oldest_enqueued_at {
            writeln!(f, "Oldest item queued at: {}", oldest.to_rfc3339())?;
        }
        match self.last_run {
            Some(last_run) => writeln!(f, "Last run: {}", last_run.to_rfc3339())?,
            None => writeln!(f, "Last run: never")?,
        }
        match self.lock_expires_at {
            Some(expiry) => writeln!(f, "Drain in progress, lock expires at {}", expiry.to_rfc3339())?,
            None => writeln!(f, "No drain in progress")?,
        }
        match self.next_run {
            Some(next_run) => write!(f, "Drain scheduled: yes, due at {}", next_run.to_rfc3339()),
            None => write!(f, "Drain scheduled: {}", if self.scheduled { "yes" } else { "no" }),
        }
    }
}
