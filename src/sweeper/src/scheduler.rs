use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::store::{NEXT_RUN_KEY, StoreResult, SweepStateStore};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::error::SweepResult;

/// One-shot trigger for future queue drains.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Arm a drain `delay` from now. An earlier pending drain is kept.
    async fn schedule_once(&self, delay: Duration);

    async fn is_scheduled(&self) -> bool;
}

/// Arm a drain unless one is already pending.
pub async fn ensure_scheduled(scheduler: &dyn Scheduler, delay: Duration) -> bool {
    if scheduler.is_scheduled().await {
        return false;
    }
    scheduler.schedule_once(delay).await;
    tracing::debug!(delay = ?delay, "Scheduled queue drain");
    true
}

/// In-process scheduler driving the worker loop.
#[derive(Debug, Default)]
pub struct DrainScheduler {
    deadline: Mutex<Option<Instant>>,
    notify: Notify,
}

impl DrainScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the pending drain, if any.
    pub async fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().await
    }

    /// Wait until the pending drain is due, disarm it and return.
    pub async fn wait_due(&self) {
        loop {
            let deadline = {
                let mut guard = self.deadline.lock().await;
                match *guard {
                    Some(at) if at <= Instant::now() => {
                        *guard = None;
                        return;
                    }
                    other => other,
                }
            };

            match deadline {
                Some(at) => {
                    tokio::select! {
                        _ = tokio::time::sleep_until(at) => {}
                        _ = self.notify.notified() => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }
}

#[async_trait]
impl Scheduler for DrainScheduler {
    async fn schedule_once(&self, delay: Duration) {
        let at = Instant::now() + delay;
        let mut guard = self.deadline.lock().await;
        if guard.is_none_or(|current| at < current) {
            *guard = Some(at);
            self.notify.notify_one();
        }
    }

    async fn is_scheduled(&self) -> bool {
        self.deadline.lock().await.is_some()
    }
}

/// Due time of the drain armed in the store, if any.
pub async fn read_next_run(state: &dyn SweepStateStore) -> SweepResult<Option<DateTime<Utc>>> {
    Ok(next_run_millis(state)
        .await?
        .and_then(DateTime::from_timestamp_millis))
}

async fn next_run_millis(state: &dyn SweepStateStore) -> StoreResult<Option<i64>> {
    Ok(state
        .get_option(NEXT_RUN_KEY)
        .await?
        .and_then(|raw| raw.trim().parse::<i64>().ok()))
}

/// Scheduler whose pending drain is a record in the store.
///
/// A drain armed by a short-lived command outlives that process and is
/// picked up by whichever worker polls the same store. The earliest armed
/// time wins; the worker disarms it when it fires.
pub struct StoredScheduler {
    state: Arc<dyn SweepStateStore>,
    poll_interval: Duration,
    notify: Notify,
}

impl StoredScheduler {
    pub fn new(state: Arc<dyn SweepStateStore>, poll_interval: Duration) -> Self {
        Self {
            state,
            poll_interval,
            notify: Notify::new(),
        }
    }

    pub async fn deadline(&self) -> SweepResult<Option<DateTime<Utc>>> {
        read_next_run(self.state.as_ref()).await
    }

    /// Wait until the stored drain is due, disarm it and return.
    ///
    /// The store is re-read at least every poll interval so drains armed by
    /// other processes are noticed.
    pub async fn wait_due(&self) {
        loop {
            let wait = match self.deadline().await {
                Ok(Some(at)) => match (at - Utc::now()).to_std() {
                    Ok(until) if !until.is_zero() => until.min(self.poll_interval),
                    _ => match self.state.delete_option(NEXT_RUN_KEY).await {
                        Ok(()) => return,
                        Err(e) => {
                            tracing::warn!(error = %e, "Failed to disarm scheduled drain");
                            self.poll_interval
                        }
                    },
                },
                Ok(None) => self.poll_interval,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read scheduled drain");
                    self.poll_interval
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.notify.notified() => {}
            }
        }
    }
}

#[async_trait]
impl Scheduler for StoredScheduler {
    async fn schedule_once(&self, delay: Duration) {
        let delay_ms = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
        let at = Utc::now().timestamp_millis().saturating_add(delay_ms);

        match next_run_millis(self.state.as_ref()).await {
            Ok(Some(current)) if current <= at => return,
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Failed to read scheduled drain"),
        }

        match self.state.set_option(NEXT_RUN_KEY, &at.to_string()).await {
            Ok(()) => self.notify.notify_one(),
            Err(e) => tracing::error!(error = %e, delay = ?delay, "Failed to schedule drain"),
        }
    }

    async fn is_scheduled(&self) -> bool {
        match next_run_millis(self.state.as_ref()).await {
            Ok(next_run) => next_run.is_some(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read scheduled drain");
                false
            }
        }
    }
}
