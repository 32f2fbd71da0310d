use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::config::QueueConfig;
use common::model::{MediaId, QueueItem};
use common::store::{LAST_RUN_KEY, ScanConfigProvider, SweepStateStore};
use tokio::time::Instant;

use super::lock::QueueLock;
use crate::error::{SweepError, SweepResult};
use crate::metrics::SweepMetrics;
use crate::resolver::CandidateResolver;
use crate::scanner::ScanSession;
use crate::scheduler::{Scheduler, ensure_scheduled};
use crate::stats::RunStats;

/// Result of a single drain attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Nothing queued; the lock was not taken
    Idle,
    /// Another drain holds the lock; a retry was scheduled
    Contended,
    Drained(DrainReport),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainReport {
    /// Items taken off the queue, including dropped ones
    pub processed: usize,
    /// Items left for later drains
    pub remaining: usize,
    pub stats: RunStats,
    /// Media whose file was missing when scanned
    pub missing_files: Vec<MediaId>,
}

/// Result of an operator-triggered "run now".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunNowReport {
    pub drains: usize,
    pub processed: usize,
    pub remaining: usize,
    pub contended: bool,
    pub stats: RunStats,
}

/// Lock-protected, batch- and time-bounded drain of the persisted queue.
pub struct QueueProcessor {
    state: Arc<dyn SweepStateStore>,
    settings: Arc<dyn ScanConfigProvider>,
    resolver: Arc<CandidateResolver>,
    scheduler: Arc<dyn Scheduler>,
    config: QueueConfig,
    metrics: SweepMetrics,
}

impl QueueProcessor {
    pub fn new(
        state: Arc<dyn SweepStateStore>,
        settings: Arc<dyn ScanConfigProvider>,
        resolver: Arc<CandidateResolver>,
        scheduler: Arc<dyn Scheduler>,
        config: QueueConfig,
        metrics: SweepMetrics,
    ) -> SweepResult<Self> {
        if config.batch_size == 0 {
            return Err(SweepError::InvalidConfig(
                "queue batch size must be positive".to_string(),
            ));
        }
        if config.run_now_max_iterations == 0 {
            return Err(SweepError::InvalidConfig(
                "run-now iteration cap must be positive".to_string(),
            ));
        }

        Ok(Self {
            state,
            settings,
            resolver,
            scheduler,
            config,
            metrics,
        })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// One bounded drain of the queue.
    pub async fn drain(&self) -> SweepResult<DrainOutcome> {
        if self.state.load_queue().await?.is_empty() {
            tracing::debug!("Deletion queue is empty");
            return Ok(DrainOutcome::Idle);
        }

        let Some(lock) = QueueLock::acquire(self.state.clone(), self.config.lock_ttl).await?
        else {
            tracing::warn!(
                retry_in = ?self.config.contention_delay,
                "Queue lock is held by another drain, retrying later"
            );
            self.metrics.record_contention();
            self.scheduler
                .schedule_once(self.config.contention_delay)
                .await;
            return Ok(DrainOutcome::Contended);
        };

        self.metrics.record_drain_start();
        let started = Instant::now();
        let drained = self.drain_locked(&lock).await;

        if let Err(e) = lock.release().await {
            tracing::warn!(error = %e, "Failed to release queue lock, it will expire");
        }

        let report = drained?;
        self.metrics.record_drain(&report.stats, started.elapsed());

        tracing::info!(
            processed = report.processed,
            remaining = report.remaining,
            deleted = report.stats.deleted,
            kept = report.stats.kept,
            failed = report.stats.failed,
            dropped = report.stats.dropped,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Queue drain complete"
        );

        if report.remaining > 0 {
            ensure_scheduled(self.scheduler.as_ref(), self.config.continue_delay).await;
        }

        Ok(DrainOutcome::Drained(report))
    }

    async fn drain_locked(&self, lock: &QueueLock) -> SweepResult<DrainReport> {
        let queue = self.state.load_queue().await?;
        let scan_config = self.settings.scan_config().await?;

        let started = Instant::now();
        let mut session = ScanSession::new();
        let mut processed: Vec<QueueItem> = Vec::new();

        for item in &queue {
            if processed.len() >= self.config.batch_size {
                break;
            }
            // The first item always runs so every drain makes progress
            if !processed.is_empty() && started.elapsed() >= self.config.time_budget {
                tracing::debug!(
                    processed = processed.len(),
                    budget = ?self.config.time_budget,
                    "Drain time budget exhausted"
                );
                break;
            }
            if !lock.renew().await? {
                return Err(SweepError::LockLost {
                    processed: processed.len(),
                });
            }

            if item.is_malformed() {
                tracing::debug!(
                    media_id = item.media_id,
                    post_id = item.post_id,
                    "Dropping malformed queue entry"
                );
                session.stats_mut().dropped += 1;
            } else {
                self.resolver
                    .resolve(item.media_id, item.post_id, &scan_config, &mut session)
                    .await;
            }
            processed.push(*item);
        }

        // A single slow item can outlive the lock; never write back without it
        if !lock.renew().await? {
            return Err(SweepError::LockLost {
                processed: processed.len(),
            });
        }

        let remaining = self.state.remove_from_queue(&processed).await?;
        self.state
            .set_option(LAST_RUN_KEY, &Utc::now().timestamp().to_string())
            .await?;

        Ok(DrainReport {
            processed: processed.len(),
            remaining,
            missing_files: session.missing_files(),
            stats: session.into_stats(),
        })
    }

    /// Drain repeatedly within the run-now budget and iteration cap; any
    /// remainder is left to the regular schedule.
    pub async fn run_now(&self) -> SweepResult<RunNowReport> {
        let budget: Duration = self.config.run_now_budget;
        let started = Instant::now();
        let mut report = RunNowReport::default();

        while report.drains < self.config.run_now_max_iterations {
            if report.drains > 0 && started.elapsed() >= budget {
                break;
            }

            match self.drain().await? {
                DrainOutcome::Idle => {
                    report.remaining = 0;
                    break;
                }
                DrainOutcome::Contended => {
                    report.contended = true;
                    break;
                }
                DrainOutcome::Drained(drain) => {
                    report.drains += 1;
                    report.processed += drain.processed;
                    report.remaining = drain.remaining;
                    report.stats.merge(&drain.stats);
                    if drain.remaining == 0 {
                        break;
                    }
                }
            }
        }

        if report.contended {
            report.remaining = self.state.load_queue().await?.len();
        }

        tracing::info!(
            drains = report.drains,
            processed = report.processed,
            remaining = report.remaining,
            contended = report.contended,
            "Run now finished"
        );

        Ok(report)
    }
}
