//! Sweep metrics tracking
//!
//! Cumulative counters across runs, kept in atomics so the worker, the
//! coordinator and the queue processor can share one instance.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use crate::stats::RunStats;

/// Thread-safe metrics for tracking sweep operations
#[derive(Debug, Clone)]
pub struct SweepMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    drains_started: AtomicUsize,
    drains_completed: AtomicUsize,
    drains_contended: AtomicUsize,
    media_deleted: AtomicUsize,
    media_kept: AtomicUsize,
    media_failed: AtomicUsize,
    items_dropped: AtomicUsize,
    items_queued: AtomicUsize,
    total_drain_ms: AtomicU64,
}

impl Default for SweepMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl SweepMetrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub fn record_drain_start(&self) {
        self.inner.drains_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed drain and its outcome counts
    pub fn record_drain(&self, stats: &RunStats, duration: Duration) {
        self.inner.drains_completed.fetch_add(1, Ordering::Relaxed);
        self.inner
            .total_drain_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
        self.record_outcomes(stats);
    }

    /// Record the outcome counts of an inline coordinator run
    pub fn record_outcomes(&self, stats: &RunStats) {
        self.inner
            .media_deleted
            .fetch_add(stats.deleted, Ordering::Relaxed);
        self.inner.media_kept.fetch_add(stats.kept, Ordering::Relaxed);
        self.inner
            .media_failed
            .fetch_add(stats.failed, Ordering::Relaxed);
        self.inner
            .items_dropped
            .fetch_add(stats.dropped, Ordering::Relaxed);
    }

    pub fn record_contention(&self) {
        self.inner.drains_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued(&self, count: usize) {
        self.inner.items_queued.fetch_add(count, Ordering::Relaxed);
    }

    pub fn drains_started(&self) -> usize {
        self.inner.drains_started.load(Ordering::Relaxed)
    }

    pub fn drains_completed(&self) -> usize {
        self.inner.drains_completed.load(Ordering::Relaxed)
    }

    pub fn drains_contended(&self) -> usize {
        self.inner.drains_contended.load(Ordering::Relaxed)
    }

    pub fn media_deleted(&self) -> usize {
        self.inner.media_deleted.load(Ordering::Relaxed)
    }

    pub fn media_kept(&self) -> usize {
        self.inner.media_kept.load(Ordering::Relaxed)
    }

    pub fn media_failed(&self) -> usize {
        self.inner.media_failed.load(Ordering::Relaxed)
    }

    pub fn items_dropped(&self) -> usize {
        self.inner.items_dropped.load(Ordering::Relaxed)
    }

    pub fn items_queued(&self) -> usize {
        self.inner.items_queued.load(Ordering::Relaxed)
    }

    /// Average duration of completed drains
    pub fn avg_drain_ms(&self) -> f64 {
        let total_ms = self.inner.total_drain_ms.load(Ordering::Relaxed) as f64;
        let drains = self.drains_completed() as f64;

        if drains > 0.0 { total_ms / drains } else { 0.0 }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            drains_started: self.drains_started(),
            drains_completed: self.drains_completed(),
            drains_contended: self.drains_contended(),
            media_deleted: self.media_deleted(),
            media_kept: self.media_kept(),
            media_failed: self.media_failed(),
            items_dropped: self.items_dropped(),
            items_queued: self.items_queued(),
            avg_drain_ms: self.avg_drain_ms(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub drains_started: usize,
    pub drains_completed: usize,
    pub drains_contended: usize,
    pub media_deleted: usize,
    pub media_kept: usize,
    pub media_failed: usize,
    pub items_dropped: usize,
    pub items_queued: usize,
    pub avg_drain_ms: f64,
}

impl MetricsSummary {
    /// Log the metrics summary
    pub fn log(&self) {
        log::info!("=== Sweep Metrics Summary ===");
        log::info!(
            "Drains: {} started, {} completed, {} contended",
            self.drains_started,
            self.drains_completed,
            self.drains_contended
        );
        log::info!(
            "Media: {} deleted, {} kept, {} failed",
            self.media_deleted,
            self.media_kept,
            self.media_failed
        );
        log::info!(
            "Queue: {} queued, {} dropped",
            self.items_queued,
            self.items_dropped
        );
        log::info!("Average drain duration: {:.2}ms", self.avg_drain_ms);
    }
}
