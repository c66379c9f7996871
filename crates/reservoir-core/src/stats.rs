//! Aggregate pool statistics and the sink that consumes them.
//!
//! The pool maintains counters internally and periodically emits a
//! [`PoolStats`] snapshot; cumulative counters are reset atomically with
//! the read, so consecutive snapshots never double-count.

use std::time::Duration;

/// Upper bounds, in milliseconds, of the transaction-duration histogram
/// buckets. A final unbounded bucket catches everything above the last
/// bound, so histograms carry `TRANSACTION_BUCKETS.len() + 1` counts.
pub const TRANSACTION_BUCKETS: &[u64] = &[1, 10, 100, 1_000, 10_000, 100_000];

/// One snapshot of pool activity.
///
/// Gauges (`active`, `idle`) are point-in-time values; everything else
/// counts events since the previous snapshot.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Resources currently borrowed.
    pub active: usize,
    /// Resources currently idle in the pool.
    pub idle: usize,
    /// Configured capacity.
    pub max_active: usize,
    /// Peak borrowed count since the last snapshot.
    pub active_peak: usize,
    /// Peak idle count since the last snapshot.
    pub idle_peak: usize,
    /// Successful borrows.
    pub borrow_count: u64,
    /// Successful returns to the idle set.
    pub recycle_count: u64,
    /// Times a borrower had to block waiting for a resource.
    pub wait_count: u64,
    /// Total time borrowers spent blocked.
    pub wait_time: Duration,
    /// Physical resources opened.
    pub create_count: u64,
    /// Physical resources closed.
    pub destroy_count: u64,
    /// Resources discarded by policy (max-uses, lifetime, validation,
    /// fatal errors).
    pub discard_count: u64,
    /// Failed open attempts.
    pub create_error_count: u64,
    /// Errors recovered during recycle (resource force-discarded).
    pub recycle_error_count: u64,
    /// Handles reclaimed by leak detection.
    pub abandoned_count: u64,
    /// Keep-alive probes performed.
    pub keep_alive_check_count: u64,
    /// Statement cache hits across all holders.
    pub cache_hits: u64,
    /// Statement cache misses across all holders.
    pub cache_misses: u64,
    /// Transaction-duration histogram; bucket bounds are
    /// [`TRANSACTION_BUCKETS`] plus a final overflow bucket.
    pub transaction_histogram: Vec<u64>,
}

impl PoolStats {
    /// Statement cache hit ratio in `[0.0, 1.0]`.
    #[must_use]
    pub fn cache_hit_ratio(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Mean blocked time per waiting borrow, if any borrow waited.
    #[must_use]
    pub fn mean_wait(&self) -> Option<Duration> {
        if self.wait_count == 0 {
            None
        } else {
            Some(self.wait_time / u32::try_from(self.wait_count).unwrap_or(u32::MAX))
        }
    }
}

/// Receives periodic pool statistics.
pub trait StatsSink: Send + Sync {
    /// Consume one snapshot. Counters backing the snapshot have already
    /// been reset; losing the snapshot loses that window's data.
    fn record(&self, stats: &PoolStats);
}

/// Default sink: emits each snapshot as a structured `tracing` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatsSink;

impl StatsSink for TracingStatsSink {
    fn record(&self, stats: &PoolStats) {
        tracing::info!(
            active = stats.active,
            idle = stats.idle,
            max_active = stats.max_active,
            active_peak = stats.active_peak,
            borrows = stats.borrow_count,
            recycles = stats.recycle_count,
            waits = stats.wait_count,
            wait_ms = stats.wait_time.as_millis() as u64,
            creates = stats.create_count,
            destroys = stats.destroy_count,
            discards = stats.discard_count,
            create_errors = stats.create_error_count,
            abandoned = stats.abandoned_count,
            keep_alive_checks = stats.keep_alive_check_count,
            cache_hit_ratio = stats.cache_hit_ratio(),
            "pool stats"
        );
    }
}
