//! Update metrics
//!
//! Counters describing how much work the updater has done, shared by every
//! view of one engine.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for update passes
#[derive(Debug, Default)]
pub struct UpdateMetrics {
    /// Number of completed update passes
    pub sweeps: AtomicU64,

    /// Documents whose emissions were (re)written
    pub docs_indexed: AtomicU64,

    /// Documents removed from a view after deletion
    pub docs_removed: AtomicU64,

    /// Index rows written
    pub rows_written: AtomicU64,

    /// Index rows deleted as stale
    pub rows_removed: AtomicU64,

    /// Total time spent in update passes (nanoseconds)
    pub total_update_time_ns: AtomicU64,
}

impl UpdateMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished update pass
    pub fn record_sweep(&self, duration: Duration) {
        self.sweeps.fetch_add(1, Ordering::Relaxed);
        self.total_update_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn record_indexed(&self, rows: usize) {
        self.docs_indexed.fetch_add(1, Ordering::Relaxed);
        self.rows_written.fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub fn record_removed_doc(&self) {
        self.docs_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_rows(&self, rows: usize) {
        self.rows_removed.fetch_add(rows as u64, Ordering::Relaxed);
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.sweeps.store(0, Ordering::Relaxed);
        self.docs_indexed.store(0, Ordering::Relaxed);
        self.docs_removed.store(0, Ordering::Relaxed);
        self.rows_written.store(0, Ordering::Relaxed);
        self.rows_removed.store(0, Ordering::Relaxed);
        self.total_update_time_ns.store(0, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            docs_indexed: self.docs_indexed.load(Ordering::Relaxed),
            docs_removed: self.docs_removed.load(Ordering::Relaxed),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_removed: self.rows_removed.load(Ordering::Relaxed),
            total_time_ns: self.total_update_time_ns.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time snapshot of update metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub sweeps: u64,
    pub docs_indexed: u64,
    pub docs_removed: u64,
    pub rows_written: u64,
    pub rows_removed: u64,
    pub total_time_ns: u64,
}

impl MetricsSnapshot {
    /// Get average time per update pass
    pub fn avg_sweep_time(&self) -> Duration {
        if self.sweeps == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_time_ns / self.sweeps)
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Sweeps: {}", self.sweeps)?;
        writeln!(
            f,
            "  Docs indexed: {} | Docs removed: {}",
            self.docs_indexed, self.docs_removed
        )?;
        writeln!(
            f,
            "  Rows written: {} | Rows removed: {}",
            self.rows_written, self.rows_removed
        )?;
        writeln!(
            f,
            "  Avg Time: {:.2}ms | Total Time: {:.2}ms",
            self.avg_sweep_time().as_secs_f64() * 1000.0,
            Duration::from_nanos(self.total_time_ns).as_secs_f64() * 1000.0
        )?;
        Ok(())
    }
}
