//! Cache metrics
//!
//! Each cache entry value counts how often it was served from the cache
//! and how often (and for how long) its producer ran.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one cache entry value
#[derive(Debug, Default)]
pub struct CacheEntryMetrics {
    hit_count: AtomicU64,
    computation_count: AtomicU64,
    total_compute_time_ns: AtomicU64,
}

impl CacheEntryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hit_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_computation(&self, duration: Duration) {
        self.computation_count.fetch_add(1, Ordering::Relaxed);
        self.total_compute_time_ns
            .fetch_add(duration.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.hit_count.store(0, Ordering::Relaxed);
        self.computation_count.store(0, Ordering::Relaxed);
        self.total_compute_time_ns.store(0, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self, description: &str) -> MetricsSnapshot {
        MetricsSnapshot {
            description: description.to_string(),
            hits: self.hit_count.load(Ordering::Relaxed),
            computations: self.computation_count.load(Ordering::Relaxed),
            total_time_ns: self.total_compute_time_ns.load(Ordering::Relaxed),
        }
    }
}

impl Clone for CacheEntryMetrics {
    fn clone(&self) -> Self {
        CacheEntryMetrics {
            hit_count: AtomicU64::new(self.hit_count.load(Ordering::Relaxed)),
            computation_count: AtomicU64::new(self.computation_count.load(Ordering::Relaxed)),
            total_compute_time_ns: AtomicU64::new(
                self.total_compute_time_ns.load(Ordering::Relaxed),
            ),
        }
    }
}

/// A point-in-time snapshot of cache entry metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub description: String,
    pub hits: u64,
    pub computations: u64,
    pub total_time_ns: u64,
}

impl MetricsSnapshot {
    /// Fraction of evaluations served from the cache (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.computations;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn avg_compute_time(&self) -> Duration {
        if self.computations == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_time_ns / self.computations)
        }
    }
}

impl std::fmt::Display for MetricsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Cache entry: {}", self.description)?;
        writeln!(
            f,
            "  Hits: {} | Computations: {} | Hit Rate: {:.1}%",
            self.hits,
            self.computations,
            self.hit_rate() * 100.0
        )?;
        writeln!(
            f,
            "  Avg Time: {:.3}ms | Total Time: {:.3}ms",
            self.avg_compute_time().as_secs_f64() * 1000.0,
            Duration::from_nanos(self.total_time_ns).as_secs_f64() * 1000.0
        )?;
        Ok(())
    }
}
