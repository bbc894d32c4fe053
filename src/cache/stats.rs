//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, loads, and evictions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of lookups that found a live entry
    pub hits: u64,
    /// Number of lookups that found nothing (or only a stale entry)
    pub misses: u64,
    /// Number of loads that produced a value
    pub loads: u64,
    /// Number of loads that failed
    pub load_exceptions: u64,
    /// Number of entries dropped because of capacity pressure
    pub evictions: u64,
    /// Number of entries dropped because of ttl/tti
    pub expirations: u64,
    /// Time spent in loaders, in nanoseconds
    pub total_load_time_nanos: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_count(&self) -> u64 {
        self.hits + self.misses
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 1.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            1.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Returns misses / (hits + misses), or 0.0 if no requests have been made.
    pub fn miss_rate(&self) -> f64 {
        let total = self.request_count();
        if total == 0 {
            0.0
        } else {
            self.misses as f64 / total as f64
        }
    }

    /// Mean time spent per load attempt, successful or not.
    pub fn average_load_penalty(&self) -> Duration {
        let attempts = self.loads + self.load_exceptions;
        if attempts == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos(self.total_load_time_nanos / attempts)
        }
    }
}

// == Stats Counter ==
/// Shared, lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub struct StatsCounter {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_exceptions: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    total_load_time_nanos: AtomicU64,
}

impl StatsCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_load_success(&self, elapsed: Duration) {
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.add_load_time(elapsed);
    }

    pub fn record_load_failure(&self, elapsed: Duration) {
        self.load_exceptions.fetch_add(1, Ordering::Relaxed);
        self.add_load_time(elapsed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_expirations(&self, count: u64) {
        self.expirations.fetch_add(count, Ordering::Relaxed);
    }

    fn add_load_time(&self, elapsed: Duration) {
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_load_time_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            load_exceptions: self.load_exceptions.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            total_load_time_nanos: self.total_load_time_nanos.load(Ordering::Relaxed),
        }
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats.hits, 0);
        assert_eq!(stats.misses, 0);
        assert_eq!(stats.evictions, 0);
        assert_eq!(stats.request_count(), 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 1.0);
        assert_eq!(stats.miss_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let counter = StatsCounter::new();
        counter.record_hit();
        counter.record_miss();
        counter.record_hit();
        counter.record_hit();

        let stats = counter.snapshot();
        assert_eq!(stats.hit_rate(), 0.75);
        assert_eq!(stats.miss_rate(), 0.25);
    }

    #[test]
    fn test_load_penalty() {
        let counter = StatsCounter::new();
        counter.record_load_success(Duration::from_millis(30));
        counter.record_load_failure(Duration::from_millis(10));

        let stats = counter.snapshot();
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.load_exceptions, 1);
        assert_eq!(stats.average_load_penalty(), Duration::from_millis(20));
    }

    #[test]
    fn test_record_removals() {
        let counter = StatsCounter::new();
        counter.record_evictions(2);
        counter.record_expirations(3);

        let stats = counter.snapshot();
        assert_eq!(stats.evictions, 2);
        assert_eq!(stats.expirations, 3);
    }

    #[test]
    fn test_stats_serialize() {
        let json = serde_json::to_value(CacheStats::new()).unwrap();
        assert_eq!(json["hits"], 0);
        assert_eq!(json["load_exceptions"], 0);
    }
}
