//! Cache Statistics Module
//!
//! Tracks read outcomes and how expirations were resolved.

use serde::Serialize;

// == Cache Stats ==
/// Tracks cache performance metrics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of successful reads
    pub hits: u64,
    /// Number of reads that found nothing (absent or removed on expiry)
    pub misses: u64,
    /// Number of `Expired` records emitted
    pub expirations: u64,
    /// Expirations resolved by replacing the value
    pub replacements: u64,
    /// Expirations resolved by removing the entry
    pub removals_by_expiry: u64,
    /// Replacement factories that returned an error
    pub factory_failures: u64,
    /// Expirations discarded because a newer mutation won the race
    pub superseded: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no reads have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    pub fn record_hit(&mut self) {
        self.hits += 1;
    }

    pub fn record_miss(&mut self) {
        self.misses += 1;
    }

    pub fn record_expiration(&mut self) {
        self.expirations += 1;
    }

    pub fn record_replacement(&mut self) {
        self.replacements += 1;
    }

    pub fn record_removal_by_expiry(&mut self) {
        self.removals_by_expiry += 1;
    }

    pub fn record_factory_failure(&mut self) {
        self.factory_failures += 1;
    }

    pub fn record_superseded(&mut self) {
        self.superseded += 1;
    }

    // == Update Entry Count ==
    /// Updates the total entries count.
    pub fn set_total_entries(&mut self, count: usize) {
        self.total_entries = count;
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_new() {
        let stats = CacheStats::new();
        assert_eq!(stats, CacheStats::default());
        assert_eq!(stats.total_entries, 0);
    }

    #[test]
    fn test_hit_rate_no_requests() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_rate(), 0.0);
    }

    #[test]
    fn test_hit_rate_mixed() {
        let mut stats = CacheStats::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        assert_eq!(stats.hit_rate(), 0.75);
    }

    #[test]
    fn test_expiration_counters() {
        let mut stats = CacheStats::new();
        stats.record_expiration();
        stats.record_expiration();
        stats.record_replacement();
        stats.record_removal_by_expiry();
        stats.record_factory_failure();
        stats.record_superseded();

        assert_eq!(stats.expirations, 2);
        assert_eq!(stats.replacements, 1);
        assert_eq!(stats.removals_by_expiry, 1);
        assert_eq!(stats.factory_failures, 1);
        assert_eq!(stats.superseded, 1);
    }

    #[test]
    fn test_set_total_entries() {
        let mut stats = CacheStats::new();
        stats.set_total_entries(42);
        assert_eq!(stats.total_entries, 42);
    }
}
