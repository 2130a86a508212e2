//! Cache hit/miss accounting.
//!
//! Counters are updated from concurrent `route` calls, so they are atomics.
//! Each update is also forwarded to the `metrics` facade; without an
//! installed recorder that is a no-op.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CacheStats {
    query_count: AtomicU64,
    cache_hits: AtomicU64,
}

impl CacheStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed `get`.
    pub fn record_get(&self, hit: bool) {
        self.query_count.fetch_add(1, Ordering::SeqCst);
        metrics::counter!("cache_queries_total").increment(1);
        if hit {
            self.cache_hits.fetch_add(1, Ordering::SeqCst);
            metrics::counter!("cache_hits_total").increment(1);
        }
    }

    pub fn snapshot(&self) -> Stats {
        // Hits are bumped after queries, so load hits first to never report
        // more hits than queries.
        let cache_hits = self.cache_hits.load(Ordering::SeqCst);
        let query_count = self.query_count.load(Ordering::SeqCst);
        Stats::new(query_count, cache_hits)
    }
}

/// Read-only snapshot of the router's counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Stats {
    pub query_count: u64,
    pub cache_hits: u64,
    /// `None` until the first `get`.
    pub hit_ratio: Option<f64>,
}

impl Stats {
    fn new(query_count: u64, cache_hits: u64) -> Self {
        let hit_ratio = if query_count > 0 {
            Some(cache_hits as f64 / query_count as f64)
        } else {
            None
        };
        Self {
            query_count,
            cache_hits,
            hit_ratio,
        }
    }

    pub fn cache_misses(&self) -> u64 {
        self.query_count - self.cache_hits
    }
}

impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.hit_ratio {
            Some(ratio) => write!(
                f,
                "total queries: {}, cache hits: {} ({:.2}), cache misses: {} ({:.2})",
                self.query_count,
                self.cache_hits,
                ratio,
                self.cache_misses(),
                1.0 - ratio
            ),
            None => write!(f, "total queries: 0, hit ratio: undefined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stats_have_no_ratio() {
        let stats = CacheStats::new().snapshot();
        assert_eq!(stats.query_count, 0);
        assert_eq!(stats.hit_ratio, None);
        assert!(stats.to_string().contains("undefined"));
    }

    #[test]
    fn test_counts_and_ratio() {
        let stats = CacheStats::new();
        for hit in [true, false, true, true] {
            stats.record_get(hit);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.query_count, 4);
        assert_eq!(snap.cache_hits, 3);
        assert_eq!(snap.cache_misses(), 1);
        assert_eq!(snap.hit_ratio, Some(0.75));
    }
}
