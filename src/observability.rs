//! Observability hooks and inspection counters.
//!
//! The engine separates observability into two concerns:
//!
//! - **Metrics (`CacheMetrics`)**: per-operation hooks for hits, misses,
//!   writes, evictions and absorbed errors. Plug in your own collector.
//! - **Stats (`CacheStats`, `QueryStats`)**: point-in-time counters for
//!   debugging dashboards. Not used for correctness.
//!
//! ```ignore
//! use cache_sync::observability::CacheMetrics;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hit(&self, _key: &str) {
//!         // counter!("cache_hits").inc();
//!     }
//! }
//!
//! // let store = CacheStore::new(config, storage).with_metrics(Box::new(PrometheusMetrics));
//! ```

use serde::Serialize;

/// Trait for cache metrics collection.
///
/// The default methods log through the `log` crate.
pub trait CacheMetrics: Send + Sync {
    /// A read found a live entry.
    fn record_hit(&self, key: &str) {
        debug!("Cache HIT: {}", key);
    }

    /// A read found nothing, or only a dead entry.
    fn record_miss(&self, key: &str) {
        debug!("Cache MISS: {}", key);
    }

    /// An entry was written.
    fn record_write(&self, key: &str) {
        debug!("Cache WRITE: {}", key);
    }

    /// `count` entries were removed by capacity eviction.
    fn record_eviction(&self, count: usize) {
        debug!("Cache EVICT: {} entries", count);
    }

    /// An error was absorbed (storage or serialization).
    fn record_error(&self, key: &str, error: &str) {
        warn!("Cache ERROR for {}: {}", key, error);
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hit(&self, _key: &str) {}
    fn record_miss(&self, _key: &str) {}
    fn record_write(&self, _key: &str) {}
    fn record_eviction(&self, _count: usize) {}
    fn record_error(&self, _key: &str, _error: &str) {}
}

/// Cache store counters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total: usize,
    pub valid: usize,
    pub expired: usize,
    pub max_entries: usize,
}

/// Counters for the query layer built on the reconciliation engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    /// Keys currently held by the store.
    pub queries: usize,
    /// Keys held but past their expiry.
    pub stale: usize,
    /// Keys with a reconciliation in flight.
    pub fetching: usize,
}
