//! Observability and TTL policy for cached families.
//!
//! This module provides the metrics hooks the expander reports through and the
//! policy deciding how long repopulated entries live.
//!
//! # Metrics
//!
//! Implement [`CacheMetrics`] to feed your monitoring system. Every hook is
//! keyed by cache family and receives batch counts, since one `find` resolves
//! many lookup values at once:
//!
//! ```ignore
//! use cache_table::observability::CacheMetrics;
//! use std::time::Duration;
//!
//! struct PrometheusMetrics;
//!
//! impl CacheMetrics for PrometheusMetrics {
//!     fn record_hits(&self, family: &str, count: usize) {
//!         // counter!("cache_hits", "family" => family).inc_by(count);
//!     }
//!     // ... other hooks keep their logging defaults
//! }
//!
//! // let expander = CacheExpander::new(backend)
//! //     .with_metrics(Box::new(PrometheusMetrics));
//! ```
//!
//! The trait defaults log through the `log` crate; [`NoOpMetrics`] discards
//! everything and [`CounterMetrics`] keeps totals in atomics.
//!
//! # TTL Policies
//!
//! ```
//! use cache_table::observability::TtlPolicy;
//! use std::time::Duration;
//!
//! let _policy = TtlPolicy::Fixed(Duration::from_secs(300));
//!
//! let _policy = TtlPolicy::PerFamily(|family| match family {
//!     "users" => Duration::from_secs(3600),
//!     _ => Duration::from_secs(600),
//! });
//! ```
//!
//! | Policy | Use Case |
//! |--------|----------|
//! | `Default` | Let the store decide (no expiry on Redis) |
//! | `Fixed` | Uniform lifetime for every family |
//! | `Infinite` | Reference data that never expires |
//! | `PerFamily` | Lifetime chosen per cache family |

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Hooks for cache metrics collection.
pub trait CacheMetrics: Send + Sync {
    /// Lookup values served from the cache.
    fn record_hits(&self, family: &str, count: usize) {
        debug!("Cache HIT: {} x{}", family, count);
    }

    /// Lookup values missing from the cache.
    fn record_misses(&self, family: &str, count: usize) {
        debug!("Cache MISS: {} x{}", family, count);
    }

    /// A lookup value found in neither store.
    fn record_not_found(&self, family: &str, value: &str) {
        debug!("NOT FOUND: {} {}", family, value);
    }

    /// Entries written to the cache.
    fn record_set(&self, family: &str, count: usize, duration: Duration) {
        debug!("Cache SET: {} x{} took {:?}", family, count, duration);
    }

    /// Entries removed from the cache.
    fn record_delete(&self, family: &str, count: usize) {
        debug!("Cache DELETE: {} x{}", family, count);
    }

    /// A whole `find` call.
    fn record_find(&self, family: &str, requested: usize, duration: Duration) {
        debug!("FIND: {} x{} took {:?}", family, requested, duration);
    }

    /// A failed or degraded operation.
    fn record_error(&self, family: &str, op: &str, error: &str) {
        warn!("Cache ERROR for {} during {}: {}", family, op, error);
    }
}

impl<M: CacheMetrics + ?Sized> CacheMetrics for Arc<M> {
    fn record_hits(&self, family: &str, count: usize) {
        (**self).record_hits(family, count)
    }
    fn record_misses(&self, family: &str, count: usize) {
        (**self).record_misses(family, count)
    }
    fn record_not_found(&self, family: &str, value: &str) {
        (**self).record_not_found(family, value)
    }
    fn record_set(&self, family: &str, count: usize, duration: Duration) {
        (**self).record_set(family, count, duration)
    }
    fn record_delete(&self, family: &str, count: usize) {
        (**self).record_delete(family, count)
    }
    fn record_find(&self, family: &str, requested: usize, duration: Duration) {
        (**self).record_find(family, requested, duration)
    }
    fn record_error(&self, family: &str, op: &str, error: &str) {
        (**self).record_error(family, op, error)
    }
}

/// Default metrics implementation (no-op).
#[derive(Clone, Default)]
pub struct NoOpMetrics;

impl CacheMetrics for NoOpMetrics {
    fn record_hits(&self, _family: &str, _count: usize) {}
    fn record_misses(&self, _family: &str, _count: usize) {}
    fn record_not_found(&self, _family: &str, _value: &str) {}
    fn record_set(&self, _family: &str, _count: usize, _duration: Duration) {}
    fn record_delete(&self, _family: &str, _count: usize) {}
    fn record_find(&self, _family: &str, _requested: usize, _duration: Duration) {}
    fn record_error(&self, _family: &str, _op: &str, _error: &str) {}
}

/// Running totals across all families.
#[derive(Debug, Default)]
pub struct CounterMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub not_found: AtomicU64,
    pub sets: AtomicU64,
    pub deletes: AtomicU64,
    pub finds: AtomicU64,
    pub errors: AtomicU64,
}

impl CounterMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }
}

impl CacheMetrics for CounterMetrics {
    fn record_hits(&self, _family: &str, count: usize) {
        self.hits.fetch_add(count as u64, Ordering::Relaxed);
    }
    fn record_misses(&self, _family: &str, count: usize) {
        self.misses.fetch_add(count as u64, Ordering::Relaxed);
    }
    fn record_not_found(&self, _family: &str, _value: &str) {
        self.not_found.fetch_add(1, Ordering::Relaxed);
    }
    fn record_set(&self, _family: &str, count: usize, _duration: Duration) {
        self.sets.fetch_add(count as u64, Ordering::Relaxed);
    }
    fn record_delete(&self, _family: &str, count: usize) {
        self.deletes.fetch_add(count as u64, Ordering::Relaxed);
    }
    fn record_find(&self, _family: &str, _requested: usize, _duration: Duration) {
        self.finds.fetch_add(1, Ordering::Relaxed);
    }
    fn record_error(&self, family: &str, op: &str, error: &str) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!("Cache ERROR for {} during {}: {}", family, op, error);
    }
}

/// TTL (Time-to-Live) policy for cache entries.
#[derive(Clone, Debug, Default)]
pub enum TtlPolicy {
    /// Use the store's default (no expiry)
    #[default]
    Default,

    /// Fixed duration for all entries
    Fixed(Duration),

    /// No TTL (entries live forever)
    Infinite,

    /// Custom per-family policy
    PerFamily(fn(&str) -> Duration),
}

impl TtlPolicy {
    /// TTL for entries of a cache family.
    pub fn get_ttl(&self, family: &str) -> Option<Duration> {
        match self {
            TtlPolicy::Default => None,
            TtlPolicy::Fixed(d) => Some(*d),
            TtlPolicy::Infinite => None,
            TtlPolicy::PerFamily(f) => Some(f(family)),
        }
    }
}
