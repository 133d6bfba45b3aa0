//! In-process metrics registry.
//!
//! Counters and gauges here are readable by the process itself: the live
//! ingest gauges feed the roll over predicate, and the metadata store's
//! failure counters are part of its contract. Handles are cheap clones
//! sharing one atomic cell, so hot paths keep a handle instead of going
//! through the registry map.

use dashmap::DashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// A monotonically increasing counter.
#[derive(Debug, Clone, Default)]
pub struct Counter {
    count: Arc<AtomicU64>,
}

impl Counter {
    /// Increment by one, returning the new value.
    pub fn increment(&self) -> u64 {
        self.add(1)
    }

    /// Increment by `n`, returning the new value.
    pub fn add(&self, n: u64) -> u64 {
        self.count.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn value(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// A settable gauge. Readers tolerate torn reads on the hot path; the
/// single writer is the only mutator.
#[derive(Debug, Clone, Default)]
pub struct Gauge {
    value: Arc<AtomicI64>,
}

impl Gauge {
    pub fn set(&self, value: i64) {
        self.value.store(value, Ordering::Relaxed);
    }

    /// Add `delta`, returning the new value.
    pub fn add(&self, delta: i64) -> i64 {
        self.value.fetch_add(delta, Ordering::Relaxed) + delta
    }

    /// Increment by one, returning the new value.
    pub fn increment(&self) -> i64 {
        self.add(1)
    }

    pub fn value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named counters and gauges shared across components.
#[derive(Debug, Clone, Default)]
pub struct MetricsRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    counters: DashMap<String, Counter>,
    gauges: DashMap<String, Gauge>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the counter registered under `name`.
    pub fn counter(&self, name: &str) -> Counter {
        self.inner
            .counters
            .entry(name.to_owned())
            .or_insert_with(Counter::default)
            .clone()
    }

    /// Get or create the gauge registered under `name`.
    pub fn gauge(&self, name: &str) -> Gauge {
        self.inner
            .gauges
            .entry(name.to_owned())
            .or_insert_with(Gauge::default)
            .clone()
    }

    /// Current value of a counter; zero if it was never registered.
    pub fn counter_value(&self, name: &str) -> u64 {
        self.inner.counters.get(name).map(|c| c.value().value()).unwrap_or(0)
    }

    /// Current value of a gauge; zero if it was never registered.
    pub fn gauge_value(&self, name: &str) -> i64 {
        self.inner.gauges.get(name).map(|g| g.value().value()).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_handles_share_state() {
        let registry = MetricsRegistry::new();
        let a = registry.counter("requests");
        let b = registry.counter("requests");

        a.increment();
        b.add(2);

        assert_eq!(registry.counter_value("requests"), 3);
        assert_eq!(a.value(), 3);
    }

    #[test]
    fn test_gauge_set_and_add() {
        let registry = MetricsRegistry::new();
        let gauge = registry.gauge("live_bytes");

        assert_eq!(gauge.add(100), 100);
        assert_eq!(gauge.add(-40), 60);
        gauge.set(0);
        assert_eq!(registry.gauge_value("live_bytes"), 0);
    }

    #[test]
    fn test_unregistered_metrics_read_zero() {
        let registry = MetricsRegistry::new();
        assert_eq!(registry.counter_value("missing"), 0);
        assert_eq!(registry.gauge_value("missing"), 0);
    }
}
