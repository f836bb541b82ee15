use dashmap::DashMap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

mod reporter;
#[cfg(test)]
mod tests;

pub use reporter::run_reporter;

/// Capability for recording named counter deltas.
///
/// Links receive a sink at construction instead of reaching for a
/// process-wide registry, so tests can hand each link its own counters.
pub trait MetricsSink: Send + Sync {
    /// Add `delta` to the counter called `name`, creating it at 0 if needed.
    fn increment(&self, name: &str, delta: i64);
}

/// Named integer counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicI64,
}

impl Counter {
    /// Create new counter at zero
    pub fn new() -> Self {
        Self {
            value: AtomicI64::new(0),
        }
    }

    /// Add `delta` to the counter
    pub fn inc(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    /// Current value
    pub fn get(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Registry of named counters, created lazily on first access.
///
/// Lookups and increments go through a `DashMap`, so any number of threads
/// can share one registry behind an `Arc`.
#[derive(Default)]
pub struct CounterRegistry {
    counters: DashMap<String, Arc<Counter>>,
}

impl CounterRegistry {
    /// Create new empty registry
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
        }
    }

    /// Get the counter for `name`, registering it at zero if absent
    pub fn counter(&self, name: &str) -> Arc<Counter> {
        if let Some(existing) = self.counters.get(name) {
            return Arc::clone(existing.value());
        }

        let entry = self
            .counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Counter::new()));
        Arc::clone(entry.value())
    }

    /// Check whether a counter has been registered, without creating it
    pub fn has(&self, name: &str) -> bool {
        self.counters.contains_key(name)
    }

    /// Current value of `name`, or None if it was never registered
    pub fn get(&self, name: &str) -> Option<i64> {
        self.counters.get(name).map(|c| c.get())
    }

    /// Number of registered counters
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Point-in-time copy of every counter, ordered by name
    pub fn snapshot(&self) -> CounterSnapshot {
        let counters = self
            .counters
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().get()))
            .collect();

        CounterSnapshot { counters }
    }
}

impl MetricsSink for CounterRegistry {
    fn increment(&self, name: &str, delta: i64) {
        self.counter(name).inc(delta);
    }
}

/// Sink that discards every increment
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _delta: i64) {}
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CounterSnapshot {
    pub counters: BTreeMap<String, i64>,
}

impl CounterSnapshot {
    /// Value of `name` at snapshot time (0 if it was not registered)
    pub fn value(&self, name: &str) -> i64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}
