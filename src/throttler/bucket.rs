//! Per-key token bucket state.

use dashmap::DashMap;
use portable_atomic::AtomicU128;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Decoded view of a bucket word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BucketState {
    /// Clock reading (nanoseconds) of the last committed update
    pub last_refill_time: u64,
    /// Remaining permits
    pub budget: u64,
}

impl BucketState {
    fn pack(self) -> u128 {
        ((self.last_refill_time as u128) << 64) | self.budget as u128
    }

    fn unpack(word: u128) -> Self {
        Self {
            last_refill_time: (word >> 64) as u64,
            budget: word as u64,
        }
    }
}

/// Rate limit budget for one key.
///
/// Timestamp and budget share a single 128-bit atomic word, so a refill and
/// the matching decrement are published by one compare-and-swap.
#[derive(Debug)]
pub struct Bucket {
    state: AtomicU128,
}

impl Bucket {
    pub fn new(budget: u64, now: u64) -> Self {
        let state = BucketState {
            last_refill_time: now,
            budget,
        };
        Self {
            state: AtomicU128::new(state.pack()),
        }
    }

    /// Consistent snapshot of timestamp and budget
    pub fn load(&self) -> BucketState {
        BucketState::unpack(self.state.load(Ordering::Acquire))
    }

    pub fn budget(&self) -> u64 {
        self.load().budget
    }

    pub fn last_refill_time(&self) -> u64 {
        self.load().last_refill_time
    }

    /// Publish `next` if the bucket still holds `current`.
    ///
    /// Returns false when another caller committed first.
    pub fn compare_and_swap(&self, current: BucketState, next: BucketState) -> bool {
        self.state
            .compare_exchange(current.pack(), next.pack(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Lazily populated map from partition key to bucket.
///
/// Buckets are never removed; memory grows with the number of distinct keys.
#[derive(Debug, Default)]
pub struct BucketStore {
    buckets: DashMap<String, Arc<Bucket>>,
}

impl BucketStore {
    pub fn new() -> Self {
        Self {
            buckets: DashMap::new(),
        }
    }

    /// Get the bucket for `key`, creating it full (`rate_limit` permits,
    /// refilled at `now`) on first sight.
    ///
    /// Concurrent first touches of a key all receive the same bucket, and
    /// only one of them builds it.
    pub fn get_or_create(&self, key: &str, rate_limit: u64, now: u64) -> Arc<Bucket> {
        if let Some(bucket) = self.buckets.get(key) {
            return Arc::clone(bucket.value());
        }

        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| {
                debug!(key, rate_limit, "New rate limit bucket");
                Arc::new(Bucket::new(rate_limit, now))
            });
        Arc::clone(bucket.value())
    }

    pub fn get(&self, key: &str) -> Option<Arc<Bucket>> {
        self.buckets.get(key).map(|b| Arc::clone(b.value()))
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
