// Throttler link: per-key token bucket admission control
//
// Each key owns a bucket of `rps` permits that refills continuously. A message
// is forwarded when its bucket can pay one permit, otherwise it is acked as
// throttled. Buckets are updated with a bounded compare-and-swap loop; no
// lock is held while refilling or paying.

use crate::link::{Connector, Link, LinkError};
use crate::message::Message;
use crate::metrics::MetricsSink;
use std::sync::Arc;
use tracing::{info, trace};

mod bucket;
mod clock;
mod config;

pub use bucket::{Bucket, BucketState, BucketStore};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ThrottlerConfig, MAX_RPS};

/// Attempts per `admit` call before a message is rejected.
///
/// Losing this many races in a row counts as a rejection even if budget was
/// available.
pub const MAX_ADMIT_ATTEMPTS: usize = 10;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;

/// Rate limiting link.
pub struct Throttler<C: Clock = SystemClock> {
    config: ThrottlerConfig,
    buckets: BucketStore,
    metrics: Arc<dyn MetricsSink>,
    clock: C,
    connector: Connector,
    pass_counter: String,
    reject_counter: String,
}

impl Throttler {
    /// Create a throttler on the system clock.
    ///
    /// Fails if the configuration is invalid; no link is created then.
    pub fn new(config: ThrottlerConfig, metrics: Arc<dyn MetricsSink>) -> Result<Self, ConfigError> {
        Self::with_clock(config, metrics, SystemClock)
    }
}

impl<C: Clock> Throttler<C> {
    /// Create a throttler reading time from `clock`
    pub fn with_clock(
        config: ThrottlerConfig,
        metrics: Arc<dyn MetricsSink>,
        clock: C,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        info!(
            link = %config.name,
            rps = config.rps,
            msg_key = config.partition_field().unwrap_or(""),
            "Created throttler"
        );

        Ok(Self {
            pass_counter: format!("links.throttler.{}_pass", config.name),
            reject_counter: format!("links.throttler.{}_reject", config.name),
            connector: Connector::new(config.name.clone()),
            buckets: BucketStore::new(),
            config,
            metrics,
            clock,
        })
    }

    /// Set the link that receives admitted messages
    pub fn connect_to(&self, next: Arc<dyn Link>) {
        self.connector.connect_to(next);
    }

    pub fn config(&self) -> &ThrottlerConfig {
        &self.config
    }

    /// Number of keys seen so far
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket for `key`, if a message with that key has been seen
    pub fn bucket(&self, key: &str) -> Option<Arc<Bucket>> {
        self.buckets.get(key)
    }

    pub fn pass_counter_name(&self) -> &str {
        &self.pass_counter
    }

    pub fn reject_counter_name(&self) -> &str {
        &self.reject_counter
    }

    /// Partition key for `msg`: the configured metadata field, or "" when
    /// partitioning is off or the field is missing.
    pub fn resolve_key<'a>(&self, msg: &'a Message) -> &'a str {
        self.config
            .partition_field()
            .and_then(|field| msg.meta(field))
            .unwrap_or("")
    }

    /// Admit or reject one message.
    ///
    /// Admitted messages go to the downstream link and its result is
    /// returned as is. Rejected messages are acked as throttled; rejection is
    /// not an error.
    pub fn admit(&self, msg: Message) -> Result<(), LinkError> {
        let key = self.resolve_key(&msg);

        let bucket = self
            .buckets
            .get_or_create(key, self.config.rps, self.clock.now_nanos());
        let age_ms = msg.age().num_milliseconds();

        if self.try_admit(&bucket) {
            trace!(link = %self.config.name, key, msg_id = %msg.id, age_ms, "Admitted");
            self.metrics.increment(&self.pass_counter, 1);
            self.connector.send(msg)
        } else {
            trace!(link = %self.config.name, key, msg_id = %msg.id, age_ms, "Throttled");
            self.metrics.increment(&self.reject_counter, 1);
            msg.ack_throttled()
        }
    }

    /// Try to take one permit from `bucket`.
    ///
    /// Each attempt refills the budget by the permits accrued since the last
    /// commit, pays one permit and clamps to `rps`. The timestamp advances by
    /// the time the credited permits cover, or to `now` when the clamp drops
    /// surplus. Both fields are published with a single CAS. An attempt fails
    /// when the budget would go negative or another caller committed first;
    /// after `MAX_ADMIT_ATTEMPTS` failed attempts the permit is refused.
    pub fn try_admit(&self, bucket: &Bucket) -> bool {
        let rate_limit = self.config.rps;

        for _ in 0..MAX_ADMIT_ATTEMPTS {
            let now = self.clock.now_nanos();
            let current = bucket.load();

            // Clock readings from other threads may trail the committed time
            let elapsed = now.saturating_sub(current.last_refill_time);
            let extra = (elapsed as f64 * rate_limit as f64 / NANOS_PER_SEC).round() as i128;

            let candidate = current.budget as i128 + extra - 1;
            if candidate < 0 {
                continue;
            }

            let next = if candidate > rate_limit as i128 {
                // Full bucket: surplus accrual is dropped along with its time
                BucketState {
                    last_refill_time: now.max(current.last_refill_time),
                    budget: rate_limit,
                }
            } else {
                BucketState {
                    last_refill_time: credited_until(current.last_refill_time, extra, rate_limit),
                    budget: candidate as u64,
                }
            };

            if bucket.compare_and_swap(current, next) {
                return true;
            }
        }

        false
    }
}

/// Timestamp after crediting `extra` permits accrued since `last_refill_time`.
///
/// Only the time those permits cover is consumed; the fraction of a permit
/// left over by rounding carries into the next refill.
fn credited_until(last_refill_time: u64, extra: i128, rate_limit: u64) -> u64 {
    if extra <= 0 || rate_limit == 0 {
        return last_refill_time;
    }

    let credited = extra as u128 * NANOS_PER_SEC as u128 / rate_limit as u128;
    last_refill_time.saturating_add(u64::try_from(credited).unwrap_or(u64::MAX))
}

impl<C: Clock> Link for Throttler<C> {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn recv(&self, msg: Message) -> Result<(), LinkError> {
        self.admit(msg)
    }
}
