// Process-wide counters and the metrics sink capability
pub mod metrics;

// Pipeline message model and acknowledgments
pub mod message;

// Link contract, forwarding connector, channel sink
pub mod link;

// Per-key token bucket rate limiting link
pub mod throttler;

// TOML configuration with env overrides
pub mod config;

pub use link::{ChannelSink, Connector, Link, LinkError};
pub use message::{Message, MsgStatus};
pub use metrics::{CounterRegistry, MetricsSink};
pub use throttler::{Throttler, ThrottlerConfig};
