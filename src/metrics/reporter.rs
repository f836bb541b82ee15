use super::CounterRegistry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Periodically log a snapshot of every counter
///
/// Runs until the task is dropped or aborted.
pub async fn run_reporter(registry: Arc<CounterRegistry>, interval_seconds: u64) {
    let mut ticker = interval(Duration::from_secs(interval_seconds.max(1)));

    // Skip missed ticks to prevent backlog under load
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;

        let snapshot = registry.snapshot();
        match serde_json::to_string(&snapshot.counters) {
            Ok(counters) => info!(%counters, "Counter snapshot"),
            Err(e) => warn!("Failed to serialize counter snapshot: {}", e),
        }
    }
}
