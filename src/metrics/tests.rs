use super::*;
use std::thread;

#[test]
fn test_increment_creates_counter() {
    let registry = CounterRegistry::new();

    assert!(!registry.has("links.throttler.t1_pass"));

    registry.increment("links.throttler.t1_pass", 1);
    assert!(registry.has("links.throttler.t1_pass"));
    assert_eq!(registry.get("links.throttler.t1_pass"), Some(1));

    registry.increment("links.throttler.t1_pass", 4);
    assert_eq!(registry.get("links.throttler.t1_pass"), Some(5));
}

#[test]
fn test_has_does_not_create() {
    let registry = CounterRegistry::new();

    assert!(!registry.has("missing"));
    assert!(!registry.has("missing"));
    assert_eq!(registry.get("missing"), None);
    assert!(registry.is_empty());
}

#[test]
fn test_negative_delta() {
    let registry = CounterRegistry::new();

    registry.increment("inflight", 3);
    registry.increment("inflight", -2);
    assert_eq!(registry.get("inflight"), Some(1));
}

#[test]
fn test_counter_handle_shares_state() {
    let registry = CounterRegistry::new();

    let handle = registry.counter("shared");
    handle.inc(7);
    registry.increment("shared", 1);

    assert_eq!(handle.get(), 8);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_snapshot_is_sorted_and_detached() {
    let registry = CounterRegistry::new();

    registry.increment("b", 2);
    registry.increment("a", 1);

    let snapshot = registry.snapshot();
    let names: Vec<&String> = snapshot.counters.keys().collect();
    assert_eq!(names, vec!["a", "b"]);

    registry.increment("a", 10);
    assert_eq!(snapshot.value("a"), 1);
    assert_eq!(snapshot.value("never"), 0);
}

#[test]
fn test_snapshot_serializes() {
    let registry = CounterRegistry::new();
    registry.increment("links.throttler.t1_reject", 3);

    let json = serde_json::to_value(registry.snapshot()).unwrap();
    assert_eq!(json["counters"]["links.throttler.t1_reject"], 3);
}

#[test]
fn test_noop_metrics_records_nothing_beside_a_registry() {
    let registry = Arc::new(CounterRegistry::new());
    let sinks: Vec<Arc<dyn MetricsSink>> = vec![Arc::new(NoopMetrics), registry.clone()];

    for sink in &sinks {
        sink.increment("links.throttler.t1_pass", 1);
    }

    // Only the registry's increment landed
    assert_eq!(registry.get("links.throttler.t1_pass"), Some(1));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_concurrent_increments() {
    let registry = Arc::new(CounterRegistry::new());
    let mut handles = vec![];

    // 10 threads race on first touch of the same counter
    for _ in 0..10 {
        let registry_clone = Arc::clone(&registry);
        let handle = thread::spawn(move || {
            for _ in 0..100 {
                registry_clone.increment("hot", 1);
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.get("hot"), Some(1000));
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_reporter_keeps_running() {
    let registry = Arc::new(CounterRegistry::new());
    registry.increment("links.throttler.t1_pass", 2);

    let result = tokio::time::timeout(
        std::time::Duration::from_millis(50),
        run_reporter(Arc::clone(&registry), 1),
    )
    .await;

    // Only ends when cancelled
    assert!(result.is_err());
    assert_eq!(registry.get("links.throttler.t1_pass"), Some(2));
}
