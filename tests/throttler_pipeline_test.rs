// Integration tests for the throttler link inside a small pipeline
//
// receiver (Connector) -> throttler -> channel sink -> consumer task

use flowlink::config::parse_config;
use flowlink::message::AckReceiver;
use flowlink::throttler::ManualClock;
use flowlink::{
    ChannelSink, Connector, CounterRegistry, Link, Message, MsgStatus, Throttler, ThrottlerConfig,
};
use std::sync::Arc;
use std::time::Duration;

// ── Test pipeline ─────────────────────────────────────────────────────────────

struct Pipeline {
    receiver: Arc<Connector>,
    throttler: Arc<Throttler<ManualClock>>,
    clock: ManualClock,
    counters: Arc<CounterRegistry>,
    consumer: tokio::task::JoinHandle<Vec<Message>>,
}

fn build_pipeline(config: ThrottlerConfig) -> Pipeline {
    let clock = ManualClock::new(0);
    let counters = Arc::new(CounterRegistry::new());
    let throttler = Arc::new(
        Throttler::with_clock(config, counters.clone(), clock.clone()).expect("valid config"),
    );

    let (sink, mut sink_rx) = ChannelSink::new("collector");
    throttler.connect_to(Arc::new(sink));

    let receiver = Arc::new(Connector::new("receiver"));
    receiver.connect_to(throttler.clone());

    // Collect everything the throttler forwards
    let consumer = tokio::spawn(async move {
        let mut received = vec![];
        while let Some(msg) = sink_rx.recv().await {
            received.push(msg);
        }
        received
    });

    Pipeline {
        receiver,
        throttler,
        clock,
        counters,
        consumer,
    }
}

impl Pipeline {
    /// Close the pipeline and return the messages the consumer received
    async fn finish(self) -> Vec<Message> {
        drop(self.receiver);
        drop(self.throttler);
        self.consumer.await.unwrap()
    }
}

fn tenant_message(tenant: &str) -> (Message, AckReceiver) {
    let (msg, ack) = Message::with_ack(format!("payload for {}", tenant));
    (msg.meta_entry("tenant", tenant), ack)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

/// Within budget every message reaches the consumer.
#[tokio::test]
async fn test_within_limit_forwarded() {
    let pipeline = build_pipeline(ThrottlerConfig::new("ingress", 3));

    for _ in 0..3 {
        pipeline.receiver.send(Message::new("m")).unwrap();
    }

    let counters = pipeline.counters.clone();
    let received = pipeline.finish().await;
    assert_eq!(received.len(), 3);
    assert_eq!(counters.get("links.throttler.ingress_pass"), Some(3));
    assert!(!counters.has("links.throttler.ingress_reject"));
}

/// Over budget, producers are told the message was throttled.
#[tokio::test]
async fn test_excess_is_acked_throttled() {
    let pipeline = build_pipeline(ThrottlerConfig::new("ingress", 1));

    let (first, first_ack) = Message::with_ack("first");
    let (second, second_ack) = Message::with_ack("second");
    pipeline.receiver.send(first).unwrap();
    pipeline.receiver.send(second).unwrap();

    assert_eq!(second_ack.await.unwrap(), MsgStatus::Throttled);

    let received = pipeline.finish().await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].payload(), b"first");

    // The forwarded message's ack sender was dropped unacknowledged with it
    drop(received);
    assert!(first_ack.await.is_err());
}

/// One tenant exhausting its budget does not affect another.
#[tokio::test]
async fn test_tenants_are_isolated() {
    let pipeline = build_pipeline(ThrottlerConfig::new("ingress", 2).with_msg_key("tenant"));

    let mut acme_acks = vec![];
    for _ in 0..4 {
        let (msg, ack) = tenant_message("acme");
        pipeline.receiver.send(msg).unwrap();
        acme_acks.push(ack);
    }
    for _ in 0..2 {
        let (msg, _ack) = tenant_message("globex");
        pipeline.receiver.send(msg).unwrap();
    }

    let mut throttled = 0;
    for mut ack in acme_acks {
        if ack.try_recv() == Ok(MsgStatus::Throttled) {
            throttled += 1;
        }
    }
    assert_eq!(throttled, 2);

    let received = pipeline.finish().await;
    let globex = received
        .iter()
        .filter(|m| m.meta("tenant") == Some("globex"))
        .count();
    assert_eq!(globex, 2);
    assert_eq!(received.len(), 4);
}

/// After a full second of idleness the bucket is full again.
#[tokio::test]
async fn test_refill_after_idle_second() {
    let pipeline = build_pipeline(ThrottlerConfig::new("ingress", 5));

    for _ in 0..8 {
        pipeline.receiver.send(Message::new("burst")).unwrap();
    }
    pipeline.clock.advance(Duration::from_secs(1));
    for _ in 0..8 {
        pipeline.receiver.send(Message::new("after")).unwrap();
    }

    let counters = pipeline.counters.clone();
    let received = pipeline.finish().await;
    assert_eq!(received.len(), 10);
    assert_eq!(counters.get("links.throttler.ingress_pass"), Some(10));
    assert_eq!(counters.get("links.throttler.ingress_reject"), Some(6));
}

/// Concurrent tasks on one key: totals always add up and the budget is never overspent.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tasks_account_for_every_message() {
    let pipeline = build_pipeline(ThrottlerConfig::new("ingress", 25));

    let mut tasks = vec![];
    for _ in 0..8 {
        let receiver = Arc::clone(&pipeline.receiver);
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                receiver.send(Message::new("m")).unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let counters = pipeline.counters.clone();
    let bucket = pipeline.throttler.bucket("").unwrap();
    let received = pipeline.finish().await;

    let pass = counters.get("links.throttler.ingress_pass").unwrap_or(0);
    let reject = counters.get("links.throttler.ingress_reject").unwrap_or(0);
    assert_eq!(pass + reject, 80);
    assert_eq!(received.len() as i64, pass);
    assert_eq!(bucket.budget() + pass as u64, 25);
}

/// Tenants driven concurrently while time moves each settle at their own rate.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_tenants_converge_as_time_advances() {
    let pipeline = build_pipeline(ThrottlerConfig::new("ingress", 20).with_msg_key("tenant"));

    // 4 tasks x 1000 rounds x 1ms = 4 seconds of clock time; every round
    // sends for both tenants so each sees load across the whole run
    let mut tasks = vec![];
    for _ in 0..4 {
        let receiver = Arc::clone(&pipeline.receiver);
        let clock = pipeline.clock.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..1_000 {
                clock.advance(Duration::from_millis(1));
                for tenant in ["acme", "globex"] {
                    let (msg, _ack) = tenant_message(tenant);
                    receiver.send(msg).unwrap();
                }
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let received = pipeline.finish().await;
    for tenant in ["acme", "globex"] {
        let admitted = received
            .iter()
            .filter(|m| m.meta("tenant") == Some(tenant))
            .count();
        assert!(admitted >= 20 * 4, "{} admitted {}", tenant, admitted);
        assert!(admitted <= 20 * 4 + 20 + 1, "{} admitted {}", tenant, admitted);
    }
}

/// A throttler built from TOML behaves like one built in code.
#[tokio::test]
async fn test_throttler_from_config() {
    let config = parse_config(
        r#"
            [throttler]
            name = "edge"
            rps = 2
            msg_key = "tenant"
        "#,
    )
    .unwrap();

    let pipeline = build_pipeline(config.throttler);
    assert_eq!(pipeline.throttler.name(), "edge");

    for _ in 0..3 {
        let (msg, _ack) = tenant_message("acme");
        pipeline.receiver.send(msg).unwrap();
    }

    let counters = pipeline.counters.clone();
    pipeline.finish().await;
    assert_eq!(counters.get("links.throttler.edge_pass"), Some(2));
    assert_eq!(counters.get("links.throttler.edge_reject"), Some(1));
}
