//! EventBusActor tests
//!
//! These tests verify pub/sub semantics of the bus:
//! - Fan-out to every matching subscription, in creation order per subscriber
//! - Handler faults are isolated from the publisher and other subscribers
//! - Filters gate delivery after pattern matching
//! - Synchronous publish reports one outcome per eligible subscription

use std::sync::{Arc, Mutex};

use agentbus::actors::event_bus::{
    self, EventBusActor, EventBusArguments, EventBusError, EventBusMsg, SubscribeOptions,
};
use agentbus::config::AgentBusConfig;
use agentbus::delivery::{DispatchMode, DispatchResult};
use agentbus::handler::{handler_fn, ChannelHandler, Delivery, DeliveryError, EventHandler};
use agentbus::observability::{DispatchKind, DispatchOrigin, DispatchTelemetry};
use agentbus::AppState;
use ractor::{Actor, ActorRef};
use serde_json::json;
use shared_types::{DeliveryOutcome, Envelope};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{timeout, Duration, Instant};

// ============================================================================
// Test Fixtures and Helpers
// ============================================================================

async fn spawn_bus() -> ActorRef<EventBusMsg> {
    spawn_bus_with(EventBusArguments::default()).await
}

async fn spawn_bus_with(args: EventBusArguments) -> ActorRef<EventBusMsg> {
    let (bus, _handle) = Actor::spawn(None, EventBusActor, args)
        .await
        .expect("Failed to spawn EventBusActor");
    bus
}

async fn channel_subscription(
    bus: &ActorRef<EventBusMsg>,
    pattern: &str,
) -> UnboundedReceiver<Arc<Envelope>> {
    let (handler, rx) = ChannelHandler::channel();
    event_bus::subscribe(bus, pattern, handler, SubscribeOptions::default())
        .await
        .expect("subscribe failed");
    rx
}

async fn recv(rx: &mut UnboundedReceiver<Arc<Envelope>>) -> Arc<Envelope> {
    timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for envelope")
        .expect("channel closed")
}

async fn assert_nothing_received(rx: &mut UnboundedReceiver<Arc<Envelope>>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "subscriber should not receive this event");
}

fn envelope(event_type: &str) -> Envelope {
    Envelope::new("/test", event_type, None).unwrap()
}

/// Accepts deliveries and never confirms them.
#[derive(Default)]
struct Stalled {
    held: Mutex<Vec<Delivery>>,
}

impl EventHandler for Stalled {
    fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        self.held.lock().unwrap().push(delivery);
        Ok(())
    }

    fn describe(&self) -> String {
        "stalled".to_string()
    }
}

// ============================================================================
// Fan-out
// ============================================================================

#[tokio::test]
async fn test_publish_fans_out_to_every_matching_subscription() {
    // Given: subscriptions with overlapping and unrelated patterns
    let bus = spawn_bus().await;
    let mut prefix = channel_subscription(&bus, "com.example.*").await;
    let mut suffix = channel_subscription(&bus, "*.created").await;
    let mut any = channel_subscription(&bus, "*").await;
    let mut exact = channel_subscription(&bus, "com.example.created").await;
    let mut unrelated = channel_subscription(&bus, "com.other.*").await;

    // When: one envelope is published
    let published = envelope("com.example.created");
    event_bus::publish(&bus, published.clone()).unwrap();

    // Then: every matching subscription receives it exactly once
    for rx in [&mut prefix, &mut suffix, &mut any, &mut exact] {
        assert_eq!(recv(rx).await.id(), published.id());
        assert_nothing_received(rx).await;
    }
    assert_nothing_received(&mut unrelated).await;
}

#[tokio::test]
async fn test_closure_subscriber_sees_only_matching_types() {
    // Given: a closure subscribed to user events
    let bus = spawn_bus().await;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    event_bus::subscribe(
        &bus,
        "user.*",
        handler_fn(move |envelope| {
            sink.lock().unwrap().push(envelope.event_type().to_string());
            Ok(())
        }),
        SubscribeOptions::default(),
    )
    .await
    .unwrap();

    // When: a matching and a non-matching envelope are published
    event_bus::publish(&bus, envelope("user.created")).unwrap();
    event_bus::publish(&bus, envelope("order.created")).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Then: only the user event was handled
    assert_eq!(*seen.lock().unwrap(), vec!["user.created".to_string()]);
}

#[tokio::test]
async fn test_exact_pattern_ignores_sibling_types() {
    let bus = spawn_bus().await;
    let mut rx = channel_subscription(&bus, "order.created").await;

    event_bus::publish(&bus, envelope("order.updated")).unwrap();
    event_bus::publish(&bus, envelope("order.created")).unwrap();

    assert_eq!(recv(&mut rx).await.event_type(), "order.created");
    assert_nothing_received(&mut rx).await;
}

#[tokio::test]
async fn test_subscriber_receives_envelopes_in_publish_order() {
    let bus = spawn_bus().await;
    let mut rx = channel_subscription(&bus, "seq.*").await;

    let published: Vec<Envelope> = (0..50).map(|_| envelope("seq.tick")).collect();
    for envelope in &published {
        event_bus::publish(&bus, envelope.clone()).unwrap();
    }

    for expected in &published {
        assert_eq!(recv(&mut rx).await.id(), expected.id());
    }
}

// ============================================================================
// Fault isolation
// ============================================================================

#[tokio::test]
async fn test_failing_handlers_do_not_affect_other_subscribers() {
    // Given: a panicking handler, an erroring handler and a healthy channel
    let bus = spawn_bus().await;
    event_bus::subscribe(
        &bus,
        "*",
        handler_fn(|_| panic!("subscriber exploded")),
        SubscribeOptions::default(),
    )
    .await
    .unwrap();
    event_bus::subscribe(
        &bus,
        "*",
        handler_fn(|_| Err("subscriber refused".into())),
        SubscribeOptions::default(),
    )
    .await
    .unwrap();
    let mut healthy = channel_subscription(&bus, "*").await;

    // When: two envelopes are published
    let first = envelope("fault.first");
    let second = envelope("fault.second");
    event_bus::publish(&bus, first.clone()).unwrap();
    event_bus::publish(&bus, second.clone()).unwrap();

    // Then: the healthy subscriber gets both and the bus keeps serving
    assert_eq!(recv(&mut healthy).await.id(), first.id());
    assert_eq!(recv(&mut healthy).await.id(), second.id());
    assert_eq!(event_bus::subscription_count(&bus).await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_blocking_closures_do_not_stall_other_subscribers() {
    // Given: as many thread-blocking closures as runtime workers, plus a
    // fast closure on another pattern
    let bus = spawn_bus().await;
    for _ in 0..2 {
        event_bus::subscribe(
            &bus,
            "slow.*",
            handler_fn(|_| {
                std::thread::sleep(Duration::from_millis(1500));
                Ok(())
            }),
            SubscribeOptions::default(),
        )
        .await
        .unwrap();
    }
    event_bus::subscribe(&bus, "fast.*", handler_fn(|_| Ok(())), SubscribeOptions::default())
        .await
        .unwrap();

    // When: the slow closures are busy and a sync publish targets the fast one
    event_bus::publish(&bus, envelope("slow.work")).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let started = Instant::now();
    let outcomes = event_bus::publish_sync(&bus, envelope("fast.ping"), Duration::from_millis(100))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Then: the fast closure is delivered well inside the blocking window
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes.values().all(|o| *o == DeliveryOutcome::Delivered));
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");
}

#[tokio::test]
async fn test_closed_channel_subscriber_is_isolated() {
    let bus = spawn_bus().await;
    let dropped = channel_subscription(&bus, "*").await;
    drop(dropped);
    let mut healthy = channel_subscription(&bus, "*").await;

    let published = envelope("closed.case");
    event_bus::publish(&bus, published.clone()).unwrap();

    assert_eq!(recv(&mut healthy).await.id(), published.id());
}

// ============================================================================
// Filters
// ============================================================================

#[tokio::test]
async fn test_filter_gates_delivery_after_pattern_match() {
    // Given: a subscription only interested in high priority orders
    let bus = spawn_bus().await;
    let (handler, mut rx) = ChannelHandler::channel();
    event_bus::subscribe(
        &bus,
        "order.*",
        handler,
        SubscribeOptions::default().with_filter(|envelope| {
            envelope
                .data()
                .and_then(|data| data.get("priority"))
                .and_then(|priority| priority.as_str())
                == Some("high")
        }),
    )
    .await
    .unwrap();

    // When: a low and a high priority order are published
    let low = Envelope::new("/shop", "order.created", Some(json!({"priority": "low"}))).unwrap();
    let high = Envelope::new("/shop", "order.created", Some(json!({"priority": "high"}))).unwrap();
    event_bus::publish(&bus, low).unwrap();
    event_bus::publish(&bus, high.clone()).unwrap();

    // Then: only the high priority order arrives
    assert_eq!(recv(&mut rx).await.id(), high.id());
    assert_nothing_received(&mut rx).await;
}

#[tokio::test]
async fn test_panicking_filter_skips_only_its_subscription() {
    let bus = spawn_bus().await;
    let (handler, mut filtered) = ChannelHandler::channel();
    event_bus::subscribe(
        &bus,
        "*",
        handler,
        SubscribeOptions::default().with_filter(|_| panic!("filter exploded")),
    )
    .await
    .unwrap();
    let mut plain = channel_subscription(&bus, "*").await;

    let published = envelope("filter.panic");
    event_bus::publish(&bus, published.clone()).unwrap();

    assert_eq!(recv(&mut plain).await.id(), published.id());
    assert_nothing_received(&mut filtered).await;
}

// ============================================================================
// Synchronous publish
// ============================================================================

#[tokio::test]
async fn test_publish_sync_reports_outcome_per_subscription() {
    // Given: a healthy, a stalled and a closed subscriber plus one unrelated
    let bus = spawn_bus().await;
    let (healthy, _healthy_rx) = ChannelHandler::channel();
    let healthy_id = event_bus::subscribe(&bus, "*", healthy, SubscribeOptions::default())
        .await
        .unwrap();
    let stalled_id = event_bus::subscribe(
        &bus,
        "sync.*",
        Arc::new(Stalled::default()),
        SubscribeOptions::default(),
    )
    .await
    .unwrap();
    let (closed, closed_rx) = ChannelHandler::channel();
    drop(closed_rx);
    let closed_id = event_bus::subscribe(&bus, "*.event", closed, SubscribeOptions::default())
        .await
        .unwrap();
    let _unrelated_rx = channel_subscription(&bus, "other.*").await;

    // When: published synchronously with a short timeout
    let started = Instant::now();
    let outcomes = event_bus::publish_sync(&bus, envelope("sync.event"), Duration::from_millis(100))
        .await
        .unwrap();

    // Then: one outcome per eligible subscription, bounded by the timeout
    assert!(started.elapsed() < Duration::from_millis(600));
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[&healthy_id], DeliveryOutcome::Delivered);
    assert_eq!(outcomes[&stalled_id], DeliveryOutcome::Timeout);
    assert_eq!(outcomes[&closed_id], DeliveryOutcome::Error);
}

#[tokio::test]
async fn test_publish_sync_without_subscribers_is_empty() {
    let bus = spawn_bus().await;
    let outcomes = event_bus::publish_sync(&bus, envelope("nobody.home"), Duration::from_millis(50))
        .await
        .unwrap();
    assert!(outcomes.is_empty());
}

#[tokio::test]
async fn test_publish_sync_rejects_zero_timeout() {
    let bus = spawn_bus().await;
    let result = event_bus::publish_sync(&bus, envelope("a.b"), Duration::ZERO).await;
    assert!(matches!(result, Err(EventBusError::InvalidTimeout)));
}

#[tokio::test]
async fn test_bus_serves_other_messages_while_sync_publish_waits() {
    let bus = spawn_bus().await;
    event_bus::subscribe(
        &bus,
        "*",
        Arc::new(Stalled::default()),
        SubscribeOptions::default(),
    )
    .await
    .unwrap();

    let waiting_bus = bus.clone();
    let pending = tokio::spawn(async move {
        event_bus::publish_sync(&waiting_bus, envelope("slow.event"), Duration::from_millis(300)).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // The bus answers while the synchronous publish is still pending
    let started = Instant::now();
    assert_eq!(event_bus::subscription_count(&bus).await.unwrap(), 1);
    assert!(started.elapsed() < Duration::from_millis(150));

    let outcomes = pending.await.unwrap().unwrap();
    assert_eq!(outcomes.values().next(), Some(&DeliveryOutcome::Timeout));
}

#[tokio::test]
async fn test_dispatch_modes() {
    let bus = spawn_bus().await;
    let mut rx = channel_subscription(&bus, "mode.*").await;
    let mut other = channel_subscription(&bus, "*.async").await;
    let _unrelated = channel_subscription(&bus, "other.*").await;

    let result = event_bus::dispatch(&bus, envelope("mode.async"), DispatchMode::Async)
        .await
        .unwrap();
    assert_eq!(result, DispatchResult::Initiated { eligible: 2 });
    recv(&mut rx).await;
    recv(&mut other).await;

    let result = event_bus::dispatch(&bus, envelope("nobody.listens"), DispatchMode::Async)
        .await
        .unwrap();
    assert_eq!(result, DispatchResult::Initiated { eligible: 0 });

    let result = event_bus::dispatch(
        &bus,
        envelope("mode.sync"),
        DispatchMode::Sync {
            timeout: Duration::from_millis(200),
        },
    )
    .await
    .unwrap();
    match result {
        DispatchResult::Completed(outcomes) => {
            assert_eq!(outcomes.len(), 1);
            assert!(outcomes.values().all(|o| *o == DeliveryOutcome::Delivered));
        }
        other => panic!("expected completed dispatch, got {other:?}"),
    }
}

// ============================================================================
// Subscription management
// ============================================================================

#[tokio::test]
async fn test_unsubscribe_is_idempotent() {
    let bus = spawn_bus().await;
    let (handler, mut rx) = ChannelHandler::channel();
    let id = event_bus::subscribe(&bus, "*", handler, SubscribeOptions::default())
        .await
        .unwrap();

    assert!(event_bus::unsubscribe(&bus, id.clone()).await.unwrap());
    assert!(!event_bus::unsubscribe(&bus, id).await.unwrap());

    event_bus::publish(&bus, envelope("after.unsubscribe")).unwrap();
    assert_nothing_received(&mut rx).await;
    assert_eq!(event_bus::subscription_count(&bus).await.unwrap(), 0);
}

#[tokio::test]
async fn test_list_and_clear_subscriptions() {
    let bus = spawn_bus().await;
    let first = event_bus::subscribe(&bus, "a.*", handler_fn(|_| Ok(())), SubscribeOptions::default())
        .await
        .unwrap();
    let (channel, _rx) = ChannelHandler::channel();
    let second = event_bus::subscribe(
        &bus,
        "*.b",
        channel,
        SubscribeOptions::default().with_filter(|_| true),
    )
    .await
    .unwrap();

    let listed = event_bus::subscriptions(&bus).await.unwrap();
    assert_eq!(listed.len(), 2);
    assert_eq!(listed[0].id, first);
    assert_eq!(listed[0].pattern, "a.*");
    assert!(!listed[0].filtered);
    assert_eq!(listed[1].id, second);
    assert_eq!(listed[1].handler, "channel");
    assert!(listed[1].filtered);

    assert_eq!(event_bus::clear(&bus).await.unwrap(), 2);
    assert_eq!(event_bus::subscription_count(&bus).await.unwrap(), 0);
}

// ============================================================================
// Telemetry and facade
// ============================================================================

#[tokio::test]
async fn test_sync_publish_emits_dispatch_report() {
    let telemetry = DispatchTelemetry::new(16);
    let mut reports = telemetry.subscribe();
    let bus = spawn_bus_with(EventBusArguments {
        telemetry: Some(telemetry),
    })
    .await;
    let (healthy, _rx) = ChannelHandler::channel();
    event_bus::subscribe(&bus, "*", healthy, SubscribeOptions::default())
        .await
        .unwrap();
    event_bus::subscribe(
        &bus,
        "*",
        Arc::new(Stalled::default()),
        SubscribeOptions::default(),
    )
    .await
    .unwrap();

    let published = envelope("telemetry.event");
    event_bus::publish_sync(&bus, published.clone(), Duration::from_millis(50))
        .await
        .unwrap();

    let report = timeout(Duration::from_secs(1), reports.recv())
        .await
        .expect("no report")
        .expect("report stream closed");
    assert_eq!(report.envelope_id, published.id());
    assert_eq!(report.origin, DispatchOrigin::Bus);
    assert_eq!(report.kind, DispatchKind::Sync);
    assert_eq!(report.eligible, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.errors, 0);
}

#[tokio::test]
async fn test_app_state_channel_subscription() {
    let app = AppState::start(AgentBusConfig::default()).await.unwrap();
    let (id, mut rx) = app.subscribe_channel("ws.*").await.unwrap();

    let published = envelope("ws.message");
    app.publish(published.clone()).unwrap();
    assert_eq!(recv(&mut rx).await.id(), published.id());

    assert!(app.unsubscribe(id).await.unwrap());
    app.shutdown().await;
}
