//! Agent dispatch bridge tests
//!
//! These tests verify routing through the agent registry:
//! - Each matching agent receives a dispatched envelope exactly once
//! - A crashing agent does not affect delivery to the others
//! - Synchronous dispatch reports per-agent outcomes within its timeout

use std::sync::{Arc, Mutex};
use std::time::Duration;

use agentbus::actors::agent::{Agent, AgentContext, AgentError, HandleOutcome};
use agentbus::config::AgentBusConfig;
use agentbus::delivery::{DispatchMode, DispatchResult};
use agentbus::dispatch::DispatchError;
use agentbus::observability::{DispatchKind, DispatchOrigin};
use agentbus::supervisor::{RestartPolicy, StartOptions};
use agentbus::AppState;
use shared_types::{DeliveryOutcome, Envelope};
use tokio::time::{timeout, Instant};

// ============================================================================
// Test Fixtures and Helpers
// ============================================================================

type Seen = Arc<Mutex<Vec<String>>>;

/// Records event ids, optionally taking its time about it.
struct Recorder {
    delay: Duration,
}

impl Recorder {
    fn fast() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait::async_trait]
impl Agent for Recorder {
    type State = Seen;
    type Args = Seen;

    async fn init(&self, _ctx: &AgentContext, seen: Seen) -> Result<Seen, AgentError> {
        Ok(seen)
    }

    async fn handle_event(
        &self,
        _ctx: &AgentContext,
        envelope: &Envelope,
        seen: &mut Seen,
    ) -> Result<HandleOutcome, AgentError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        seen.lock().unwrap().push(envelope.id().to_string());
        Ok(HandleOutcome::Continue)
    }
}

/// Fails on every event.
struct Faulty;

#[async_trait::async_trait]
impl Agent for Faulty {
    type State = ();
    type Args = ();

    async fn handle_event(
        &self,
        _ctx: &AgentContext,
        _envelope: &Envelope,
        _state: &mut (),
    ) -> Result<HandleOutcome, AgentError> {
        Err(AgentError::failed("always fails"))
    }
}

fn seen() -> Seen {
    Arc::new(Mutex::new(Vec::new()))
}

fn envelope(event_type: &str) -> Envelope {
    Envelope::new("/test", event_type, None).unwrap()
}

async fn start_runtime() -> AppState {
    AppState::start(AgentBusConfig::default())
        .await
        .expect("Failed to start runtime")
}

// ============================================================================
// Async dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatch_reaches_each_matching_agent_once() {
    // Given: two agents on the same wildcard, one of them on an overlapping one
    let app = start_runtime().await;
    let (first_seen, second_seen, other_seen) = (seen(), seen(), seen());
    app.start_agent(
        Recorder::fast(),
        first_seen.clone(),
        StartOptions::default().subscribe_to(["com.shared.*"]),
    )
    .await
    .unwrap();
    app.start_agent(
        Recorder::fast(),
        second_seen.clone(),
        StartOptions::default().subscribe_to(["com.shared.*", "*.created"]),
    )
    .await
    .unwrap();
    app.start_agent(
        Recorder::fast(),
        other_seen.clone(),
        StartOptions::default().subscribe_to(["com.private.*"]),
    )
    .await
    .unwrap();

    // When: one envelope is dispatched
    let dispatched = envelope("com.shared.created");
    let initiated = app.dispatcher().dispatch(dispatched.clone()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Then: both matching agents saw it exactly once, the other none
    assert_eq!(initiated, 2);
    assert_eq!(*first_seen.lock().unwrap(), vec![dispatched.id().to_string()]);
    assert_eq!(*second_seen.lock().unwrap(), vec![dispatched.id().to_string()]);
    assert!(other_seen.lock().unwrap().is_empty());

    app.shutdown().await;
}

#[tokio::test]
async fn test_crashing_agent_does_not_block_others() {
    // Given: a faulty and a healthy agent on the same pattern
    let app = start_runtime().await;
    let healthy_seen = seen();
    app.start_agent(
        Faulty,
        (),
        StartOptions::default()
            .subscribe_to(["com.jobs.*"])
            .restart(RestartPolicy::Temporary),
    )
    .await
    .unwrap();
    app.start_agent(
        Recorder::fast(),
        healthy_seen.clone(),
        StartOptions::default().subscribe_to(["com.jobs.*"]),
    )
    .await
    .unwrap();

    // When: an envelope is dispatched, then another one
    let first = envelope("com.jobs.run");
    assert_eq!(app.dispatcher().dispatch(first.clone()).await.unwrap(), 2);
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = envelope("com.jobs.run");
    let outcomes = app
        .dispatcher()
        .dispatch_sync(second.clone(), Some(Duration::from_millis(500)))
        .await
        .unwrap();

    // Then: the healthy agent got both and the faulty one is gone
    assert_eq!(outcomes.len(), 1);
    assert!(outcomes.values().all(|o| *o == DeliveryOutcome::Delivered));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        *healthy_seen.lock().unwrap(),
        vec![first.id().to_string(), second.id().to_string()]
    );

    app.shutdown().await;
}

#[tokio::test]
async fn test_dispatch_without_matches() {
    let app = start_runtime().await;

    assert_eq!(app.dispatcher().dispatch(envelope("nobody.cares")).await.unwrap(), 0);
    let outcomes = app
        .dispatcher()
        .dispatch_sync(envelope("nobody.cares"), None)
        .await
        .unwrap();
    assert!(outcomes.is_empty());

    app.shutdown().await;
}

// ============================================================================
// Sync dispatch
// ============================================================================

#[tokio::test]
async fn test_sync_dispatch_times_out_busy_agent_within_bound() {
    // Given: a slow agent busy with a previous event and a fast agent
    let app = start_runtime().await;
    let slow = app
        .start_agent(
            Recorder::slow(Duration::from_millis(500)),
            seen(),
            StartOptions::default().subscribe_to(["com.slow.*"]),
        )
        .await
        .unwrap();
    let fast = app
        .start_agent(
            Recorder::fast(),
            seen(),
            StartOptions::default().subscribe_to(["com.slow.*"]),
        )
        .await
        .unwrap();
    app.dispatcher().dispatch(envelope("com.slow.warmup")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // When: dispatching synchronously with a timeout shorter than the backlog
    let started = Instant::now();
    let outcomes = app
        .dispatcher()
        .dispatch_sync(envelope("com.slow.work"), Some(Duration::from_millis(100)))
        .await
        .unwrap();
    let elapsed = started.elapsed();

    // Then: slow times out, fast is delivered, and the call respects the bound
    assert_eq!(outcomes[slow.id()], DeliveryOutcome::Timeout);
    assert_eq!(outcomes[fast.id()], DeliveryOutcome::Delivered);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_millis(400), "took {elapsed:?}");

    app.shutdown().await;
}

#[tokio::test]
async fn test_sync_dispatch_rejects_zero_timeout() {
    let app = start_runtime().await;
    let result = app
        .dispatcher()
        .dispatch_sync(envelope("a.b"), Some(Duration::ZERO))
        .await;
    assert!(matches!(result, Err(DispatchError::InvalidTimeout)));
    app.shutdown().await;
}

#[tokio::test]
async fn test_dispatch_with_mode() {
    let app = start_runtime().await;
    let agent = app
        .start_agent(
            Recorder::fast(),
            seen(),
            StartOptions::default().subscribe_to(["mode.*"]),
        )
        .await
        .unwrap();

    let result = app
        .dispatcher()
        .dispatch_with(envelope("mode.async"), DispatchMode::Async)
        .await
        .unwrap();
    assert_eq!(result, DispatchResult::Initiated { eligible: 1 });

    let result = app
        .dispatcher()
        .dispatch_with(
            envelope("mode.sync"),
            DispatchMode::Sync {
                timeout: Duration::from_millis(200),
            },
        )
        .await
        .unwrap();
    match result {
        DispatchResult::Completed(outcomes) => {
            assert_eq!(outcomes.get(agent.id()), Some(&DeliveryOutcome::Delivered));
        }
        other => panic!("expected completed dispatch, got {other:?}"),
    }
    app.shutdown().await;
}

// ============================================================================
// Telemetry
// ============================================================================

#[tokio::test]
async fn test_sync_dispatch_emits_agent_report() {
    let app = start_runtime().await;
    app.start_agent(
        Recorder::fast(),
        seen(),
        StartOptions::default().subscribe_to(["report.*"]),
    )
    .await
    .unwrap();
    let mut reports = app.telemetry().subscribe();

    let dispatched = envelope("report.me");
    app.dispatcher()
        .dispatch_sync(dispatched.clone(), Some(Duration::from_millis(200)))
        .await
        .unwrap();

    let report = timeout(Duration::from_secs(1), reports.recv())
        .await
        .expect("no report")
        .expect("report stream closed");
    assert_eq!(report.envelope_id, dispatched.id());
    assert_eq!(report.origin, DispatchOrigin::Agents);
    assert_eq!(report.kind, DispatchKind::Sync);
    assert_eq!((report.eligible, report.delivered), (1, 1));
    assert_eq!((report.timeouts, report.errors), (0, 0));

    app.shutdown().await;
}
