//! EventBusActor - Pattern-matched pub/sub over the subscription table
//!
//! This actor is the single owner of the subscription table. Subscribe,
//! unsubscribe and publish are all messages, so a publish never observes a
//! half-added or half-removed subscription and callers never lock anything.
//!
//! # Architecture
//!
//! - Subscriptions pair a [`Pattern`] with an [`EventHandler`] and an
//!   optional filter predicate
//! - Publishing enqueues into every eligible handler's own mailbox; the bus
//!   never waits for handlers to run
//! - Synchronous publishes wait for acceptance confirmations on a spawned
//!   task, so the bus keeps serving messages meanwhile
//! - Subscriptions made on behalf of an agent carry an owner and are removed
//!   together with the agent's registry entry
//!
//! # Example
//!
//! ```rust,ignore
//! let id = event_bus::subscribe(
//!     &bus,
//!     "com.orders.*",
//!     handler_fn(|envelope| {
//!         tracing::info!(id = %envelope.id(), "order event");
//!         Ok(())
//!     }),
//!     SubscribeOptions::default(),
//! )
//! .await?;
//!
//! let envelope = Envelope::new("/shop", "com.orders.created", None)?;
//! event_bus::publish(&bus, envelope)?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use shared_types::{AgentId, DeliveryOutcome, Envelope};
use tokio::time::Instant;

use crate::delivery::{self, DispatchMode, DispatchResult, Submitted, Tally};
use crate::handler::EventHandler;
use crate::observability::{DispatchKind, DispatchOrigin, DispatchReport, DispatchTelemetry};
use crate::pattern::Pattern;

/// Extra time a synchronous publish waits for the bus to answer beyond the
/// dispatch deadline itself.
const SYNC_REPLY_GRACE: Duration = Duration::from_millis(250);

// ============================================================================
// Data Types
// ============================================================================

/// Unique subscription token (ULID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    fn new() -> Self {
        Self(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Predicate deciding whether a matching envelope reaches the handler.
pub type EventFilter = Arc<dyn Fn(&Envelope) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct SubscribeOptions {
    pub filter: Option<EventFilter>,
    pub owner: Option<AgentId>,
}

impl SubscribeOptions {
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&Envelope) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    pub fn owned_by(mut self, owner: AgentId) -> Self {
        self.owner = Some(owner);
        self
    }
}

impl fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("filter", &self.filter.is_some())
            .field("owner", &self.owner)
            .finish()
    }
}

/// Read-only view of a subscription.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionInfo {
    pub id: SubscriptionId,
    pub pattern: String,
    pub handler: String,
    pub filtered: bool,
    pub owner: Option<AgentId>,
    pub created_at: DateTime<Utc>,
}

struct Subscription {
    id: SubscriptionId,
    pattern: Pattern,
    handler: Arc<dyn EventHandler>,
    filter: Option<EventFilter>,
    owner: Option<AgentId>,
    created_at: DateTime<Utc>,
}

impl Subscription {
    fn info(&self) -> SubscriptionInfo {
        SubscriptionInfo {
            id: self.id.clone(),
            pattern: self.pattern.to_string(),
            handler: self.handler.describe(),
            filtered: self.filter.is_some(),
            owner: self.owner.clone(),
            created_at: self.created_at,
        }
    }

    /// Pattern match plus filter. A panicking filter makes the subscription
    /// ineligible for this envelope only.
    fn accepts(&self, envelope: &Envelope) -> bool {
        if !self.pattern.matches(envelope.event_type()) {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        match std::panic::catch_unwind(AssertUnwindSafe(|| filter(envelope))) {
            Ok(accepted) => accepted,
            Err(_) => {
                tracing::warn!(
                    subscription_id = %self.id,
                    event_id = %envelope.id(),
                    "Subscription filter panicked; skipping subscriber"
                );
                false
            }
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EventBusError {
    #[error("event bus unavailable: {0}")]
    Unavailable(String),
    #[error("synchronous dispatch needs a non-zero timeout")]
    InvalidTimeout,
    #[error("event bus did not answer before the dispatch deadline")]
    NoReply,
}

// ============================================================================
// EventBusActor
// ============================================================================

/// Messages handled by EventBusActor
pub enum EventBusMsg {
    /// Add a subscription
    Subscribe {
        pattern: String,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
        reply: RpcReplyPort<SubscriptionId>,
    },

    /// Remove a subscription; replies whether it existed
    Unsubscribe {
        id: SubscriptionId,
        reply: Option<RpcReplyPort<bool>>,
    },

    /// Remove every subscription owned by an agent; replies with the count
    UnsubscribeOwner {
        owner: AgentId,
        reply: Option<RpcReplyPort<usize>>,
    },

    /// Fan-out without waiting for handlers; the optional reply carries the
    /// number of subscriptions the envelope was submitted to.
    Publish {
        envelope: Arc<Envelope>,
        reply: Option<RpcReplyPort<usize>>,
    },

    /// Fan-out collecting one outcome per eligible subscription
    PublishSync {
        envelope: Arc<Envelope>,
        deadline: Instant,
        reply: RpcReplyPort<HashMap<SubscriptionId, DeliveryOutcome>>,
    },

    /// List subscriptions (for debugging)
    ListSubscriptions {
        reply: RpcReplyPort<Vec<SubscriptionInfo>>,
    },

    CountSubscriptions { reply: RpcReplyPort<usize> },

    /// Drop every subscription; replies with the number removed
    Clear { reply: RpcReplyPort<usize> },
}

impl fmt::Debug for EventBusMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventBusMsg::Subscribe { pattern, options, .. } => f
                .debug_struct("Subscribe")
                .field("pattern", pattern)
                .field("options", options)
                .finish(),
            EventBusMsg::Unsubscribe { id, .. } => {
                f.debug_struct("Unsubscribe").field("id", id).finish()
            }
            EventBusMsg::UnsubscribeOwner { owner, .. } => f
                .debug_struct("UnsubscribeOwner")
                .field("owner", owner)
                .finish(),
            EventBusMsg::Publish { envelope, .. } => f
                .debug_struct("Publish")
                .field("event_id", &envelope.id())
                .finish(),
            EventBusMsg::PublishSync { envelope, .. } => f
                .debug_struct("PublishSync")
                .field("event_id", &envelope.id())
                .finish(),
            EventBusMsg::ListSubscriptions { .. } => f.write_str("ListSubscriptions"),
            EventBusMsg::CountSubscriptions { .. } => f.write_str("CountSubscriptions"),
            EventBusMsg::Clear { .. } => f.write_str("Clear"),
        }
    }
}

/// Arguments for spawning EventBusActor
#[derive(Debug, Clone, Default)]
pub struct EventBusArguments {
    /// Dispatch report sink (optional for testing)
    pub telemetry: Option<DispatchTelemetry>,
}

/// State for EventBusActor
pub struct EventBusState {
    /// Subscriptions in creation order
    subscriptions: Vec<Subscription>,

    telemetry: Option<DispatchTelemetry>,
}

/// Actor that provides pattern-matched pub/sub
#[derive(Debug, Default)]
pub struct EventBusActor;

#[ractor::async_trait]
impl Actor for EventBusActor {
    type Msg = EventBusMsg;
    type State = EventBusState;
    type Arguments = EventBusArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "EventBusActor starting");

        Ok(EventBusState {
            subscriptions: Vec::new(),
            telemetry: args.telemetry,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            EventBusMsg::Subscribe {
                pattern,
                handler,
                options,
                reply,
            } => {
                let id = self.handle_subscribe(pattern, handler, options, state);
                let _ = reply.send(id);
            }
            EventBusMsg::Unsubscribe { id, reply } => {
                let removed = self.handle_unsubscribe(&id, state);
                if let Some(reply) = reply {
                    let _ = reply.send(removed);
                }
            }
            EventBusMsg::UnsubscribeOwner { owner, reply } => {
                let removed = self.handle_unsubscribe_owner(&owner, state);
                if let Some(reply) = reply {
                    let _ = reply.send(removed);
                }
            }
            EventBusMsg::Publish { envelope, reply } => {
                let eligible = self.handle_publish(envelope, state);
                if let Some(reply) = reply {
                    let _ = reply.send(eligible);
                }
            }
            EventBusMsg::PublishSync {
                envelope,
                deadline,
                reply,
            } => self.handle_publish_sync(envelope, deadline, reply, state),
            EventBusMsg::ListSubscriptions { reply } => {
                let _ = reply.send(state.subscriptions.iter().map(Subscription::info).collect());
            }
            EventBusMsg::CountSubscriptions { reply } => {
                let _ = reply.send(state.subscriptions.len());
            }
            EventBusMsg::Clear { reply } => {
                let removed = state.subscriptions.len();
                state.subscriptions.clear();
                tracing::info!(removed, "Cleared all subscriptions");
                let _ = reply.send(removed);
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        tracing::info!(
            actor_id = %myself.get_id(),
            subscriptions = state.subscriptions.len(),
            "EventBusActor stopped"
        );
        Ok(())
    }
}

impl EventBusActor {
    fn handle_subscribe(
        &self,
        pattern: String,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
        state: &mut EventBusState,
    ) -> SubscriptionId {
        let subscription = Subscription {
            id: SubscriptionId::new(),
            pattern: Pattern::parse(&pattern),
            handler,
            filter: options.filter,
            owner: options.owner,
            created_at: Utc::now(),
        };
        let id = subscription.id.clone();

        tracing::debug!(
            subscription_id = %id,
            pattern = %pattern,
            handler = %subscription.handler.describe(),
            owner = ?subscription.owner,
            "Subscribed"
        );

        state.subscriptions.push(subscription);
        id
    }

    fn handle_unsubscribe(&self, id: &SubscriptionId, state: &mut EventBusState) -> bool {
        let before = state.subscriptions.len();
        state.subscriptions.retain(|sub| &sub.id != id);
        let removed = state.subscriptions.len() != before;
        if removed {
            tracing::debug!(subscription_id = %id, "Unsubscribed");
        }
        removed
    }

    fn handle_unsubscribe_owner(&self, owner: &AgentId, state: &mut EventBusState) -> usize {
        let before = state.subscriptions.len();
        state
            .subscriptions
            .retain(|sub| sub.owner.as_ref() != Some(owner));
        let removed = before - state.subscriptions.len();
        if removed > 0 {
            tracing::debug!(owner = %owner, removed, "Removed agent subscriptions");
        }
        removed
    }

    /// Enqueue into every eligible subscription, in creation order.
    fn fan_out(
        &self,
        envelope: &Arc<Envelope>,
        confirm: bool,
        state: &EventBusState,
    ) -> Vec<(SubscriptionId, Submitted)> {
        state
            .subscriptions
            .iter()
            .filter(|sub| sub.accepts(envelope))
            .map(|sub| {
                let submitted = delivery::submit(sub.handler.as_ref(), envelope.clone(), confirm);
                if let Err(e) = &submitted {
                    tracing::warn!(
                        subscription_id = %sub.id,
                        event_id = %envelope.id(),
                        error = %e,
                        "Failed to deliver event to subscriber"
                    );
                }
                (sub.id.clone(), submitted)
            })
            .collect()
    }

    fn handle_publish(&self, envelope: Arc<Envelope>, state: &EventBusState) -> usize {
        let started = Instant::now();
        tracing::debug!(
            event_id = %envelope.id(),
            event_type = %envelope.event_type(),
            "Publishing event"
        );

        let submitted = self.fan_out(&envelope, false, state);

        if let Some(telemetry) = &state.telemetry {
            telemetry.emit(DispatchReport::new(
                &envelope,
                DispatchOrigin::Bus,
                DispatchKind::Async,
                submitted.len(),
                Tally::from_submissions(&submitted),
                started.elapsed(),
            ));
        }
        submitted.len()
    }

    fn handle_publish_sync(
        &self,
        envelope: Arc<Envelope>,
        deadline: Instant,
        reply: RpcReplyPort<HashMap<SubscriptionId, DeliveryOutcome>>,
        state: &EventBusState,
    ) {
        let started = Instant::now();
        let pending = self.fan_out(&envelope, true, state);
        let telemetry = state.telemetry.clone();

        tokio::spawn(async move {
            let eligible = pending.len();
            let outcomes = delivery::collect(pending, deadline).await;
            if let Some(telemetry) = telemetry {
                telemetry.emit(DispatchReport::new(
                    &envelope,
                    DispatchOrigin::Bus,
                    DispatchKind::Sync,
                    eligible,
                    Tally::from_outcomes(outcomes.values()),
                    started.elapsed(),
                ));
            }
            // Caller may have timed out
            let _ = reply.send(outcomes);
        });
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unavailable(e: impl fmt::Display) -> EventBusError {
    EventBusError::Unavailable(e.to_string())
}

/// Subscribe `handler` to `pattern`.
pub async fn subscribe(
    event_bus: &ActorRef<EventBusMsg>,
    pattern: impl Into<String>,
    handler: Arc<dyn EventHandler>,
    options: SubscribeOptions,
) -> Result<SubscriptionId, EventBusError> {
    let pattern = pattern.into();
    ractor::call!(event_bus, |reply| EventBusMsg::Subscribe {
        pattern,
        handler,
        options,
        reply,
    })
    .map_err(unavailable)
}

/// Remove a subscription. Unknown ids are not an error.
pub async fn unsubscribe(
    event_bus: &ActorRef<EventBusMsg>,
    id: SubscriptionId,
) -> Result<bool, EventBusError> {
    ractor::call!(event_bus, |reply| EventBusMsg::Unsubscribe {
        id,
        reply: Some(reply),
    })
    .map_err(unavailable)
}

/// Remove every subscription owned by `owner`.
pub async fn unsubscribe_owner(
    event_bus: &ActorRef<EventBusMsg>,
    owner: AgentId,
) -> Result<usize, EventBusError> {
    ractor::call!(event_bus, |reply| EventBusMsg::UnsubscribeOwner {
        owner,
        reply: Some(reply),
    })
    .map_err(unavailable)
}

/// Fire-and-forget publish. Handler faults never surface here.
pub fn publish(event_bus: &ActorRef<EventBusMsg>, envelope: Envelope) -> Result<(), EventBusError> {
    event_bus
        .cast(EventBusMsg::Publish {
            envelope: Arc::new(envelope),
            reply: None,
        })
        .map_err(unavailable)
}

/// Publish and wait up to `timeout` for every eligible subscriber to accept.
pub async fn publish_sync(
    event_bus: &ActorRef<EventBusMsg>,
    envelope: Envelope,
    timeout: Duration,
) -> Result<HashMap<SubscriptionId, DeliveryOutcome>, EventBusError> {
    if timeout.is_zero() {
        return Err(EventBusError::InvalidTimeout);
    }
    let deadline = Instant::now() + timeout;
    let envelope = Arc::new(envelope);

    let result = event_bus
        .call(
            |reply| EventBusMsg::PublishSync {
                envelope,
                deadline,
                reply,
            },
            Some(timeout + SYNC_REPLY_GRACE),
        )
        .await
        .map_err(unavailable)?;

    match result {
        ractor::rpc::CallResult::Success(outcomes) => Ok(outcomes),
        ractor::rpc::CallResult::Timeout => Err(EventBusError::NoReply),
        ractor::rpc::CallResult::SenderError => {
            Err(EventBusError::Unavailable("reply channel dropped".to_string()))
        }
    }
}

/// Dispatch in either mode.
pub async fn dispatch(
    event_bus: &ActorRef<EventBusMsg>,
    envelope: Envelope,
    mode: DispatchMode,
) -> Result<DispatchResult<SubscriptionId>, EventBusError> {
    match mode {
        DispatchMode::Async => {
            let envelope = Arc::new(envelope);
            let eligible = ractor::call!(event_bus, |reply| EventBusMsg::Publish {
                envelope,
                reply: Some(reply),
            })
            .map_err(unavailable)?;
            Ok(DispatchResult::Initiated { eligible })
        }
        DispatchMode::Sync { timeout } => publish_sync(event_bus, envelope, timeout)
            .await
            .map(DispatchResult::Completed),
    }
}

pub async fn subscriptions(
    event_bus: &ActorRef<EventBusMsg>,
) -> Result<Vec<SubscriptionInfo>, EventBusError> {
    ractor::call!(event_bus, |reply| EventBusMsg::ListSubscriptions { reply }).map_err(unavailable)
}

pub async fn subscription_count(event_bus: &ActorRef<EventBusMsg>) -> Result<usize, EventBusError> {
    ractor::call!(event_bus, |reply| EventBusMsg::CountSubscriptions { reply }).map_err(unavailable)
}

/// Remove every subscription (tests and operations).
pub async fn clear(event_bus: &ActorRef<EventBusMsg>) -> Result<usize, EventBusError> {
    ractor::call!(event_bus, |reply| EventBusMsg::Clear { reply }).map_err(unavailable)
}
