//! Agent contract and the actor that hosts it
//!
//! Application code implements [`Agent`]; [`AgentActor`] runs it inside a
//! ractor actor. The actor's mailbox is the agent's FIFO event queue, so a
//! slow agent only ever delays itself.
//!
//! Every running agent is addressed through an [`AgentRef`], which carries
//! the agent's identity, its optional name and a [`Liveness`] handle that
//! flips when the hosting actor task finishes for any reason.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use ractor::{Actor, ActorCell, ActorProcessingErr, ActorRef, SpawnErr};
use shared_types::{AgentId, Envelope, EnvelopeError, ExtensionValue, REPLY_TYPE_SUFFIX};
use tokio::sync::watch;

use crate::actors::agent_registry::{self, AgentRegistryMsg, RegistryError};
use crate::actors::event_bus::{self, EventBusError, EventBusMsg, SubscribeOptions};
use crate::handler::{Delivery, DeliveryError, EventHandler};
use crate::supervisor::SupervisorError;

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{0}")]
    Failed(String),
    #[error("agent handler panicked")]
    Panicked,
    #[error("agent is not linked to the {0}")]
    NotLinked(&'static str),
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Send(#[from] SendError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Bus(#[from] EventBusError),
}

impl AgentError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
    #[error(transparent)]
    Bus(#[from] EventBusError),
    #[error("cannot resolve origin agent: {0}")]
    Origin(#[from] SupervisorError),
}

// ============================================================================
// Liveness
// ============================================================================

/// Observes whether the actor hosting an agent is still running.
#[derive(Debug, Clone)]
pub struct Liveness {
    rx: watch::Receiver<bool>,
}

impl Liveness {
    /// Sender side stays with whoever awaits the actor's join handle.
    fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(true);
        (tx, Self { rx })
    }

    pub fn is_alive(&self) -> bool {
        // A dropped sender means the tracker is gone, i.e. the actor is too.
        *self.rx.borrow() && self.rx.has_changed().is_ok()
    }

    /// Resolves once the agent has terminated.
    pub async fn terminated(&self) {
        let mut rx = self.rx.clone();
        let _ = rx.wait_for(|alive| !*alive).await;
    }
}

// ============================================================================
// AgentRef
// ============================================================================

/// Messages handled by AgentActor
#[derive(Debug)]
pub enum AgentMsg {
    /// An envelope routed to this agent
    Event(Delivery),
}

/// Handle to one running agent instance.
#[derive(Clone)]
pub struct AgentRef {
    id: AgentId,
    name: Option<String>,
    actor: ActorRef<AgentMsg>,
    liveness: Liveness,
}

impl AgentRef {
    pub fn id(&self) -> &AgentId {
        &self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name when set, otherwise the id.
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }

    pub fn actor(&self) -> &ActorRef<AgentMsg> {
        &self.actor
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    pub async fn terminated(&self) {
        self.liveness.terminated().await
    }
}

impl fmt::Debug for AgentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentRef")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("actor", &self.actor.get_id())
            .field("alive", &self.is_alive())
            .finish()
    }
}

impl EventHandler for AgentRef {
    fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        if !self.is_alive() {
            return Err(DeliveryError::Closed(format!("agent {} is not running", self.id)));
        }
        self.actor
            .cast(AgentMsg::Event(delivery))
            .map_err(|e| DeliveryError::Closed(e.to_string()))
    }

    fn describe(&self) -> String {
        format!("agent:{}", self.label())
    }
}

// ============================================================================
// Agent contract
// ============================================================================

/// What `handle_event` asks the host to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Continue,
    /// Publish this envelope through the bus.
    Reply(Envelope),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookDecision {
    Continue,
    /// Skip `handle_event` for this envelope.
    Halt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminateReason {
    /// Stopped on request (supervisor, `AgentContext::stop`, shutdown).
    Stopped,
    /// `handle_event` returned an error or panicked.
    Failed(String),
}

/// A long-lived worker reacting to routed envelopes.
///
/// Only `handle_event` is required. Returning `Err` (or panicking) from it
/// crashes the agent, after which its supervisor's restart policy applies.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    type State: Default + Send + 'static;
    type Args: Clone + Send + Sync + 'static;

    /// Label used in supervisor listings.
    fn agent_type(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Build the initial state. An error aborts the start.
    async fn init(&self, _ctx: &AgentContext, _args: Self::Args) -> Result<Self::State, AgentError> {
        Ok(Self::State::default())
    }

    async fn handle_event(
        &self,
        ctx: &AgentContext,
        envelope: &Envelope,
        state: &mut Self::State,
    ) -> Result<HandleOutcome, AgentError>;

    async fn before_handle_event(
        &self,
        _ctx: &AgentContext,
        _envelope: &Envelope,
        _state: &mut Self::State,
    ) -> HookDecision {
        HookDecision::Continue
    }

    async fn after_handle_event(
        &self,
        _ctx: &AgentContext,
        _envelope: &Envelope,
        _outcome: &HandleOutcome,
        _state: &mut Self::State,
    ) {
    }

    /// Runs once when the hosting actor stops, whatever the reason.
    ///
    /// Supervisor stops wait for this to finish (bounded by the stop
    /// timeout), so it must not await a call back into the agent
    /// supervisor: that call would queue behind the stop in progress.
    /// Cast, or spawn a task, if cleanup needs to reach the supervisor.
    async fn terminate(&self, _ctx: &AgentContext, _reason: &TerminateReason, _state: &mut Self::State) {}
}

// ============================================================================
// AgentContext
// ============================================================================

/// Runtime actors an agent can reach. Either may be absent in tests.
#[derive(Debug, Clone, Default)]
pub struct AgentLinks {
    pub bus: Option<ActorRef<EventBusMsg>>,
    pub registry: Option<ActorRef<AgentRegistryMsg>>,
}

/// Passed to every [`Agent`] callback.
#[derive(Debug, Clone)]
pub struct AgentContext {
    agent: AgentRef,
    links: AgentLinks,
}

impl AgentContext {
    pub fn agent(&self) -> &AgentRef {
        &self.agent
    }

    pub fn id(&self) -> &AgentId {
        self.agent.id()
    }

    pub fn name(&self) -> Option<&str> {
        self.agent.name()
    }

    pub fn bus(&self) -> Option<&ActorRef<EventBusMsg>> {
        self.links.bus.as_ref()
    }

    pub fn registry(&self) -> Option<&ActorRef<AgentRegistryMsg>> {
        self.links.registry.as_ref()
    }

    /// Default source for envelopes this agent emits.
    pub fn source(&self) -> String {
        default_source(&self.agent)
    }

    /// Subscribe this agent instance to more patterns. Returns the patterns
    /// that were not registered yet.
    pub async fn subscribe<I, S>(&self, patterns: I) -> Result<Vec<String>, AgentError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns = patterns.into_iter().map(Into::into).collect();
        register_patterns(&self.links, &self.agent, patterns).await
    }

    pub fn send_event(
        &self,
        event_type: impl Into<String>,
        data: Option<serde_json::Value>,
        options: SendOptions,
    ) -> Result<Envelope, SendError> {
        let bus = self
            .links
            .bus
            .as_ref()
            .ok_or_else(|| EventBusError::Unavailable("agent has no event bus".to_string()))?;
        send_event(bus, &self.agent, event_type, data, options)
    }

    /// Ask the hosting actor to stop after the current message.
    pub fn stop(&self, reason: Option<String>) {
        self.agent.actor.stop(reason);
    }
}

/// Register `patterns` for `agent` in the registry, then subscribe the newly
/// added ones on the bus under the agent's ownership.
pub async fn register_patterns(
    links: &AgentLinks,
    agent: &AgentRef,
    patterns: Vec<String>,
) -> Result<Vec<String>, AgentError> {
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    let registry = links.registry.as_ref().ok_or(AgentError::NotLinked("agent registry"))?;
    let added = agent_registry::register(registry, agent.clone(), patterns).await?;

    if let Some(bus) = &links.bus {
        let handler: Arc<dyn EventHandler> = Arc::new(agent.clone());
        for pattern in &added {
            event_bus::subscribe(
                bus,
                pattern.clone(),
                handler.clone(),
                SubscribeOptions::default().owned_by(agent.id().clone()),
            )
            .await?;
        }
        // An agent that died before its subscriptions landed had its owner
        // cleanup processed first; sweep again so nothing outlives it.
        if !agent.is_alive() {
            event_bus::unsubscribe_owner(bus, agent.id().clone()).await?;
            tracing::debug!(agent_id = %agent.id(), "Agent died while subscribing");
            return Ok(added);
        }
    }

    tracing::debug!(agent_id = %agent.id(), patterns = ?added, "Agent subscribed");
    Ok(added)
}

// ============================================================================
// Replies and outbound events
// ============================================================================

/// Reply to `original`: type `<type>.reply`, subject set to the original id,
/// correlation id copied when present, source kept from the original.
pub fn reply(original: &Envelope, data: Option<serde_json::Value>) -> Result<Envelope, EnvelopeError> {
    reply_from(original.source(), original, data)
}

/// Like [`reply`] with an explicit source.
pub fn reply_from(
    source: impl Into<String>,
    original: &Envelope,
    data: Option<serde_json::Value>,
) -> Result<Envelope, EnvelopeError> {
    let reply_type = format!("{}{}", original.event_type(), REPLY_TYPE_SUFFIX);
    let reply = Envelope::new(source, reply_type, data)?.with_subject(original.id());
    Ok(match original.correlation_id() {
        Some(correlation_id) => reply.with_correlation_id(correlation_id.clone()),
        None => reply,
    })
}

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Overrides the default `agent://<name or id>` source.
    pub source: Option<String>,
    pub correlation_id: Option<ExtensionValue>,
}

impl SendOptions {
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<ExtensionValue>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }
}

fn default_source(agent: &AgentRef) -> String {
    format!("agent://{}", agent.label())
}

/// Build an envelope on behalf of `origin` and publish it. Returns the
/// published envelope.
pub fn send_event(
    bus: &ActorRef<EventBusMsg>,
    origin: &AgentRef,
    event_type: impl Into<String>,
    data: Option<serde_json::Value>,
    options: SendOptions,
) -> Result<Envelope, SendError> {
    let source = options.source.unwrap_or_else(|| default_source(origin));
    let mut envelope = Envelope::new(source, event_type, data)?;
    if let Some(correlation_id) = options.correlation_id {
        envelope = envelope.with_correlation_id(correlation_id);
    }

    event_bus::publish(bus, envelope.clone())?;
    tracing::debug!(
        agent_id = %origin.id(),
        event_id = %envelope.id(),
        event_type = %envelope.event_type(),
        "Agent sent event"
    );
    Ok(envelope)
}

// ============================================================================
// AgentActor
// ============================================================================

/// Arguments for spawning AgentActor
pub struct AgentArguments<A: Agent> {
    id: AgentId,
    name: Option<String>,
    args: A::Args,
    links: AgentLinks,
    liveness: Liveness,
}

/// State for AgentActor
pub struct AgentActorState<A: Agent> {
    ctx: AgentContext,
    state: A::State,
    /// `terminate` already ran on the failure path.
    terminated: bool,
}

/// Hosts one [`Agent`] implementation.
pub struct AgentActor<A: Agent> {
    agent: Arc<A>,
}

impl<A: Agent> AgentActor<A> {
    pub fn new(agent: Arc<A>) -> Self {
        Self { agent }
    }

    async fn run_handler(
        &self,
        ctx: &AgentContext,
        envelope: &Envelope,
        state: &mut A::State,
    ) -> Result<HandleOutcome, AgentError> {
        let handling = self.agent.handle_event(ctx, envelope, state);
        match AssertUnwindSafe(handling).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(AgentError::Panicked),
        }
    }
}

#[ractor::async_trait]
impl<A: Agent> Actor for AgentActor<A> {
    type Msg = AgentMsg;
    type State = AgentActorState<A>;
    type Arguments = AgentArguments<A>;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let ctx = AgentContext {
            agent: AgentRef {
                id: args.id,
                name: args.name,
                actor: myself.clone(),
                liveness: args.liveness,
            },
            links: args.links,
        };

        tracing::info!(
            actor_id = %myself.get_id(),
            agent_id = %ctx.id(),
            agent_name = ?ctx.name(),
            agent_type = self.agent.agent_type(),
            "AgentActor starting"
        );

        let state = self.agent.init(&ctx, args.args).await.map_err(|e| {
            tracing::error!(agent_id = %ctx.id(), error = %e, "Agent init failed");
            ActorProcessingErr::from(e)
        })?;

        Ok(AgentActorState {
            ctx,
            state,
            terminated: false,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AgentMsg::Event(mut delivery) => {
                // Accepted as soon as it leaves the mailbox.
                delivery.confirm();
                let envelope = delivery.envelope().clone();
                let ctx = &state.ctx;

                let decision = self
                    .agent
                    .before_handle_event(ctx, &envelope, &mut state.state)
                    .await;
                if decision == HookDecision::Halt {
                    tracing::debug!(
                        agent_id = %ctx.id(),
                        event_id = %envelope.id(),
                        "before_handle_event halted processing"
                    );
                    return Ok(());
                }

                match self.run_handler(ctx, &envelope, &mut state.state).await {
                    Ok(outcome) => {
                        if let HandleOutcome::Reply(reply) = &outcome {
                            match ctx.bus() {
                                Some(bus) => {
                                    if let Err(e) = event_bus::publish(bus, reply.clone()) {
                                        tracing::warn!(
                                            agent_id = %ctx.id(),
                                            error = %e,
                                            "Failed to publish agent reply"
                                        );
                                    }
                                }
                                None => tracing::debug!(
                                    agent_id = %ctx.id(),
                                    "Agent replied without an event bus; reply dropped"
                                ),
                            }
                        }
                        self.agent
                            .after_handle_event(ctx, &envelope, &outcome, &mut state.state)
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!(
                            agent_id = %ctx.id(),
                            event_id = %envelope.id(),
                            event_type = %envelope.event_type(),
                            error = %e,
                            "Agent failed handling event"
                        );
                        state.terminated = true;
                        let reason = TerminateReason::Failed(e.to_string());
                        self.agent.terminate(ctx, &reason, &mut state.state).await;
                        return Err(ActorProcessingErr::from(e));
                    }
                }
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        if !state.terminated {
            state.terminated = true;
            self.agent
                .terminate(&state.ctx, &TerminateReason::Stopped, &mut state.state)
                .await;
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            agent_id = %state.ctx.id(),
            "AgentActor stopped"
        );
        Ok(())
    }
}

/// Spawn an agent, linked to `supervisor` when given.
///
/// The returned ref's liveness flips once the actor task has finished. When
/// spawning fails it is never alive.
pub async fn spawn_agent<A: Agent>(
    agent: Arc<A>,
    args: A::Args,
    name: Option<String>,
    links: AgentLinks,
    supervisor: Option<ActorCell>,
) -> Result<AgentRef, SpawnErr> {
    let id = AgentId::new();
    let (alive_tx, liveness) = Liveness::channel();
    let arguments = AgentArguments {
        id: id.clone(),
        name: name.clone(),
        args,
        links,
        liveness: liveness.clone(),
    };

    let actor = AgentActor::new(agent);
    let (actor, handle) = match supervisor {
        Some(supervisor) => Actor::spawn_linked(None, actor, arguments, supervisor).await?,
        None => Actor::spawn(None, actor, arguments).await?,
    };

    tokio::spawn(async move {
        let _ = handle.await;
        let _ = alive_tx.send(false);
    });

    Ok(AgentRef {
        id,
        name,
        actor,
        liveness,
    })
}
