use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ractor::{Actor, ActorRef};
use shared_types::{DeliveryOutcome, Envelope};
use tokio::sync::mpsc;

use crate::actors::agent::{self, Agent, AgentRef, SendError, SendOptions};
use crate::actors::agent_registry::AgentRegistryMsg;
use crate::actors::event_bus::{
    self, EventBusError, EventBusMsg, SubscribeOptions, SubscriptionId,
};
use crate::config::AgentBusConfig;
use crate::delivery::{DispatchMode, DispatchResult};
use crate::dispatch::AgentDispatcher;
use crate::handler::{handler_fn, ChannelHandler, EventHandler, HandlerResult};
use crate::observability::DispatchTelemetry;
use crate::supervisor::agents::{self as agent_supervisor, AgentSelector, AgentSupervisorMsg};
use crate::supervisor::{
    AgentInfo, ApplicationSupervisor, ApplicationSupervisorHealth, ApplicationSupervisorMsg,
    RuntimeHandles, StartOptions, SupervisorError, SupervisorHealth,
};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, thiserror::Error)]
pub enum AppStateError {
    #[error("failed to start runtime: {0}")]
    Start(String),
    #[error("application supervisor unavailable: {0}")]
    Unavailable(String),
}

/// Cloneable entry point for transports and application code.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: AgentBusConfig,
    supervisor: ActorRef<ApplicationSupervisorMsg>,
    handles: RuntimeHandles,
    dispatcher: AgentDispatcher,
}

impl AppState {
    /// Spawn the supervision tree and collect its handles.
    pub async fn start(config: AgentBusConfig) -> Result<Self, AppStateError> {
        let (supervisor, _) = Actor::spawn(
            Some(format!("application_supervisor:{}", ulid::Ulid::new())),
            ApplicationSupervisor,
            config.clone(),
        )
        .await
        .map_err(|e| AppStateError::Start(e.to_string()))?;

        let handles = ractor::call!(supervisor, |reply| ApplicationSupervisorMsg::GetHandles {
            reply
        })
        .map_err(|e| AppStateError::Unavailable(e.to_string()))?
        .ok_or_else(|| AppStateError::Start("runtime actor exited during startup".to_string()))?;

        let dispatcher = AgentDispatcher::new(
            handles.agent_registry.clone(),
            config.sync_dispatch_timeout,
        )
        .with_telemetry(handles.telemetry.clone());

        tracing::info!(
            supervisor = %supervisor.get_id(),
            sync_timeout_ms = config.sync_dispatch_timeout.as_millis() as u64,
            "AgentBus runtime started"
        );

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                supervisor,
                handles,
                dispatcher,
            }),
        })
    }

    pub fn config(&self) -> &AgentBusConfig {
        &self.inner.config
    }

    pub fn event_bus(&self) -> &ActorRef<EventBusMsg> {
        &self.inner.handles.event_bus
    }

    pub fn agent_registry(&self) -> &ActorRef<AgentRegistryMsg> {
        &self.inner.handles.agent_registry
    }

    pub fn agent_supervisor(&self) -> &ActorRef<AgentSupervisorMsg> {
        &self.inner.handles.agent_supervisor
    }

    pub fn telemetry(&self) -> &DispatchTelemetry {
        &self.inner.handles.telemetry
    }

    pub fn dispatcher(&self) -> &AgentDispatcher {
        &self.inner.dispatcher
    }

    // ------------------------------------------------------------------
    // Bus ingress
    // ------------------------------------------------------------------

    pub fn publish(&self, envelope: Envelope) -> Result<(), EventBusError> {
        event_bus::publish(self.event_bus(), envelope)
    }

    /// Synchronous publish; `None` uses the configured timeout.
    pub async fn publish_sync(
        &self,
        envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<HashMap<SubscriptionId, DeliveryOutcome>, EventBusError> {
        let timeout = timeout.unwrap_or(self.inner.config.sync_dispatch_timeout);
        event_bus::publish_sync(self.event_bus(), envelope, timeout).await
    }

    pub async fn dispatch(
        &self,
        envelope: Envelope,
        mode: DispatchMode,
    ) -> Result<DispatchResult<SubscriptionId>, EventBusError> {
        event_bus::dispatch(self.event_bus(), envelope, mode).await
    }

    pub async fn subscribe(
        &self,
        pattern: impl Into<String>,
        handler: Arc<dyn EventHandler>,
        options: SubscribeOptions,
    ) -> Result<SubscriptionId, EventBusError> {
        event_bus::subscribe(self.event_bus(), pattern, handler, options).await
    }

    pub async fn subscribe_fn<F>(
        &self,
        pattern: impl Into<String>,
        f: F,
    ) -> Result<SubscriptionId, EventBusError>
    where
        F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(pattern, handler_fn(f), SubscribeOptions::default())
            .await
    }

    /// Subscription feeding a channel, e.g. a WebSocket writer task.
    pub async fn subscribe_channel(
        &self,
        pattern: impl Into<String>,
    ) -> Result<(SubscriptionId, mpsc::UnboundedReceiver<Arc<Envelope>>), EventBusError> {
        let (handler, rx) = ChannelHandler::channel();
        let id = self
            .subscribe(pattern, handler, SubscribeOptions::default())
            .await?;
        Ok((id, rx))
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> Result<bool, EventBusError> {
        event_bus::unsubscribe(self.event_bus(), id).await
    }

    // ------------------------------------------------------------------
    // Agents
    // ------------------------------------------------------------------

    pub async fn start_agent<A: Agent>(
        &self,
        agent: A,
        args: A::Args,
        options: StartOptions,
    ) -> Result<AgentRef, SupervisorError> {
        agent_supervisor::start_agent(self.agent_supervisor(), agent, args, options).await
    }

    pub async fn stop_agent(&self, selector: impl Into<AgentSelector>) -> Result<(), SupervisorError> {
        agent_supervisor::stop_agent(self.agent_supervisor(), selector).await
    }

    pub async fn restart_agent(
        &self,
        selector: impl Into<AgentSelector>,
    ) -> Result<AgentRef, SupervisorError> {
        agent_supervisor::restart_agent(self.agent_supervisor(), selector).await
    }

    pub async fn stop_all_agents(&self) -> Result<usize, SupervisorError> {
        agent_supervisor::stop_all_agents(self.agent_supervisor()).await
    }

    pub async fn resolve_agent(
        &self,
        selector: impl Into<AgentSelector>,
    ) -> Result<Option<AgentRef>, SupervisorError> {
        agent_supervisor::resolve(self.agent_supervisor(), selector).await
    }

    pub async fn agent_running(&self, selector: impl Into<AgentSelector>) -> Result<bool, SupervisorError> {
        agent_supervisor::agent_running(self.agent_supervisor(), selector).await
    }

    pub async fn list_agents(&self) -> Result<Vec<AgentInfo>, SupervisorError> {
        agent_supervisor::list_agents(self.agent_supervisor()).await
    }

    pub async fn agent_health(&self) -> Result<SupervisorHealth, SupervisorError> {
        agent_supervisor::health_check(self.agent_supervisor()).await
    }

    /// Publish an envelope on behalf of `origin`.
    pub fn send_event(
        &self,
        origin: &AgentRef,
        event_type: impl Into<String>,
        data: Option<serde_json::Value>,
        options: SendOptions,
    ) -> Result<Envelope, SendError> {
        agent::send_event(self.event_bus(), origin, event_type, data, options)
    }

    /// Publish on behalf of the supervised agent `selector` resolves to.
    /// Names follow restarts, so this keeps working after the agent is
    /// replaced.
    pub async fn send_event_as(
        &self,
        selector: impl Into<AgentSelector>,
        event_type: impl Into<String>,
        data: Option<serde_json::Value>,
        options: SendOptions,
    ) -> Result<Envelope, SendError> {
        let selector = selector.into();
        let origin = self
            .resolve_agent(selector.clone())
            .await?
            .ok_or(SupervisorError::NotFound(selector))?;
        self.send_event(&origin, event_type, data, options)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    pub async fn health(&self) -> Result<ApplicationSupervisorHealth, AppStateError> {
        ractor::call!(self.inner.supervisor, |reply| ApplicationSupervisorMsg::GetHealth {
            reply
        })
        .map_err(|e| AppStateError::Unavailable(e.to_string()))
    }

    /// Stop the whole supervision tree and wait for it to exit.
    pub async fn shutdown(&self) {
        if let Err(e) = self
            .inner
            .supervisor
            .stop_and_wait(Some("shutdown".to_string()), Some(SHUTDOWN_TIMEOUT))
            .await
        {
            tracing::warn!(error = %e, "Application supervisor did not stop cleanly");
        }
    }
}
