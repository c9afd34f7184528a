//! Agent Supervisor - dynamic supervisor for AgentActor instances
//!
//! Agents are spawned linked to this actor, so crashes and exits arrive as
//! supervision events. Each child carries a [`RestartPolicy`]:
//!
//! - `Permanent`: always restarted
//! - `Transient`: restarted only after a failure
//! - `Temporary`: never restarted
//!
//! A restarted agent is spawned from the same agent value and arguments with
//! a new [`AgentId`] and the same name. It is not re-registered; its `init`
//! may subscribe again through `AgentContext::subscribe`.
//!
//! Restart intensity bounds crash loops: a child restarted `max_restarts`
//! times within `window` is not restarted again.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use ractor::{Actor, ActorCell, ActorId, ActorProcessingErr, ActorRef, RpcReplyPort, SpawnErr, SupervisionEvent};
use serde::{Deserialize, Serialize};
use shared_types::AgentId;
use tracing::{error, info, warn};

use crate::actors::agent::{self, Agent, AgentLinks, AgentRef};
use crate::actors::{agent_registry, event_bus};

const STOP_TIMEOUT: Duration = Duration::from_secs(5);

// ============================================================================
// Policies and options
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    #[default]
    Permanent,
    Transient,
    Temporary,
}

impl RestartPolicy {
    /// `failed` is true for crashes, false for normal exits.
    pub fn should_restart(self, failed: bool) -> bool {
        match self {
            RestartPolicy::Permanent => true,
            RestartPolicy::Transient => failed,
            RestartPolicy::Temporary => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown restart policy: {0}")]
pub struct UnknownRestartPolicy(pub String);

impl FromStr for RestartPolicy {
    type Err = UnknownRestartPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "permanent" => Ok(RestartPolicy::Permanent),
            "transient" => Ok(RestartPolicy::Transient),
            "temporary" => Ok(RestartPolicy::Temporary),
            other => Err(UnknownRestartPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RestartPolicy::Permanent => "permanent",
            RestartPolicy::Transient => "transient",
            RestartPolicy::Temporary => "temporary",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestartIntensity {
    pub max_restarts: u32,
    pub window: Duration,
}

impl Default for RestartIntensity {
    fn default() -> Self {
        Self {
            max_restarts: 3,
            window: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Unique among live agents; survives restarts.
    pub name: Option<String>,
    /// Registered in the agent registry and the bus before start returns.
    pub subscribe_to: Vec<String>,
    /// Supervisor default when unset.
    pub restart: Option<RestartPolicy>,
}

impl StartOptions {
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn subscribe_to<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subscribe_to = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn restart(mut self, policy: RestartPolicy) -> Self {
        self.restart = Some(policy);
        self
    }
}

/// Addresses a supervised agent by identity or by name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentSelector {
    Id(AgentId),
    Name(String),
}

impl From<AgentId> for AgentSelector {
    fn from(id: AgentId) -> Self {
        AgentSelector::Id(id)
    }
}

impl From<&AgentId> for AgentSelector {
    fn from(id: &AgentId) -> Self {
        AgentSelector::Id(id.clone())
    }
}

impl From<&AgentRef> for AgentSelector {
    fn from(agent: &AgentRef) -> Self {
        AgentSelector::Id(agent.id().clone())
    }
}

impl From<&str> for AgentSelector {
    fn from(name: &str) -> Self {
        AgentSelector::Name(name.to_string())
    }
}

impl From<String> for AgentSelector {
    fn from(name: String) -> Self {
        AgentSelector::Name(name)
    }
}

impl fmt::Display for AgentSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentSelector::Id(id) => write!(f, "id={id}"),
            AgentSelector::Name(name) => write!(f, "name={name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SupervisorError {
    #[error("agent name already in use: {0}")]
    NameTaken(String),
    #[error("no supervised agent with {0}")]
    NotFound(AgentSelector),
    #[error("failed to spawn agent: {0}")]
    Spawn(String),
    #[error("failed to register agent patterns: {0}")]
    Registration(String),
    #[error("agent supervisor unavailable: {0}")]
    Unavailable(String),
}

/// Snapshot of one supervised agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    pub name: Option<String>,
    pub agent_type: String,
    pub restart: RestartPolicy,
    pub started_at: DateTime<Utc>,
    pub restart_count: u32,
    pub running: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SupervisorHealth {
    pub total: usize,
    pub active: usize,
    pub dead: usize,
}

// ============================================================================
// Factories
// ============================================================================

/// Type-erased recipe for (re)spawning one agent.
#[async_trait]
pub trait AgentFactory: Send + Sync + 'static {
    fn agent_type(&self) -> &'static str;

    async fn spawn(
        &self,
        name: Option<String>,
        links: AgentLinks,
        supervisor: ActorCell,
    ) -> Result<AgentRef, SpawnErr>;
}

struct TypedFactory<A: Agent> {
    agent: Arc<A>,
    args: A::Args,
}

#[async_trait]
impl<A: Agent> AgentFactory for TypedFactory<A> {
    fn agent_type(&self) -> &'static str {
        self.agent.agent_type()
    }

    async fn spawn(
        &self,
        name: Option<String>,
        links: AgentLinks,
        supervisor: ActorCell,
    ) -> Result<AgentRef, SpawnErr> {
        agent::spawn_agent(
            self.agent.clone(),
            self.args.clone(),
            name,
            links,
            Some(supervisor),
        )
        .await
    }
}

/// Wrap an agent value and its init arguments into a factory.
pub fn factory<A: Agent>(agent: A, args: A::Args) -> Arc<dyn AgentFactory> {
    Arc::new(TypedFactory {
        agent: Arc::new(agent),
        args,
    })
}

// ============================================================================
// AgentSupervisor
// ============================================================================

struct Child {
    agent: AgentRef,
    factory: Arc<dyn AgentFactory>,
    restart: RestartPolicy,
    started_at: DateTime<Utc>,
    restart_count: u32,
    restart_history: VecDeque<Instant>,
}

impl Child {
    fn info(&self) -> AgentInfo {
        AgentInfo {
            agent_id: self.agent.id().clone(),
            name: self.agent.name().map(str::to_string),
            agent_type: self.factory.agent_type().to_string(),
            restart: self.restart,
            started_at: self.started_at,
            restart_count: self.restart_count,
            running: self.agent.is_alive(),
        }
    }
}

pub enum AgentSupervisorMsg {
    StartAgent {
        factory: Arc<dyn AgentFactory>,
        options: StartOptions,
        reply: RpcReplyPort<Result<AgentRef, SupervisorError>>,
    },
    StopAgent {
        selector: AgentSelector,
        reply: RpcReplyPort<Result<(), SupervisorError>>,
    },
    RestartAgent {
        selector: AgentSelector,
        reply: RpcReplyPort<Result<AgentRef, SupervisorError>>,
    },
    /// Stop every child; replies with how many were stopped
    StopAll { reply: RpcReplyPort<usize> },
    Resolve {
        selector: AgentSelector,
        reply: RpcReplyPort<Option<AgentRef>>,
    },
    GetInfo {
        selector: AgentSelector,
        reply: RpcReplyPort<Option<AgentInfo>>,
    },
    ListAgents { reply: RpcReplyPort<Vec<AgentInfo>> },
    Count { reply: RpcReplyPort<usize> },
    HealthCheck { reply: RpcReplyPort<SupervisorHealth> },
}

impl fmt::Debug for AgentSupervisorMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentSupervisorMsg::StartAgent {
                factory, options, ..
            } => f
                .debug_struct("StartAgent")
                .field("agent_type", &factory.agent_type())
                .field("options", options)
                .finish(),
            AgentSupervisorMsg::StopAgent { selector, .. } => {
                f.debug_struct("StopAgent").field("selector", selector).finish()
            }
            AgentSupervisorMsg::RestartAgent { selector, .. } => {
                f.debug_struct("RestartAgent").field("selector", selector).finish()
            }
            AgentSupervisorMsg::StopAll { .. } => f.write_str("StopAll"),
            AgentSupervisorMsg::Resolve { selector, .. } => {
                f.debug_struct("Resolve").field("selector", selector).finish()
            }
            AgentSupervisorMsg::GetInfo { selector, .. } => {
                f.debug_struct("GetInfo").field("selector", selector).finish()
            }
            AgentSupervisorMsg::ListAgents { .. } => f.write_str("ListAgents"),
            AgentSupervisorMsg::Count { .. } => f.write_str("Count"),
            AgentSupervisorMsg::HealthCheck { .. } => f.write_str("HealthCheck"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentSupervisorArgs {
    pub links: AgentLinks,
    pub default_restart: RestartPolicy,
    pub intensity: RestartIntensity,
}

pub struct AgentSupervisorState {
    children: HashMap<ActorId, Child>,
    names: HashMap<String, ActorId>,
    links: AgentLinks,
    default_restart: RestartPolicy,
    intensity: RestartIntensity,
}

impl AgentSupervisorState {
    fn find(&self, selector: &AgentSelector) -> Option<ActorId> {
        match selector {
            AgentSelector::Name(name) => self.names.get(name).copied(),
            AgentSelector::Id(id) => self
                .children
                .iter()
                .find(|(_, child)| child.agent.id() == id)
                .map(|(actor_id, _)| *actor_id),
        }
    }

    fn insert(&mut self, child: Child) {
        let actor_id = child.agent.actor().get_id();
        if let Some(name) = child.agent.name() {
            self.names.insert(name.to_string(), actor_id);
        }
        self.children.insert(actor_id, child);
    }

    fn take(&mut self, actor_id: ActorId) -> Option<Child> {
        let child = self.children.remove(&actor_id)?;
        if let Some(name) = child.agent.name() {
            if self.names.get(name) == Some(&actor_id) {
                self.names.remove(name);
            }
        }
        Some(child)
    }

    fn sorted_infos(&self) -> Vec<AgentInfo> {
        let mut infos: Vec<AgentInfo> = self.children.values().map(Child::info).collect();
        infos.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.agent_id.cmp(&b.agent_id)));
        infos
    }
}

#[derive(Debug, Default)]
pub struct AgentSupervisor;

#[ractor::async_trait]
impl Actor for AgentSupervisor {
    type Msg = AgentSupervisorMsg;
    type State = AgentSupervisorState;
    type Arguments = AgentSupervisorArgs;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(
            supervisor = %myself.get_id(),
            default_restart = %args.default_restart,
            max_restarts = args.intensity.max_restarts,
            "AgentSupervisor starting"
        );
        Ok(AgentSupervisorState {
            children: HashMap::new(),
            names: HashMap::new(),
            links: args.links,
            default_restart: args.default_restart,
            intensity: args.intensity,
        })
    }

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        event: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        let (actor_cell, failure) = match &event {
            SupervisionEvent::ActorFailed(actor_cell, err) => (actor_cell, Some(err.to_string())),
            SupervisionEvent::ActorTerminated(actor_cell, _, _) => (actor_cell, None),
            _ => return Ok(()),
        };

        // Children stopped on request were removed beforehand.
        let Some(mut child) = state.take(actor_cell.get_id()) else {
            return Ok(());
        };

        let failed = failure.is_some();
        info!(
            supervisor = %myself.get_id(),
            agent_id = %child.agent.id(),
            agent_name = ?child.agent.name(),
            restart = %child.restart,
            failure = ?failure,
            "Supervised agent exited"
        );

        if !child.restart.should_restart(failed) {
            return Ok(());
        }

        let now = Instant::now();
        let window = state.intensity.window;
        while child
            .restart_history
            .front()
            .is_some_and(|at| now.duration_since(*at) > window)
        {
            child.restart_history.pop_front();
        }
        if child.restart_history.len() >= state.intensity.max_restarts as usize {
            error!(
                agent_id = %child.agent.id(),
                agent_name = ?child.agent.name(),
                restarts = child.restart_history.len(),
                window_ms = window.as_millis() as u64,
                "Restart intensity exceeded; giving up on agent"
            );
            return Ok(());
        }

        match child
            .factory
            .spawn(
                child.agent.name().map(str::to_string),
                state.links.clone(),
                myself.get_cell(),
            )
            .await
        {
            Ok(agent) => {
                info!(
                    previous_agent_id = %child.agent.id(),
                    agent_id = %agent.id(),
                    agent_name = ?agent.name(),
                    "Agent restarted"
                );
                child.restart_history.push_back(now);
                child.restart_count += 1;
                child.started_at = Utc::now();
                child.agent = agent;
                state.insert(child);
            }
            Err(e) => {
                error!(
                    agent_id = %child.agent.id(),
                    error = %e,
                    "Failed to restart agent"
                );
            }
        }
        Ok(())
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AgentSupervisorMsg::StartAgent {
                factory,
                options,
                reply,
            } => {
                let result = self.handle_start(&myself, factory, options, state).await;
                let _ = reply.send(result);
            }
            AgentSupervisorMsg::StopAgent { selector, reply } => {
                let result = match state.find(&selector).and_then(|id| state.take(id)) {
                    Some(child) => {
                        retire(&child.agent, &state.links, "stop_agent").await;
                        info!(agent_id = %child.agent.id(), "Agent stopped");
                        Ok(())
                    }
                    None => Err(SupervisorError::NotFound(selector)),
                };
                let _ = reply.send(result);
            }
            AgentSupervisorMsg::RestartAgent { selector, reply } => {
                let result = self.handle_restart(&myself, selector, state).await;
                let _ = reply.send(result);
            }
            AgentSupervisorMsg::StopAll { reply } => {
                let ids: Vec<ActorId> = state.children.keys().copied().collect();
                let children: Vec<Child> = ids.into_iter().filter_map(|id| state.take(id)).collect();
                // Each stop waits on its agent's terminate; run them side by side.
                join_all(
                    children
                        .iter()
                        .map(|child| retire(&child.agent, &state.links, "stop_all_agents")),
                )
                .await;
                let stopped = children.len();
                info!(stopped, "All agents stopped");
                let _ = reply.send(stopped);
            }
            AgentSupervisorMsg::Resolve { selector, reply } => {
                let agent = state
                    .find(&selector)
                    .and_then(|id| state.children.get(&id))
                    .map(|child| child.agent.clone());
                let _ = reply.send(agent);
            }
            AgentSupervisorMsg::GetInfo { selector, reply } => {
                let info = state
                    .find(&selector)
                    .and_then(|id| state.children.get(&id))
                    .map(Child::info);
                let _ = reply.send(info);
            }
            AgentSupervisorMsg::ListAgents { reply } => {
                let _ = reply.send(state.sorted_infos());
            }
            AgentSupervisorMsg::Count { reply } => {
                let _ = reply.send(state.children.len());
            }
            AgentSupervisorMsg::HealthCheck { reply } => {
                let total = state.children.len();
                let active = state
                    .children
                    .values()
                    .filter(|child| child.agent.is_alive())
                    .count();
                let _ = reply.send(SupervisorHealth {
                    total,
                    active,
                    dead: total - active,
                });
            }
        }
        Ok(())
    }

    async fn post_stop(
        &self,
        myself: ActorRef<Self::Msg>,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!(
            supervisor = %myself.get_id(),
            children = state.children.len(),
            "AgentSupervisor stopped"
        );
        Ok(())
    }
}

impl AgentSupervisor {
    async fn handle_start(
        &self,
        myself: &ActorRef<AgentSupervisorMsg>,
        factory: Arc<dyn AgentFactory>,
        options: StartOptions,
        state: &mut AgentSupervisorState,
    ) -> Result<AgentRef, SupervisorError> {
        if let Some(name) = &options.name {
            if state.names.contains_key(name) {
                return Err(SupervisorError::NameTaken(name.clone()));
            }
        }

        let agent = factory
            .spawn(options.name.clone(), state.links.clone(), myself.get_cell())
            .await
            .map_err(|e| {
                error!(agent_type = factory.agent_type(), error = %e, "Failed to spawn agent");
                SupervisorError::Spawn(e.to_string())
            })?;

        if let Err(e) = agent::register_patterns(&state.links, &agent, options.subscribe_to).await {
            // Not inserted yet, so its exit is ignored.
            retire(&agent, &state.links, "registration failed").await;
            return Err(SupervisorError::Registration(e.to_string()));
        }

        let restart = options.restart.unwrap_or(state.default_restart);
        info!(
            agent_id = %agent.id(),
            agent_name = ?agent.name(),
            agent_type = factory.agent_type(),
            restart = %restart,
            "Agent started"
        );

        state.insert(Child {
            agent: agent.clone(),
            factory,
            restart,
            started_at: Utc::now(),
            restart_count: 0,
            restart_history: VecDeque::new(),
        });
        Ok(agent)
    }

    async fn handle_restart(
        &self,
        myself: &ActorRef<AgentSupervisorMsg>,
        selector: AgentSelector,
        state: &mut AgentSupervisorState,
    ) -> Result<AgentRef, SupervisorError> {
        let Some(mut child) = state.find(&selector).and_then(|id| state.take(id)) else {
            return Err(SupervisorError::NotFound(selector));
        };

        retire(&child.agent, &state.links, "restart_agent").await;

        let agent = child
            .factory
            .spawn(
                child.agent.name().map(str::to_string),
                state.links.clone(),
                myself.get_cell(),
            )
            .await
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

        info!(
            previous_agent_id = %child.agent.id(),
            agent_id = %agent.id(),
            "Agent restarted on request"
        );
        child.agent = agent.clone();
        child.restart_count += 1;
        child.started_at = Utc::now();
        state.insert(child);
        Ok(agent)
    }
}

/// Unregister an agent everywhere and stop it, waiting for termination.
async fn retire(agent: &AgentRef, links: &AgentLinks, reason: &str) {
    if let Some(registry) = &links.registry {
        if let Err(e) = agent_registry::unregister(registry, agent.id().clone()).await {
            warn!(agent_id = %agent.id(), error = %e, "Failed to unregister agent");
        }
    }
    if let Some(bus) = &links.bus {
        if let Err(e) = event_bus::unsubscribe_owner(bus, agent.id().clone()).await {
            warn!(agent_id = %agent.id(), error = %e, "Failed to drop agent subscriptions");
        }
    }
    if let Err(e) = agent
        .actor()
        .stop_and_wait(Some(reason.to_string()), Some(STOP_TIMEOUT))
        .await
    {
        // Already-stopped agents land here too.
        tracing::debug!(agent_id = %agent.id(), error = %e, "stop_and_wait returned an error");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unavailable(e: impl fmt::Display) -> SupervisorError {
    SupervisorError::Unavailable(e.to_string())
}

/// Start `agent` under the supervisor.
pub async fn start_agent<A: Agent>(
    supervisor: &ActorRef<AgentSupervisorMsg>,
    agent: A,
    args: A::Args,
    options: StartOptions,
) -> Result<AgentRef, SupervisorError> {
    start_with_factory(supervisor, factory(agent, args), options).await
}

pub async fn start_with_factory(
    supervisor: &ActorRef<AgentSupervisorMsg>,
    factory: Arc<dyn AgentFactory>,
    options: StartOptions,
) -> Result<AgentRef, SupervisorError> {
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::StartAgent {
        factory,
        options,
        reply,
    })
    .map_err(unavailable)?
}

pub async fn stop_agent(
    supervisor: &ActorRef<AgentSupervisorMsg>,
    selector: impl Into<AgentSelector>,
) -> Result<(), SupervisorError> {
    let selector = selector.into();
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::StopAgent { selector, reply })
        .map_err(unavailable)?
}

pub async fn restart_agent(
    supervisor: &ActorRef<AgentSupervisorMsg>,
    selector: impl Into<AgentSelector>,
) -> Result<AgentRef, SupervisorError> {
    let selector = selector.into();
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::RestartAgent { selector, reply })
        .map_err(unavailable)?
}

pub async fn stop_all_agents(supervisor: &ActorRef<AgentSupervisorMsg>) -> Result<usize, SupervisorError> {
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::StopAll { reply }).map_err(unavailable)
}

/// Current ref for a selector; names follow restarts.
pub async fn resolve(
    supervisor: &ActorRef<AgentSupervisorMsg>,
    selector: impl Into<AgentSelector>,
) -> Result<Option<AgentRef>, SupervisorError> {
    let selector = selector.into();
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::Resolve { selector, reply })
        .map_err(unavailable)
}

pub async fn agent_running(
    supervisor: &ActorRef<AgentSupervisorMsg>,
    selector: impl Into<AgentSelector>,
) -> Result<bool, SupervisorError> {
    Ok(resolve(supervisor, selector)
        .await?
        .is_some_and(|agent| agent.is_alive()))
}

pub async fn agent_info(
    supervisor: &ActorRef<AgentSupervisorMsg>,
    selector: impl Into<AgentSelector>,
) -> Result<AgentInfo, SupervisorError> {
    let selector = selector.into();
    let lookup = selector.clone();
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::GetInfo {
        selector: lookup,
        reply,
    })
    .map_err(unavailable)?
    .ok_or(SupervisorError::NotFound(selector))
}

pub async fn list_agents(supervisor: &ActorRef<AgentSupervisorMsg>) -> Result<Vec<AgentInfo>, SupervisorError> {
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::ListAgents { reply }).map_err(unavailable)
}

pub async fn count(supervisor: &ActorRef<AgentSupervisorMsg>) -> Result<usize, SupervisorError> {
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::Count { reply }).map_err(unavailable)
}

pub async fn health_check(
    supervisor: &ActorRef<AgentSupervisorMsg>,
) -> Result<SupervisorHealth, SupervisorError> {
    ractor::call!(supervisor, |reply| AgentSupervisorMsg::HealthCheck { reply }).map_err(unavailable)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_restart_policy_decisions() {
        assert!(RestartPolicy::Permanent.should_restart(true));
        assert!(RestartPolicy::Permanent.should_restart(false));
        assert!(RestartPolicy::Transient.should_restart(true));
        assert!(!RestartPolicy::Transient.should_restart(false));
        assert!(!RestartPolicy::Temporary.should_restart(true));
        assert!(!RestartPolicy::Temporary.should_restart(false));
    }

    #[test]
    fn test_restart_policy_parses_case_insensitively() {
        assert_eq!("Transient".parse::<RestartPolicy>(), Ok(RestartPolicy::Transient));
        assert_eq!(" temporary ".parse::<RestartPolicy>(), Ok(RestartPolicy::Temporary));
        assert!("forever".parse::<RestartPolicy>().is_err());
    }

    #[test]
    fn test_selector_conversions() {
        let id = AgentId::new();
        assert_eq!(AgentSelector::from(&id), AgentSelector::Id(id.clone()));
        assert_eq!(AgentSelector::from("echo"), AgentSelector::Name("echo".to_string()));
    }
}
