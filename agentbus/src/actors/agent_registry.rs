//! AgentRegistryActor - directory of live agents and their patterns
//!
//! Maps each running agent identity to the event-type patterns it declared.
//! Every registration gets a monitor task that waits on the agent's
//! [`Liveness`](crate::actors::agent::Liveness) and reports `AgentDown`, so
//! entries disappear on their own when an agent dies, whether or not it is
//! restarted later under a new identity.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde::Serialize;
use shared_types::AgentId;
use tokio::task::JoinHandle;

use crate::actors::agent::AgentRef;
use crate::actors::event_bus::EventBusMsg;
use crate::pattern::Pattern;

#[derive(Debug, Clone, thiserror::Error)]
pub enum RegistryError {
    #[error("agent {0} is not registered")]
    NotFound(AgentId),
    #[error("agent registry unavailable: {0}")]
    Unavailable(String),
}

/// Public view of one registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentRegistration {
    pub agent_id: AgentId,
    pub name: Option<String>,
    pub patterns: Vec<String>,
    pub started_at: DateTime<Utc>,
}

/// An agent interested in a looked-up event type.
#[derive(Debug, Clone)]
pub struct AgentMatch {
    pub agent: AgentRef,
    /// Matching patterns, in declaration order.
    pub matched_patterns: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RegistryHealth {
    pub total: usize,
    pub alive: usize,
    pub dead: usize,
}

struct Entry {
    agent: AgentRef,
    patterns: Vec<(String, Pattern)>,
    started_at: DateTime<Utc>,
    monitor: JoinHandle<()>,
}

impl Entry {
    fn registration(&self) -> AgentRegistration {
        AgentRegistration {
            agent_id: self.agent.id().clone(),
            name: self.agent.name().map(str::to_string),
            patterns: self.patterns.iter().map(|(raw, _)| raw.clone()).collect(),
            started_at: self.started_at,
        }
    }
}

// ============================================================================
// AgentRegistryActor
// ============================================================================

pub enum AgentRegistryMsg {
    /// Register an agent or extend its patterns; replies with the patterns
    /// that were newly added
    Register {
        agent: AgentRef,
        patterns: Vec<String>,
        reply: RpcReplyPort<Vec<String>>,
    },
    Unregister {
        agent_id: AgentId,
        reply: Option<RpcReplyPort<bool>>,
    },
    /// Sent by a monitor task when its agent terminated
    AgentDown { agent_id: AgentId },
    Lookup {
        event_type: String,
        reply: RpcReplyPort<Vec<AgentMatch>>,
    },
    GetAgent {
        agent_id: AgentId,
        reply: RpcReplyPort<Option<AgentRegistration>>,
    },
    ListAgents {
        reply: RpcReplyPort<Vec<AgentRegistration>>,
    },
    HealthCheck {
        reply: RpcReplyPort<RegistryHealth>,
    },
}

impl fmt::Debug for AgentRegistryMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRegistryMsg::Register {
                agent, patterns, ..
            } => f
                .debug_struct("Register")
                .field("agent_id", agent.id())
                .field("patterns", patterns)
                .finish(),
            AgentRegistryMsg::Unregister { agent_id, .. } => {
                f.debug_struct("Unregister").field("agent_id", agent_id).finish()
            }
            AgentRegistryMsg::AgentDown { agent_id } => {
                f.debug_struct("AgentDown").field("agent_id", agent_id).finish()
            }
            AgentRegistryMsg::Lookup { event_type, .. } => {
                f.debug_struct("Lookup").field("event_type", event_type).finish()
            }
            AgentRegistryMsg::GetAgent { agent_id, .. } => {
                f.debug_struct("GetAgent").field("agent_id", agent_id).finish()
            }
            AgentRegistryMsg::ListAgents { .. } => f.write_str("ListAgents"),
            AgentRegistryMsg::HealthCheck { .. } => f.write_str("HealthCheck"),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AgentRegistryArguments {
    /// Bus whose agent-owned subscriptions are dropped with the registration
    pub event_bus: Option<ActorRef<EventBusMsg>>,
}

pub struct AgentRegistryState {
    entries: HashMap<AgentId, Entry>,
    event_bus: Option<ActorRef<EventBusMsg>>,
}

#[derive(Debug, Default)]
pub struct AgentRegistryActor;

#[ractor::async_trait]
impl Actor for AgentRegistryActor {
    type Msg = AgentRegistryMsg;
    type State = AgentRegistryState;
    type Arguments = AgentRegistryArguments;

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        args: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        tracing::info!(actor_id = %myself.get_id(), "AgentRegistryActor starting");
        Ok(AgentRegistryState {
            entries: HashMap::new(),
            event_bus: args.event_bus,
        })
    }

    async fn handle(
        &self,
        myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            AgentRegistryMsg::Register {
                agent,
                patterns,
                reply,
            } => {
                let added = self.handle_register(&myself, agent, patterns, state);
                let _ = reply.send(added);
            }
            AgentRegistryMsg::Unregister { agent_id, reply } => {
                let removed = self.remove(&agent_id, state);
                if removed {
                    tracing::debug!(agent_id = %agent_id, "Agent unregistered");
                }
                if let Some(reply) = reply {
                    let _ = reply.send(removed);
                }
            }
            AgentRegistryMsg::AgentDown { agent_id } => {
                if self.remove(&agent_id, state) {
                    tracing::info!(agent_id = %agent_id, "Agent terminated; registration removed");
                }
            }
            AgentRegistryMsg::Lookup { event_type, reply } => {
                let _ = reply.send(self.handle_lookup(&event_type, state));
            }
            AgentRegistryMsg::GetAgent { agent_id, reply } => {
                let _ = reply.send(state.entries.get(&agent_id).map(Entry::registration));
            }
            AgentRegistryMsg::ListAgents { reply } => {
                let _ = reply.send(sorted_entries(state).map(Entry::registration).collect());
            }
            AgentRegistryMsg::HealthCheck { reply } => {
                let total = state.entries.len();
                let alive = state
                    .entries
                    .values()
                    .filter(|entry| entry.agent.is_alive())
                    .count();
                let _ = reply.send(RegistryHealth {
                    total,
                    alive,
                    dead: total - alive,
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
        for entry in state.entries.values() {
            entry.monitor.abort();
        }
        tracing::info!(
            actor_id = %myself.get_id(),
            registrations = state.entries.len(),
            "AgentRegistryActor stopped"
        );
        Ok(())
    }
}

impl AgentRegistryActor {
    fn handle_register(
        &self,
        myself: &ActorRef<AgentRegistryMsg>,
        agent: AgentRef,
        patterns: Vec<String>,
        state: &mut AgentRegistryState,
    ) -> Vec<String> {
        let agent_id = agent.id().clone();
        let entry = state.entries.entry(agent_id.clone()).or_insert_with(|| Entry {
            monitor: spawn_monitor(myself.clone(), &agent),
            agent,
            patterns: Vec::new(),
            started_at: Utc::now(),
        });

        let mut added = Vec::new();
        for raw in patterns {
            if entry.patterns.iter().any(|(existing, _)| *existing == raw) {
                continue;
            }
            let parsed = Pattern::parse(&raw);
            entry.patterns.push((raw.clone(), parsed));
            added.push(raw);
        }

        tracing::debug!(
            agent_id = %agent_id,
            added = ?added,
            total_patterns = entry.patterns.len(),
            "Agent registered"
        );
        added
    }

    fn handle_lookup(&self, event_type: &str, state: &AgentRegistryState) -> Vec<AgentMatch> {
        sorted_entries(state)
            .filter_map(|entry| {
                let matched_patterns: Vec<String> = entry
                    .patterns
                    .iter()
                    .filter(|(_, pattern)| pattern.matches(event_type))
                    .map(|(raw, _)| raw.clone())
                    .collect();
                (!matched_patterns.is_empty()).then(|| AgentMatch {
                    agent: entry.agent.clone(),
                    matched_patterns,
                })
            })
            .collect()
    }

    /// Drop the registration and the bus subscriptions owned by the agent.
    fn remove(&self, agent_id: &AgentId, state: &mut AgentRegistryState) -> bool {
        let Some(entry) = state.entries.remove(agent_id) else {
            return false;
        };
        entry.monitor.abort();

        if let Some(event_bus) = &state.event_bus {
            if let Err(e) = event_bus.cast(EventBusMsg::UnsubscribeOwner {
                owner: agent_id.clone(),
                reply: None,
            }) {
                tracing::warn!(
                    agent_id = %agent_id,
                    error = %e,
                    "Failed to drop agent subscriptions"
                );
            }
        }
        true
    }
}

fn sorted_entries(state: &AgentRegistryState) -> impl Iterator<Item = &Entry> {
    let mut entries: Vec<&Entry> = state.entries.values().collect();
    entries.sort_by(|a, b| {
        a.started_at
            .cmp(&b.started_at)
            .then_with(|| a.agent.id().cmp(b.agent.id()))
    });
    entries.into_iter()
}

/// Reports `AgentDown` once the agent's actor task has finished.
fn spawn_monitor(registry: ActorRef<AgentRegistryMsg>, agent: &AgentRef) -> JoinHandle<()> {
    let liveness = agent.liveness().clone();
    let agent_id = agent.id().clone();
    tokio::spawn(async move {
        liveness.terminated().await;
        // Registry may already be gone during shutdown.
        let _ = registry.cast(AgentRegistryMsg::AgentDown { agent_id });
    })
}

// ============================================================================
// Helper Functions
// ============================================================================

fn unavailable(e: impl fmt::Display) -> RegistryError {
    RegistryError::Unavailable(e.to_string())
}

/// Register `agent` for `patterns`. Re-registering the same identity adds
/// the missing patterns; the reply lists only those.
pub async fn register(
    registry: &ActorRef<AgentRegistryMsg>,
    agent: AgentRef,
    patterns: Vec<String>,
) -> Result<Vec<String>, RegistryError> {
    ractor::call!(registry, |reply| AgentRegistryMsg::Register {
        agent,
        patterns,
        reply,
    })
    .map_err(unavailable)
}

/// Idempotent. Returns whether a registration was removed.
pub async fn unregister(
    registry: &ActorRef<AgentRegistryMsg>,
    agent_id: AgentId,
) -> Result<bool, RegistryError> {
    ractor::call!(registry, |reply| AgentRegistryMsg::Unregister {
        agent_id,
        reply: Some(reply),
    })
    .map_err(unavailable)
}

pub async fn lookup(
    registry: &ActorRef<AgentRegistryMsg>,
    event_type: impl Into<String>,
) -> Result<Vec<AgentMatch>, RegistryError> {
    let event_type = event_type.into();
    ractor::call!(registry, |reply| AgentRegistryMsg::Lookup { event_type, reply })
        .map_err(unavailable)
}

pub async fn agent_info(
    registry: &ActorRef<AgentRegistryMsg>,
    agent_id: AgentId,
) -> Result<AgentRegistration, RegistryError> {
    let lookup_id = agent_id.clone();
    ractor::call!(registry, |reply| AgentRegistryMsg::GetAgent {
        agent_id: lookup_id,
        reply,
    })
    .map_err(unavailable)?
    .ok_or(RegistryError::NotFound(agent_id))
}

/// Registrations ordered by registration time.
pub async fn list_agents(
    registry: &ActorRef<AgentRegistryMsg>,
) -> Result<Vec<AgentRegistration>, RegistryError> {
    ractor::call!(registry, |reply| AgentRegistryMsg::ListAgents { reply }).map_err(unavailable)
}

pub async fn health_check(
    registry: &ActorRef<AgentRegistryMsg>,
) -> Result<RegistryHealth, RegistryError> {
    ractor::call!(registry, |reply| AgentRegistryMsg::HealthCheck { reply }).map_err(unavailable)
}
