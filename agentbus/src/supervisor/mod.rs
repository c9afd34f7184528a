//! Runtime supervision tree
//!
//! ```text
//! ApplicationSupervisor
//! ├── EventBusActor
//! ├── AgentRegistryActor
//! └── AgentSupervisor
//!     └── AgentActor<A> (one per started agent)
//! ```
//!
//! The supervisor counts `ActorStarted`, `ActorFailed` and `ActorTerminated`
//! events from its direct children and clears the handle of any child that
//! exits, which health checks then report as unhealthy.

pub mod agents;

pub use agents::{
    AgentInfo, AgentSelector, AgentSupervisor, AgentSupervisorArgs, AgentSupervisorMsg,
    RestartIntensity, RestartPolicy, StartOptions, SupervisorError, SupervisorHealth,
};

use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort, SupervisionEvent};
use tracing::{error, info};

use crate::actors::agent::AgentLinks;
use crate::actors::agent_registry::{AgentRegistryActor, AgentRegistryArguments, AgentRegistryMsg};
use crate::actors::event_bus::{EventBusActor, EventBusArguments, EventBusMsg};
use crate::config::AgentBusConfig;
use crate::observability::DispatchTelemetry;

/// Owns the bus, the registry and the agent supervisor.
#[derive(Debug, Default)]
pub struct ApplicationSupervisor;

pub struct ApplicationState {
    pub event_bus: Option<ActorRef<EventBusMsg>>,
    pub agent_registry: Option<ActorRef<AgentRegistryMsg>>,
    pub agent_supervisor: Option<ActorRef<AgentSupervisorMsg>>,
    pub telemetry: DispatchTelemetry,
    pub supervision_event_counts: SupervisionEventCounts,
    pub last_supervision_failure: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupervisionEventCounts {
    pub actor_started: u64,
    pub actor_failed: u64,
    pub actor_terminated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSupervisorHealth {
    pub event_bus_healthy: bool,
    pub agent_registry_healthy: bool,
    pub agent_supervisor_healthy: bool,
    pub supervision_event_counts: SupervisionEventCounts,
    pub last_supervision_failure: Option<String>,
}

/// Actor handles making up a running runtime.
#[derive(Debug, Clone)]
pub struct RuntimeHandles {
    pub event_bus: ActorRef<EventBusMsg>,
    pub agent_registry: ActorRef<AgentRegistryMsg>,
    pub agent_supervisor: ActorRef<AgentSupervisorMsg>,
    pub telemetry: DispatchTelemetry,
}

/// Messages handled by ApplicationSupervisor
#[derive(Debug)]
pub enum ApplicationSupervisorMsg {
    /// Handles of the core children; `None` once any of them has exited
    GetHandles {
        reply: RpcReplyPort<Option<RuntimeHandles>>,
    },
    /// Return health snapshot and supervision counters.
    GetHealth {
        reply: RpcReplyPort<ApplicationSupervisorHealth>,
    },
}

#[ractor::async_trait]
impl Actor for ApplicationSupervisor {
    type Msg = ApplicationSupervisorMsg;
    type State = ApplicationState;
    type Arguments = AgentBusConfig;

    async fn handle_supervisor_evt(
        &self,
        myself: ActorRef<Self::Msg>,
        event: SupervisionEvent,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        info!(
            supervisor = %myself.get_id(),
            event = ?event,
            "Runtime supervision event"
        );
        match &event {
            SupervisionEvent::ActorStarted(_) => {
                state.supervision_event_counts.actor_started += 1;
            }
            SupervisionEvent::ActorFailed(actor_cell, failure) => {
                state.supervision_event_counts.actor_failed += 1;
                state.last_supervision_failure =
                    Some(format!("actor_id={} error={failure}", actor_cell.get_id()));
                error!(
                    actor_id = %actor_cell.get_id(),
                    error = %failure,
                    "Core runtime actor failed"
                );
                state.forget(actor_cell.get_id());
            }
            SupervisionEvent::ActorTerminated(actor_cell, _, _) => {
                state.supervision_event_counts.actor_terminated += 1;
                state.forget(actor_cell.get_id());
            }
            _ => {}
        }
        Ok(())
    }

    async fn pre_start(
        &self,
        myself: ActorRef<Self::Msg>,
        config: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        info!(supervisor = %myself.get_id(), "ApplicationSupervisor starting");

        let telemetry = DispatchTelemetry::new(config.telemetry_capacity);

        let (event_bus, _handle) = Actor::spawn_linked(
            None, // No fixed name - allows multiple runtimes in tests
            EventBusActor,
            EventBusArguments {
                telemetry: Some(telemetry.clone()),
            },
            myself.get_cell(),
        )
        .await
        .map_err(|e| {
            error!("Failed to spawn EventBusActor: {}", e);
            ActorProcessingErr::from(e)
        })?;

        let (agent_registry, _handle) = Actor::spawn_linked(
            None,
            AgentRegistryActor,
            AgentRegistryArguments {
                event_bus: Some(event_bus.clone()),
            },
            myself.get_cell(),
        )
        .await
        .map_err(|e| {
            error!("Failed to spawn AgentRegistryActor: {}", e);
            ActorProcessingErr::from(e)
        })?;

        let (agent_supervisor, _handle) = Actor::spawn_linked(
            None,
            AgentSupervisor,
            AgentSupervisorArgs {
                links: AgentLinks {
                    bus: Some(event_bus.clone()),
                    registry: Some(agent_registry.clone()),
                },
                default_restart: config.default_restart,
                intensity: config.restart_intensity,
            },
            myself.get_cell(),
        )
        .await
        .map_err(|e| {
            error!("Failed to spawn AgentSupervisor: {}", e);
            ActorProcessingErr::from(e)
        })?;

        info!(
            event_bus = %event_bus.get_id(),
            agent_registry = %agent_registry.get_id(),
            agent_supervisor = %agent_supervisor.get_id(),
            "Runtime actors spawned as children"
        );

        Ok(ApplicationState {
            event_bus: Some(event_bus),
            agent_registry: Some(agent_registry),
            agent_supervisor: Some(agent_supervisor),
            telemetry,
            supervision_event_counts: SupervisionEventCounts::default(),
            last_supervision_failure: None,
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            ApplicationSupervisorMsg::GetHandles { reply } => {
                let _ = reply.send(state.handles());
            }
            ApplicationSupervisorMsg::GetHealth { reply } => {
                let _ = reply.send(ApplicationSupervisorHealth {
                    event_bus_healthy: state.event_bus.is_some(),
                    agent_registry_healthy: state.agent_registry.is_some(),
                    agent_supervisor_healthy: state.agent_supervisor.is_some(),
                    supervision_event_counts: state.supervision_event_counts.clone(),
                    last_supervision_failure: state.last_supervision_failure.clone(),
                });
            }
        }
        Ok(())
    }
}

impl ApplicationState {
    fn forget(&mut self, actor_id: ractor::ActorId) {
        if self.event_bus.as_ref().is_some_and(|a| a.get_id() == actor_id) {
            self.event_bus = None;
        }
        if self
            .agent_registry
            .as_ref()
            .is_some_and(|a| a.get_id() == actor_id)
        {
            self.agent_registry = None;
        }
        if self
            .agent_supervisor
            .as_ref()
            .is_some_and(|a| a.get_id() == actor_id)
        {
            self.agent_supervisor = None;
        }
    }

    fn handles(&self) -> Option<RuntimeHandles> {
        Some(RuntimeHandles {
            event_bus: self.event_bus.clone()?,
            agent_registry: self.agent_registry.clone()?,
            agent_supervisor: self.agent_supervisor.clone()?,
            telemetry: self.telemetry.clone(),
        })
    }
}
