//! Actors owning the runtime's shared tables.

pub mod agent;
pub mod agent_registry;
pub mod event_bus;

pub use agent::{
    reply, reply_from, send_event, Agent, AgentActor, AgentContext, AgentError, AgentLinks,
    AgentMsg, AgentRef, HandleOutcome, HookDecision, Liveness, SendError, SendOptions,
    TerminateReason,
};
pub use agent_registry::{
    AgentMatch, AgentRegistration, AgentRegistryActor, AgentRegistryArguments, AgentRegistryMsg,
    RegistryError, RegistryHealth,
};
pub use event_bus::{
    EventBusActor, EventBusArguments, EventBusError, EventBusMsg, EventFilter, SubscribeOptions,
    SubscriptionId, SubscriptionInfo,
};
