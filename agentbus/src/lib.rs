//! AgentBus - pattern-matched event routing with supervised agents
//!
//! Envelopes published on the [`EventBusActor`](actors::event_bus::EventBusActor)
//! fan out to closure, channel and agent subscriptions. Agents implement
//! [`Agent`](actors::agent::Agent), run under the
//! [`AgentSupervisor`](supervisor::agents::AgentSupervisor) and are indexed by
//! the [`AgentRegistryActor`](actors::agent_registry::AgentRegistryActor),
//! which the [`AgentDispatcher`](dispatch::AgentDispatcher) routes through.

pub mod actors;
pub mod app_state;
pub mod config;
pub mod delivery;
pub mod dispatch;
pub mod handler;
pub mod observability;
pub mod pattern;
pub mod supervisor;

pub use app_state::AppState;
pub use shared_types::{AgentId, DeliveryOutcome, Envelope, EnvelopeError, ExtensionValue};
