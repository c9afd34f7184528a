//! Agent dispatch bridge
//!
//! Routes an envelope to every registered agent whose patterns match its
//! type, using the agent registry as the source of truth. Each matching
//! agent receives the envelope once, however many of its patterns match.
//!
//! ```rust,ignore
//! let dispatcher = app.dispatcher();
//! let outcomes = dispatcher
//!     .dispatch_sync(envelope, Some(Duration::from_millis(200)))
//!     .await?;
//! for (agent_id, outcome) in outcomes {
//!     tracing::info!(%agent_id, %outcome, "delivery");
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ractor::ActorRef;
use shared_types::{AgentId, DeliveryOutcome, Envelope};
use tokio::time::Instant;

use crate::actors::agent_registry::{self, AgentRegistryMsg, RegistryError};
use crate::delivery::{self, DispatchMode, DispatchResult, Submitted, Tally};
use crate::observability::{DispatchKind, DispatchOrigin, DispatchReport, DispatchTelemetry};

#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("synchronous dispatch needs a non-zero timeout")]
    InvalidTimeout,
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

#[derive(Debug, Clone)]
pub struct AgentDispatcher {
    registry: ActorRef<AgentRegistryMsg>,
    telemetry: Option<DispatchTelemetry>,
    default_timeout: Duration,
}

impl AgentDispatcher {
    pub fn new(registry: ActorRef<AgentRegistryMsg>, default_timeout: Duration) -> Self {
        Self {
            registry,
            telemetry: None,
            default_timeout,
        }
    }

    pub fn with_telemetry(mut self, telemetry: DispatchTelemetry) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Fire-and-forget. Returns the number of agents delivery was initiated
    /// to; failures to enqueue are logged, never returned.
    pub async fn dispatch(&self, envelope: Envelope) -> Result<usize, DispatchError> {
        let started = Instant::now();
        let envelope = Arc::new(envelope);
        let submitted = self.submit_to_matches(&envelope, false).await?;

        self.report(
            &envelope,
            DispatchKind::Async,
            submitted.len(),
            Tally::from_submissions(&submitted),
            started,
        );
        Ok(submitted.len())
    }

    /// Deliver and wait up to `timeout` (or the configured default) for
    /// every matching agent to accept the envelope.
    pub async fn dispatch_sync(
        &self,
        envelope: Envelope,
        timeout: Option<Duration>,
    ) -> Result<HashMap<AgentId, DeliveryOutcome>, DispatchError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        if timeout.is_zero() {
            return Err(DispatchError::InvalidTimeout);
        }
        let started = Instant::now();
        let deadline = started + timeout;
        let envelope = Arc::new(envelope);

        let pending = self.submit_to_matches(&envelope, true).await?;
        let eligible = pending.len();
        let outcomes = delivery::collect(pending, deadline).await;

        self.report(
            &envelope,
            DispatchKind::Sync,
            eligible,
            Tally::from_outcomes(outcomes.values()),
            started,
        );
        Ok(outcomes)
    }

    pub async fn dispatch_with(
        &self,
        envelope: Envelope,
        mode: DispatchMode,
    ) -> Result<DispatchResult<AgentId>, DispatchError> {
        match mode {
            DispatchMode::Async => self
                .dispatch(envelope)
                .await
                .map(|eligible| DispatchResult::Initiated { eligible }),
            DispatchMode::Sync { timeout } => self
                .dispatch_sync(envelope, Some(timeout))
                .await
                .map(DispatchResult::Completed),
        }
    }

    async fn submit_to_matches(
        &self,
        envelope: &Arc<Envelope>,
        confirm: bool,
    ) -> Result<Vec<(AgentId, Submitted)>, DispatchError> {
        let matches = agent_registry::lookup(&self.registry, envelope.event_type()).await?;
        if matches.is_empty() {
            tracing::debug!(
                event_id = %envelope.id(),
                event_type = %envelope.event_type(),
                "No agents registered for event type"
            );
        }

        Ok(matches
            .into_iter()
            .map(|matched| {
                let agent = matched.agent;
                let submitted = delivery::submit(&agent, envelope.clone(), confirm);
                if let Err(e) = &submitted {
                    tracing::debug!(
                        agent_id = %agent.id(),
                        event_id = %envelope.id(),
                        error = %e,
                        "Agent unreachable during dispatch"
                    );
                }
                (agent.id().clone(), submitted)
            })
            .collect())
    }

    fn report(
        &self,
        envelope: &Envelope,
        kind: DispatchKind,
        eligible: usize,
        tally: Tally,
        started: Instant,
    ) {
        if let Some(telemetry) = &self.telemetry {
            telemetry.emit(DispatchReport::new(
                envelope,
                DispatchOrigin::Agents,
                kind,
                eligible,
                tally,
                started.elapsed(),
            ));
        }
    }
}
