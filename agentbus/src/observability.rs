//! Dispatch telemetry
//!
//! Every completed dispatch emits one [`DispatchReport`]: a `tracing` event
//! on the `agentbus::dispatch` target plus a broadcast to any subscribed
//! metrics collector. Nothing is stored here; a lagging collector loses
//! reports rather than slowing dispatch down.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared_types::Envelope;
use tokio::sync::broadcast;

use crate::delivery::Tally;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOrigin {
    /// Published on the event bus to its subscriptions.
    Bus,
    /// Routed by the agent dispatcher to registered agents.
    Agents,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchKind {
    Async,
    Sync,
}

#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub envelope_id: String,
    pub event_type: String,
    pub origin: DispatchOrigin,
    pub kind: DispatchKind,
    pub eligible: usize,
    pub delivered: usize,
    pub timeouts: usize,
    pub errors: usize,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

impl DispatchReport {
    pub fn new(
        envelope: &Envelope,
        origin: DispatchOrigin,
        kind: DispatchKind,
        eligible: usize,
        tally: Tally,
        elapsed: Duration,
    ) -> Self {
        Self {
            envelope_id: envelope.id().to_string(),
            event_type: envelope.event_type().to_string(),
            origin,
            kind,
            eligible,
            delivered: tally.delivered,
            timeouts: tally.timeouts,
            errors: tally.errors,
            elapsed_ms: elapsed.as_millis() as u64,
            completed_at: Utc::now(),
        }
    }
}

/// Cloneable sender side of the dispatch report stream.
#[derive(Debug, Clone)]
pub struct DispatchTelemetry {
    tx: broadcast::Sender<DispatchReport>,
}

impl DispatchTelemetry {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DispatchReport> {
        self.tx.subscribe()
    }

    pub fn emit(&self, report: DispatchReport) {
        tracing::debug!(
            target: "agentbus::dispatch",
            envelope_id = %report.envelope_id,
            event_type = %report.event_type,
            origin = ?report.origin,
            kind = ?report.kind,
            eligible = report.eligible,
            delivered = report.delivered,
            timeouts = report.timeouts,
            errors = report.errors,
            elapsed_ms = report.elapsed_ms,
            "Dispatch completed"
        );
        // No receivers is the common case outside of metrics collection.
        let _ = self.tx.send(report);
    }
}

impl Default for DispatchTelemetry {
    fn default() -> Self {
        Self::new(256)
    }
}
