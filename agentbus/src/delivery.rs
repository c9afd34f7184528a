//! Fan-out primitive shared by the bus and the agent dispatcher
//!
//! Delivery happens in two phases. [`submit`] enqueues one envelope into one
//! handler and returns immediately; callers submit to every target first, in
//! order, so each target's mailbox sees envelopes in submission order.
//! [`collect`] then waits for the confirmations of a synchronous dispatch,
//! all of them concurrently and under one shared deadline.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use shared_types::{DeliveryOutcome, Envelope};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::handler::{Delivery, DeliveryError, EventHandler};

/// How a dispatch call delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Fire-and-forget: return once every delivery was initiated.
    Async,
    /// Wait up to `timeout` for every target to confirm acceptance.
    Sync { timeout: Duration },
}

/// Result of a dispatch call, keyed by target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchResult<K: Eq + Hash> {
    /// Async mode: number of targets delivery was initiated to.
    Initiated { eligible: usize },
    /// Sync mode: one outcome per eligible target.
    Completed(HashMap<K, DeliveryOutcome>),
}

/// A submitted delivery: `None` when no confirmation was requested.
pub type Submitted = Result<Option<oneshot::Receiver<()>>, DeliveryError>;

/// Enqueue `envelope` into `handler`. A panicking `deliver` is contained and
/// reported as [`DeliveryError::Panicked`].
pub fn submit(handler: &dyn EventHandler, envelope: Arc<Envelope>, confirm: bool) -> Submitted {
    let (delivery, ack) = if confirm {
        let (delivery, ack) = Delivery::with_confirmation(envelope);
        (delivery, Some(ack))
    } else {
        (Delivery::new(envelope), None)
    };

    match std::panic::catch_unwind(AssertUnwindSafe(|| handler.deliver(delivery))) {
        Ok(Ok(())) => Ok(ack),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(DeliveryError::Panicked),
    }
}

/// Wait for confirmations until `deadline`.
///
/// Failed submissions and dropped confirmation channels resolve to
/// `Error`, missing confirmations at the deadline to `Timeout`.
pub async fn collect<K>(pending: Vec<(K, Submitted)>, deadline: Instant) -> HashMap<K, DeliveryOutcome>
where
    K: Eq + Hash,
{
    let waits = pending.into_iter().map(|(key, submitted)| async move {
        let outcome = match submitted {
            Err(_) => DeliveryOutcome::Error,
            Ok(None) => DeliveryOutcome::Delivered,
            Ok(Some(ack)) => match tokio::time::timeout_at(deadline, ack).await {
                Ok(Ok(())) => DeliveryOutcome::Delivered,
                Ok(Err(_)) => DeliveryOutcome::Error,
                Err(_) => DeliveryOutcome::Timeout,
            },
        };
        (key, outcome)
    });

    futures::future::join_all(waits).await.into_iter().collect()
}

/// Outcome counts for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub delivered: usize,
    pub timeouts: usize,
    pub errors: usize,
}

impl Tally {
    pub fn from_outcomes<'a>(outcomes: impl IntoIterator<Item = &'a DeliveryOutcome>) -> Self {
        let mut tally = Self::default();
        for outcome in outcomes {
            match outcome {
                DeliveryOutcome::Delivered => tally.delivered += 1,
                DeliveryOutcome::Timeout => tally.timeouts += 1,
                DeliveryOutcome::Error => tally.errors += 1,
            }
        }
        tally
    }

    pub fn from_submissions<'a, K: 'a>(submitted: impl IntoIterator<Item = &'a (K, Submitted)>) -> Self {
        let mut tally = Self::default();
        for (_, result) in submitted {
            if result.is_ok() {
                tally.delivered += 1;
            } else {
                tally.errors += 1;
            }
        }
        tally
    }
}
