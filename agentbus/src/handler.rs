//! EventHandler - the single delivery interface behind every subscription
//!
//! Closures, transport channels and agents are all adapted to
//! [`EventHandler`] when they subscribe, so the dispatcher never branches on
//! handler kind. `deliver` only enqueues: every handler owns a FIFO mailbox
//! and processes it on its own task, which keeps slow handlers away from the
//! bus and preserves per-handler ordering.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use shared_types::Envelope;
use tokio::sync::{mpsc, oneshot};

/// Error type returned by closure handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type HandlerResult = Result<(), HandlerError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum DeliveryError {
    #[error("handler is no longer accepting events: {0}")]
    Closed(String),
    #[error("handler panicked while accepting an event")]
    Panicked,
}

/// One envelope on its way to one handler.
///
/// Carries an optional confirmation channel used by synchronous dispatch.
/// Handlers call [`Delivery::confirm`] when they take the envelope off
/// their queue; dropping an unconfirmed delivery reports an error outcome.
#[derive(Debug)]
pub struct Delivery {
    envelope: Arc<Envelope>,
    ack: Option<oneshot::Sender<()>>,
}

impl Delivery {
    pub fn new(envelope: Arc<Envelope>) -> Self {
        Self {
            envelope,
            ack: None,
        }
    }

    pub fn with_confirmation(envelope: Arc<Envelope>) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                envelope,
                ack: Some(tx),
            },
            rx,
        )
    }

    pub fn envelope(&self) -> &Arc<Envelope> {
        &self.envelope
    }

    pub fn confirm(&mut self) {
        if let Some(ack) = self.ack.take() {
            // The dispatcher may already have given up waiting.
            let _ = ack.send(());
        }
    }
}

/// Anything that can receive envelopes from the bus.
pub trait EventHandler: Send + Sync + 'static {
    /// Enqueue the delivery. Must not wait for the handler to process it.
    fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError>;

    /// Short label used in logs and subscription listings.
    fn describe(&self) -> String;
}

// ============================================================================
// Closure handlers
// ============================================================================

struct FnHandler {
    tx: mpsc::UnboundedSender<Delivery>,
}

impl EventHandler for FnHandler {
    fn deliver(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        self.tx
            .send(delivery)
            .map_err(|_| DeliveryError::Closed("closure handler task stopped".to_string()))
    }

    fn describe(&self) -> String {
        "fn".to_string()
    }
}

/// Adapt a synchronous closure. Each call runs on the blocking pool, one
/// envelope at a time per handler, so a closure that blocks its thread never
/// starves the runtime workers the bus and other handlers run on. Errors and
/// panics are logged and never reach the publisher.
///
/// Must be called from within a tokio runtime.
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Envelope) -> HandlerResult + Send + Sync + 'static,
{
    let f = Arc::new(f);
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    tokio::spawn(async move {
        while let Some(mut delivery) = rx.recv().await {
            delivery.confirm();
            let envelope = delivery.envelope;
            let call = {
                let f = f.clone();
                let envelope = envelope.clone();
                tokio::task::spawn_blocking(move || f(&envelope))
            };
            match call.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    event_id = %envelope.id(),
                    event_type = %envelope.event_type(),
                    error = %e,
                    "Event handler returned an error"
                ),
                Err(e) if e.is_panic() => tracing::warn!(
                    event_id = %envelope.id(),
                    event_type = %envelope.event_type(),
                    "Event handler panicked"
                ),
                Err(e) => {
                    tracing::debug!(error = %e, "Closure handler call cancelled");
                    break;
                }
            }
        }
    });
    Arc::new(FnHandler { tx })
}

/// Adapt an async closure. Same isolation rules as [`handler_fn`].
pub fn handler_async_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(Arc<Envelope>) -> Fut + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<Delivery>();
    tokio::spawn(async move {
        while let Some(mut delivery) = rx.recv().await {
            delivery.confirm();
            let envelope = delivery.envelope;
            let result = match std::panic::catch_unwind(AssertUnwindSafe(|| f(envelope.clone()))) {
                Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
                Err(panic) => Err(panic),
            };
            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(
                    event_id = %envelope.id(),
                    event_type = %envelope.event_type(),
                    error = %e,
                    "Event handler returned an error"
                ),
                Err(_) => tracing::warn!(
                    event_id = %envelope.id(),
                    event_type = %envelope.event_type(),
                    "Event handler panicked"
                ),
            }
        }
    });
    Arc::new(FnHandler { tx })
}

// ============================================================================
// Channel handlers (transport side)
// ============================================================================

/// Forwards envelopes into an unbounded channel, e.g. a WebSocket writer.
/// Acceptance into the channel counts as confirmation.
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<Arc<Envelope>>,
}

impl ChannelHandler {
    pub fn new(tx: mpsc::UnboundedSender<Arc<Envelope>>) -> Self {
        Self { tx }
    }

    /// Handler plus the receiving end the transport drains.
    pub fn channel() -> (Arc<dyn EventHandler>, mpsc::UnboundedReceiver<Arc<Envelope>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self::new(tx)), rx)
    }
}

impl EventHandler for ChannelHandler {
    fn deliver(&self, mut delivery: Delivery) -> Result<(), DeliveryError> {
        self.tx
            .send(delivery.envelope().clone())
            .map_err(|_| DeliveryError::Closed("channel receiver dropped".to_string()))?;
        delivery.confirm();
        Ok(())
    }

    fn describe(&self) -> String {
        "channel".to_string()
    }
}
