//! Event adapter: one [`SessionHandler`] per connection attempt.
//!
//! Translates transport callbacks into queue and signal operations:
//!
//! | Callback | Effect |
//! |----------|--------|
//! | `on_connected` | start the pump, publish `Ok(Connection)` |
//! | `on_message` | push onto the inbound queue |
//! | `on_error` | stop token `Error`, or publish `Err` if never connected |
//! | `on_closed` | stop token `Closed` |
//!
//! The stop token is single-fire, so an error followed by the transport's
//! own close sequence reports only the first cause.

// ============================================================================
// Imports
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result, SessionError};
use crate::identifiers::ConnectionId;
use crate::queue::Queue;
use crate::request::RequestInfo;
use crate::signal::Signal;
use crate::transport::{Session, SessionHandler};

use super::pump::{InboundSlot, Pump};
use super::{Connection, Termination};

// ============================================================================
// Destination
// ============================================================================

/// Where the adapter publishes its connection result.
pub(crate) enum Destination<M> {
    /// Queue shared by every connection of one acceptor.
    Shared(mpsc::Sender<Result<Connection<M>>>),
    /// Single-shot cell owned by one client connect call.
    Single(Mutex<Option<oneshot::Sender<Result<Connection<M>>>>>),
}

impl<M> Destination<M> {
    /// Creates a single-shot destination.
    pub(crate) fn single(tx: oneshot::Sender<Result<Connection<M>>>) -> Self {
        Self::Single(Mutex::new(Some(tx)))
    }

    /// Delivers `result`. Returns `false` if nobody is listening.
    async fn deliver(&self, result: Result<Connection<M>>) -> bool {
        match self {
            Self::Shared(tx) => tx.send(result).await.is_ok(),
            Self::Single(slot) => {
                let tx = slot.lock().take();
                tx.is_some_and(|tx| tx.send(result).is_ok())
            }
        }
    }
}

// ============================================================================
// Pending
// ============================================================================

/// Resources consumed when the session connects.
struct Pending<M> {
    read: mpsc::Receiver<String>,
    write: mpsc::Sender<String>,
    outbound: mpsc::Receiver<String>,
    preconnect: Option<M>,
    request: Option<RequestInfo>,
}

// ============================================================================
// EventAdapter
// ============================================================================

/// Per-connection transport callback implementation.
pub(crate) struct EventAdapter<M> {
    id: ConnectionId,
    destination: Destination<M>,
    pending: Mutex<Option<Pending<M>>>,
    inbound: InboundSlot,
    stop: Signal<Termination>,
    ever_connected: AtomicBool,
    published: AtomicBool,
    close_timeout: Duration,
}

impl<M: Send + 'static> EventAdapter<M> {
    /// Creates an adapter bound to fresh queues.
    pub(crate) fn new(
        id: ConnectionId,
        destination: Destination<M>,
        inbound: Queue,
        outbound: Queue,
        preconnect: Option<M>,
        request: Option<RequestInfo>,
        close_timeout: Duration,
    ) -> Self {
        let (inbound_tx, read) = inbound;
        let (write, outbound) = outbound;

        Self {
            id,
            destination,
            pending: Mutex::new(Some(Pending {
                read,
                write,
                outbound,
                preconnect,
                request,
            })),
            inbound: InboundSlot::new(inbound_tx),
            stop: Signal::new(),
            ever_connected: AtomicBool::new(false),
            published: AtomicBool::new(false),
            close_timeout,
        }
    }

    /// Returns `true` once `on_connected` has completed.
    #[inline]
    pub(crate) fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::SeqCst)
    }

    /// Publishes the one result of this attempt. Later calls are dropped.
    async fn publish(&self, result: Result<Connection<M>>) -> bool {
        if self.published.swap(true, Ordering::SeqCst) {
            debug!(connection = %self.id, "Connection result already published");
            return false;
        }
        let delivered = self.destination.deliver(result).await;
        if !delivered {
            warn!(connection = %self.id, "Connection result dropped: no receiver");
        }
        delivered
    }

    /// Reports a failure that happened before the session was established.
    pub(crate) async fn fail(&self, error: Error) {
        warn!(connection = %self.id, error = %error, "Connection attempt failed");
        self.publish(Err(error)).await;
        self.inbound.close();
    }

    /// Fires the stop token. A second delivery is a no-op.
    fn stop(&self, termination: Termination) {
        let code = termination.code();
        if self.stop.fire(termination) {
            debug!(connection = %self.id, code, "Stop token delivered");
        } else {
            trace!(connection = %self.id, code, "Stop token already delivered");
        }
    }
}

#[async_trait]
impl<M: Send + 'static> SessionHandler for EventAdapter<M> {
    async fn on_connected(&self, session: Session) {
        let Some(pending) = self.pending.lock().take() else {
            warn!(connection = %self.id, "Duplicate connected callback ignored");
            return;
        };

        let pump = Pump::new(
            session.clone(),
            self.inbound.clone(),
            pending.outbound,
            self.stop.subscribe(),
            self.close_timeout,
        );

        let process_result = Signal::new();
        let reader = process_result.subscribe();
        let id = self.id;
        tokio::spawn(async move {
            let termination = pump.run().await;
            debug!(connection = %id, ?termination, "Outbound pump terminated");
            process_result.fire(termination);
        });

        let connection = Connection::new(
            session,
            pending.read,
            pending.write,
            reader,
            pending.preconnect,
            pending.request,
        );

        info!(connection = %self.id, "Connection established");

        if !self.publish(Ok(connection)).await {
            // The connection was dropped, which closes its write queue and
            // lets the pump wind the session down.
            debug!(connection = %self.id, "Established connection not delivered");
        }
        self.ever_connected.store(true, Ordering::SeqCst);
    }

    async fn on_message(&self, text: String) {
        let Some(inbound) = self.inbound.sender() else {
            trace!(connection = %self.id, "Inbound queue closed, dropping message");
            return;
        };
        // A full queue must not stall the read loop once the slot closes,
        // or the peer's close reply would never be read.
        tokio::select! {
            biased;

            sent = inbound.send(text) => {
                if sent.is_err() {
                    debug!(connection = %self.id, "Inbound receiver dropped, discarding message");
                }
            }

            () = self.inbound.closed() => {
                debug!(connection = %self.id, "Inbound queue closed while full, discarding message");
            }
        }
    }

    async fn on_error(&self, cause: SessionError) {
        if self.ever_connected() {
            info!(connection = %self.id, error = %cause, "Connection failed");
            self.stop(cause.into());
        } else if self.published.load(Ordering::SeqCst) {
            // on_connected is mid-flight; the pump already exists.
            self.stop(cause.into());
        } else {
            self.fail(Error::Session(cause.clone())).await;
            self.stop(cause.into());
        }
        self.inbound.close();
    }

    async fn on_closed(&self, code: u16, reason: String) {
        info!(connection = %self.id, code, reason = %reason, "Connection closed");
        self.stop(Termination::closed(code, reason));
        self.inbound.close();
    }
}

// ============================================================================
// Tests
// ============================================================================
