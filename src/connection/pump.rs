//! Outbound pump: the only task that writes to a session.
//!
//! The pump races two sources, the stop token and the outbound queue, with
//! the stop token always polled first. Once the stop token has fired no
//! further message is sent, even if one was already waiting in the queue:
//! a concurrent close or error callback has begun tearing the session down
//! and a write now would race that teardown.
//!
//! # States
//!
//! | State | Event | Action |
//! |-------|-------|--------|
//! | Active | stop token | close outbound queue, finish with the token's value |
//! | Active | message | send it, stay Active |
//! | Active | outbound queue closed | close session (1000), close inbound, await the close handshake |
//!
//! Send failures are not handled here. The session routes them to the
//! transport's error callback, which comes back as a stop token.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::SessionError;
use crate::signal::{Signal, SignalReceiver};
use crate::transport::Session;

use super::Termination;

// ============================================================================
// InboundSlot
// ============================================================================

/// Shared, closable handle to the inbound queue's sender.
///
/// The queue is closed by dropping the slot's sender, which can happen at
/// most once no matter how many parties call [`InboundSlot::close`]. A
/// delivery blocked on a full queue is released by [`InboundSlot::closed`],
/// so the transport keeps reading after a local close.
#[derive(Debug, Clone)]
pub(crate) struct InboundSlot {
    sender: Arc<Mutex<Option<mpsc::Sender<String>>>>,
    closed: Arc<Signal<()>>,
}

impl InboundSlot {
    pub(crate) fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            closed: Arc::new(Signal::new()),
        }
    }

    /// Returns a sender while the slot is open.
    pub(crate) fn sender(&self) -> Option<mpsc::Sender<String>> {
        self.sender.lock().clone()
    }

    /// Closes the slot. Returns `true` only for the call that closed it.
    pub(crate) fn close(&self) -> bool {
        let closed = self.sender.lock().take().is_some();
        self.closed.fire(());
        closed
    }

    /// Resolves once the slot has been closed.
    pub(crate) async fn closed(&self) {
        let _ = self.closed.subscribe().wait().await;
    }
}

// ============================================================================
// Pump
// ============================================================================

/// Drains an outbound queue into a session.
pub(crate) struct Pump {
    session: Session,
    inbound: InboundSlot,
    outbound: mpsc::Receiver<String>,
    stop: SignalReceiver<Termination>,
    close_timeout: Duration,
}

impl Pump {
    pub(crate) fn new(
        session: Session,
        inbound: InboundSlot,
        outbound: mpsc::Receiver<String>,
        stop: SignalReceiver<Termination>,
        close_timeout: Duration,
    ) -> Self {
        Self {
            session,
            inbound,
            outbound,
            stop,
            close_timeout,
        }
    }

    /// Runs until the session terminates and returns how it ended.
    pub(crate) async fn run(mut self) -> Termination {
        loop {
            tokio::select! {
                biased;

                stopped = self.stop.wait() => {
                    return self.drain(stopped);
                }

                message = self.outbound.recv() => {
                    match message {
                        Some(text) => self.session.send_text(text).await,
                        None => return self.finish().await,
                    }
                }
            }
        }
    }

    /// Stop token observed: refuse further writes and report the cause.
    fn drain(&mut self, stopped: Option<Termination>) -> Termination {
        self.outbound.close();

        let termination = stopped
            .unwrap_or_else(|| SessionError::abnormal("transport dropped without a result").into());

        debug!(
            connection = %self.session.id(),
            code = termination.code(),
            "Outbound pump stopped"
        );
        termination
    }

    /// The application closed its outbound queue: close the session normally.
    async fn finish(&mut self) -> Termination {
        debug!(connection = %self.session.id(), "Outbound queue closed by application");

        self.session.close(Termination::NORMAL, "").await;
        self.inbound.close();

        match timeout(self.close_timeout, self.stop.wait()).await {
            Ok(stopped) => self.drain(stopped),
            Err(_) => {
                warn!(
                    connection = %self.session.id(),
                    timeout_ms = self.close_timeout.as_millis() as u64,
                    "Close handshake timed out"
                );
                SessionError::abnormal("close handshake timed out").into()
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
