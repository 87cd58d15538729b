//! Connection record and session lifecycle.
//!
//! A [`Connection`] is what application code receives once a session is
//! established: an inbound queue to read, an outbound queue to write, and a
//! completion signal that fires exactly once with the session's
//! [`Termination`].
//!
//! # Lifecycle
//!
//! ```text
//! transport ──► EventAdapter ──► inbound queue ──► application
//!                   │  stop token                      │
//!                   ▼                                  ▼
//!               OutboundPump ◄────── outbound queue ◄──┘
//!                   │
//!                   └──► process result (Termination)
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `adapter` | Transport callbacks → queues and signals |
//! | `pump` | Sole writer to the session |

// ============================================================================
// Submodules
// ============================================================================

/// Transport callbacks → queues and signals.
pub(crate) mod adapter;

/// Sole writer to the session.
pub(crate) mod pump;

// ============================================================================
// Imports
// ============================================================================

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendError;

use crate::error::SessionError;
use crate::identifiers::ConnectionId;
use crate::request::RequestInfo;
use crate::signal::SignalReceiver;
use crate::transport::Session;

// ============================================================================
// Termination
// ============================================================================

/// How an established session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Orderly close, initiated by either side.
    Closed {
        /// WebSocket close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
    /// The session failed.
    Error(SessionError),
}

impl Termination {
    /// Close code for a normal closure.
    pub const NORMAL: u16 = 1000;

    /// Creates a closed termination.
    #[inline]
    pub fn closed(code: u16, reason: impl Into<String>) -> Self {
        Self::Closed {
            code,
            reason: reason.into(),
        }
    }

    /// Returns the close code of either variant.
    #[inline]
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Closed { code, .. } => *code,
            Self::Error(cause) => cause.code,
        }
    }

    /// Returns `true` for [`Termination::Error`].
    #[inline]
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Returns `true` for a close with code `1000`.
    #[inline]
    #[must_use]
    pub fn is_normal(&self) -> bool {
        matches!(self, Self::Closed { code: Self::NORMAL, .. })
    }

    /// Returns the failure cause, if any.
    #[must_use]
    pub fn error(&self) -> Option<&SessionError> {
        match self {
            Self::Error(cause) => Some(cause),
            Self::Closed { .. } => None,
        }
    }
}

impl From<SessionError> for Termination {
    fn from(cause: SessionError) -> Self {
        Self::Error(cause)
    }
}

// ============================================================================
// Connection
// ============================================================================

/// One established duplex session, as seen by application code.
///
/// `M` is the value the accept side's preconnect hook returned; it is `()`
/// for client connections.
///
/// Dropping the write queue (see [`Connection::close_write`]) is how the
/// application says it is done sending: the pump then closes the session
/// with a normal status and closes the read queue.
#[derive(Debug)]
pub struct Connection<M = ()> {
    session: Session,
    read: mpsc::Receiver<String>,
    write: Option<mpsc::Sender<String>>,
    process_result: SignalReceiver<Termination>,
    preconnect: Option<M>,
    request: Option<RequestInfo>,
}

/// Owned pieces of a [`Connection`], for moving queues into separate tasks.
#[derive(Debug)]
pub struct ConnectionParts<M = ()> {
    /// Transport session handle.
    pub session: Session,
    /// Inbound messages, in receive order.
    pub read: mpsc::Receiver<String>,
    /// Outbound messages. `None` if already closed.
    pub write: Option<mpsc::Sender<String>>,
    /// Fires once when the pump terminates.
    pub process_result: SignalReceiver<Termination>,
    /// Preconnect hook result (accept side only).
    pub preconnect: Option<M>,
    /// Normalized upgrade request (accept side only).
    pub request: Option<RequestInfo>,
}

impl<M> Connection<M> {
    pub(crate) fn new(
        session: Session,
        read: mpsc::Receiver<String>,
        write: mpsc::Sender<String>,
        process_result: SignalReceiver<Termination>,
        preconnect: Option<M>,
        request: Option<RequestInfo>,
    ) -> Self {
        Self {
            session,
            read,
            write: Some(write),
            process_result,
            preconnect,
            request,
        }
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.session.id()
    }

    /// Returns the transport session handle.
    #[inline]
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Receives the next inbound message.
    ///
    /// Returns `None` once the session has closed and every buffered
    /// message has been read.
    pub async fn recv(&mut self) -> Option<String> {
        self.read.recv().await
    }

    /// Queues an outbound message.
    ///
    /// # Errors
    ///
    /// Returns the message back if the write queue was closed, either by
    /// [`Connection::close_write`] or by the pump halting.
    pub async fn send(&self, text: impl Into<String>) -> Result<(), SendError<String>> {
        let text = text.into();
        match &self.write {
            Some(write) => write.send(text).await,
            None => Err(SendError(text)),
        }
    }

    /// Returns the read queue.
    #[inline]
    pub fn read_queue(&mut self) -> &mut mpsc::Receiver<String> {
        &mut self.read
    }

    /// Returns the write queue, unless it was closed locally.
    #[inline]
    #[must_use]
    pub fn write_queue(&self) -> Option<&mpsc::Sender<String>> {
        self.write.as_ref()
    }

    /// Drops this connection's write queue handle.
    ///
    /// Once every clone of the sender is gone the pump closes the session
    /// with a normal status. Calling this twice is a no-op.
    pub fn close_write(&mut self) {
        self.write = None;
    }

    /// Returns a reader of the pump's termination value.
    #[must_use]
    pub fn process_result(&self) -> SignalReceiver<Termination> {
        self.process_result.clone()
    }

    /// Waits for the session to terminate.
    pub async fn closed(&self) -> Termination {
        let mut result = self.process_result.clone();
        result
            .wait()
            .await
            .unwrap_or_else(|| SessionError::abnormal("pump dropped without a result").into())
    }

    /// Returns the preconnect hook's result (accept side only).
    #[inline]
    #[must_use]
    pub fn preconnect_result(&self) -> Option<&M> {
        self.preconnect.as_ref()
    }

    /// Returns the normalized upgrade request (accept side only).
    #[inline]
    #[must_use]
    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    /// Splits the connection into its owned parts.
    #[must_use]
    pub fn into_parts(self) -> ConnectionParts<M> {
        ConnectionParts {
            session: self.session,
            read: self.read,
            write: self.write,
            process_result: self.process_result,
            preconnect: self.preconnect,
            request: self.request,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
