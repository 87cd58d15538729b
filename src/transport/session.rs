//! Handle to one live WebSocket session.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures_util::{Sink, SinkExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, trace};

use crate::error::SessionError;
use crate::identifiers::ConnectionId;

// ============================================================================
// Constants
// ============================================================================

/// Largest close reason that fits a control frame (125 - 2 bytes of code).
const MAX_CLOSE_REASON: usize = 123;

// ============================================================================
// Types
// ============================================================================

/// Type-erased write half of a WebSocket stream.
pub(crate) type WsSink = Pin<Box<dyn Sink<Message, Error = WsError> + Send>>;

// ============================================================================
// Session
// ============================================================================

/// Cloneable handle to a live transport session.
///
/// Only the outbound pump sends messages through a session. Anyone may
/// close it; closing is idempotent, so the pump's cooperative close and the
/// transport's own teardown can race safely.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    /// Write half. Taken on shutdown so the socket is released even while
    /// handles to the session are still held.
    sink: Mutex<Option<WsSink>>,
    closing: AtomicBool,
    /// Write failures, reported back to the driver's error callback.
    faults: mpsc::UnboundedSender<SessionError>,
}

impl Session {
    pub(crate) fn new(
        id: ConnectionId,
        remote_addr: Option<SocketAddr>,
        sink: WsSink,
        faults: mpsc::UnboundedSender<SessionError>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id,
                remote_addr,
                sink: Mutex::new(Some(sink)),
                closing: AtomicBool::new(false),
                faults,
            }),
        }
    }

    /// Returns the connection ID.
    #[inline]
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    /// Returns the peer address, when known.
    #[inline]
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.inner.remote_addr
    }

    /// Returns `true` once a close has been requested.
    #[inline]
    #[must_use]
    pub fn is_closing(&self) -> bool {
        self.inner.closing.load(Ordering::SeqCst)
    }

    /// Sends one text message.
    ///
    /// A failed write is not returned to the caller. It is reported to the
    /// transport driver, which delivers it through the error callback.
    pub(crate) async fn send_text(&self, text: String) {
        trace!(connection = %self.inner.id, len = text.len(), "Sending text message");

        let mut guard = self.inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            trace!(connection = %self.inner.id, "Session shut down, message dropped");
            return;
        };

        if let Err(e) = sink.send(Message::Text(text.into())).await {
            let cause = match e {
                WsError::Capacity(e) => SessionError::new(SessionError::MESSAGE_TOO_BIG, e.to_string()),
                e => SessionError::abnormal(e.to_string()),
            };
            debug!(connection = %self.inner.id, error = %cause, "Send failed");
            let _ = self.inner.faults.send(cause);
        }
    }

    /// Starts the close handshake with `code` and `reason`.
    ///
    /// Only the first call sends a close frame; later calls return
    /// immediately. Reasons longer than a control frame allows are truncated.
    pub async fn close(&self, code: u16, reason: &str) {
        if self.inner.closing.swap(true, Ordering::SeqCst) {
            return;
        }

        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: truncate_reason(reason).to_owned().into(),
        };

        debug!(connection = %self.inner.id, code, "Closing session");

        let mut guard = self.inner.sink.lock().await;
        let Some(sink) = guard.as_mut() else {
            return;
        };
        if let Err(e) = sink.send(Message::Close(Some(frame))).await {
            debug!(connection = %self.inner.id, error = %e, "Close frame not sent");
        }
    }

    /// Marks the session closed and releases the write half.
    pub(crate) async fn shutdown(&self) {
        self.inner.closing.store(true, Ordering::SeqCst);
        if let Some(mut sink) = self.inner.sink.lock().await.take() {
            let _ = sink.close().await;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("remote_addr", &self.inner.remote_addr)
            .field("closing", &self.is_closing())
            .finish_non_exhaustive()
    }
}

/// Cuts `reason` to at most [`MAX_CLOSE_REASON`] bytes on a char boundary.
fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

// ============================================================================
// Tests
// ============================================================================
