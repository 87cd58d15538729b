//! Transport driver: turns a WebSocket stream into handler callbacks.
//!
//! The driver owns the read half of the stream. It announces the session
//! with `on_connected`, forwards every text frame to `on_message` in
//! receive order, and finishes with exactly one of `on_closed` or
//! `on_error`. Write failures reported by the [`Session`] are delivered
//! through `on_error` as well, so nobody else has to handle them.
//!
//! # Close classification
//!
//! | Peer close code | Callback |
//! |-----------------|----------|
//! | 1000, 1001, 1005, 3000-4999 | `on_closed(code, reason)` |
//! | anything else | `on_error(SessionError { code, reason })` |
//! | no close frame | `on_closed(1006, "Disconnected")` |

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

use crate::error::SessionError;
use crate::identifiers::ConnectionId;

use super::{Session, SessionHandler};

// ============================================================================
// Constants
// ============================================================================

/// Code reported when a peer closes without sending a status.
const NO_STATUS: u16 = 1005;

/// Reason reported when the stream ends without a close handshake.
const DISCONNECTED: &str = "Disconnected";

// ============================================================================
// Outcome
// ============================================================================

/// How the read loop ended.
#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Closed { code: u16, reason: String },
    Error(SessionError),
}

impl Outcome {
    /// Classifies the close frame received from the peer, if any.
    fn from_close(frame: Option<(u16, String)>) -> Self {
        match frame {
            Some((code, reason)) if is_normal_close(code) => Self::Closed { code, reason },
            Some((code, reason)) => Self::Error(SessionError::new(code, reason)),
            None => Self::Closed {
                code: SessionError::ABNORMAL,
                reason: DISCONNECTED.to_owned(),
            },
        }
    }
}

/// Returns `true` for close codes that mean an orderly shutdown.
fn is_normal_close(code: u16) -> bool {
    matches!(code, 1000 | 1001 | NO_STATUS) || (3000..=4999).contains(&code)
}

// ============================================================================
// Driver
// ============================================================================

/// Drives an established stream until it terminates.
pub(crate) async fn drive<S, H>(
    stream: WebSocketStream<S>,
    id: ConnectionId,
    remote_addr: Option<SocketAddr>,
    handler: &H,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: SessionHandler + ?Sized,
{
    let (sink, mut source) = stream.split();
    let (faults_tx, mut faults_rx) = mpsc::unbounded_channel();
    let session = Session::new(id, remote_addr, Box::pin(sink), faults_tx);

    handler.on_connected(session.clone()).await;

    let mut close_frame: Option<(u16, String)> = None;

    let outcome = loop {
        tokio::select! {
            biased;

            Some(fault) = faults_rx.recv() => {
                break Outcome::Error(fault);
            }

            item = source.next() => {
                match item {
                    Some(Ok(Message::Text(text))) => {
                        trace!(connection = %id, len = text.len(), "Text message received");
                        handler.on_message(text.as_str().to_owned()).await;
                    }

                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = frame.map_or((NO_STATUS, String::new()), |f| {
                            (u16::from(f.code), f.reason.as_str().to_owned())
                        });
                        debug!(connection = %id, code, "Close frame received");
                        // Keep reading so the close reply gets flushed.
                        close_frame.get_or_insert((code, reason));
                    }

                    Some(Ok(Message::Binary(data))) => {
                        debug!(connection = %id, len = data.len(), "Ignoring binary message");
                    }

                    // Ping, Pong and raw frames are handled by the protocol engine.
                    Some(Ok(_)) => {}

                    Some(Err(WsError::Capacity(e))) if close_frame.is_none() => {
                        let cause = SessionError::new(SessionError::MESSAGE_TOO_BIG, e.to_string());
                        warn!(connection = %id, error = %cause, "Inbound message over limit");
                        session.close(cause.code, &cause.reason).await;
                        break Outcome::Error(cause);
                    }

                    Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) | None => {
                        break Outcome::from_close(close_frame.take());
                    }

                    Some(Err(e)) => {
                        if close_frame.is_some() {
                            break Outcome::from_close(close_frame.take());
                        }
                        debug!(connection = %id, error = %e, "Transport error");
                        break Outcome::Error(SessionError::abnormal(e.to_string()));
                    }
                }
            }
        }
    };

    match outcome {
        Outcome::Closed { code, reason } => handler.on_closed(code, reason).await,
        Outcome::Error(cause) => handler.on_error(cause).await,
    }

    drop(source);
    session.shutdown().await;
    debug!(connection = %id, "Transport driver terminated");
}

// ============================================================================
// Tests
// ============================================================================
