//! WebSocket transport layer.
//!
//! This module is the only place that touches `tokio-tungstenite` streams.
//! Everything above it sees a [`Session`] handle and the four callbacks of
//! [`SessionHandler`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   on_connected / on_message   ┌──────────────────┐
//! │   driver     │ ────────────────────────────► │  SessionHandler  │
//! │ (read half)  │   on_error / on_closed        │  (per session)   │
//! └──────┬───────┘                               └──────────────────┘
//!        │ write faults
//! ┌──────┴───────┐
//! │   Session    │ ◄── send_text (pump only), close (anyone)
//! │ (write half) │
//! └──────────────┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `driver` | Read loop and callback dispatch |
//! | `session` | Cloneable write/close handle |

// ============================================================================
// Submodules
// ============================================================================

/// Read loop and callback dispatch.
pub(crate) mod driver;

/// Cloneable write/close handle.
pub mod session;

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::SessionError;

// ============================================================================
// Re-exports
// ============================================================================

pub use session::Session;

// ============================================================================
// SessionHandler
// ============================================================================

/// Callbacks invoked by the transport for one session.
///
/// Implementations are created per session, never shared between sessions.
/// Every callback must tolerate running concurrently with the others, and
/// `on_error`/`on_closed` may both fire for the same session.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// The session is established and ready for traffic.
    async fn on_connected(&self, session: Session);

    /// A text message arrived. Awaiting here back-pressures the socket.
    async fn on_message(&self, text: String);

    /// The session failed, or could not be established at all.
    async fn on_error(&self, cause: SessionError);

    /// The session closed with `code` and `reason`.
    async fn on_closed(&self, code: u16, reason: String);
}
