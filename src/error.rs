//! Error types for the queue bridge.
//!
//! Two kinds of failure live here:
//!
//! - [`enum@Error`] is returned by fallible API calls (connecting, accepting,
//!   configuration). It is delivered once, to one caller.
//! - [`SessionError`] is the cause carried by a terminated session. It is
//!   `Clone + Eq` because every reader of a connection's completion signal
//!   observes the same value, and both peers of a failed session can compare
//!   causes.
//!
//! # Error Categories
//!
//! | Category | Variants |
//! |----------|----------|
//! | Configuration | [`Error::Config`], [`Error::InvalidUrl`] |
//! | Establishment | [`Error::ClientNotRunning`], [`Error::HandshakeFailed`], [`Error::ConnectTimeout`] |
//! | Session | [`Error::Session`], [`Error::ResultsClosed`] |
//! | External | [`Error::Io`] |

// ============================================================================
// Imports
// ============================================================================

use std::io::Error as IoError;
use std::result::Result as StdResult;

use thiserror::Error;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;

// ============================================================================
// Result Alias
// ============================================================================

/// Result type alias using crate [`enum@Error`].
pub type Result<T> = StdResult<T, Error>;

// ============================================================================
// SessionError
// ============================================================================

/// Cause of an abnormal session termination.
///
/// Carries the WebSocket close code that classifies the failure and a
/// human-readable reason. A message that exceeds the receiver's size limit,
/// for instance, is reported as code `1009` on both peers with the same
/// reason text.
#[derive(Error, Debug, Clone, PartialEq, Eq, Hash)]
#[error("Session error {code}: {reason}")]
pub struct SessionError {
    /// WebSocket close code classifying the failure.
    pub code: u16,
    /// Description of the failure.
    pub reason: String,
}

impl SessionError {
    /// Close code used when the session ended without a close handshake.
    pub const ABNORMAL: u16 = 1006;

    /// Close code used when a message exceeded the size limit.
    pub const MESSAGE_TOO_BIG: u16 = 1009;

    /// Creates a session error with an explicit close code.
    #[inline]
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }

    /// Creates an abnormal-closure (`1006`) session error.
    #[inline]
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(Self::ABNORMAL, reason)
    }

    /// Returns the close code as a tungstenite [`CloseCode`].
    #[inline]
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        CloseCode::from(self.code)
    }

    /// Returns `true` if this error was caused by an oversized message.
    #[inline]
    #[must_use]
    pub fn is_message_too_big(&self) -> bool {
        self.code == Self::MESSAGE_TOO_BIG
    }
}

// ============================================================================
// Error Enum
// ============================================================================

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration error.
    ///
    /// Returned when a [`SessionConfig`](crate::SessionConfig) is invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration error.
        message: String,
    },

    /// Target address is not a usable WebSocket URL.
    #[error("Invalid WebSocket URL '{url}': {message}")]
    InvalidUrl {
        /// The rejected address.
        url: String,
        /// Why it was rejected.
        message: String,
    },

    // ========================================================================
    // Establishment Errors
    // ========================================================================
    /// Connect was attempted on a client that is not running.
    ///
    /// This is a precondition failure and is never retried.
    #[error("Client is not running")]
    ClientNotRunning,

    /// The opening handshake did not complete.
    ///
    /// Covers refused upgrades (including preconnect rejections observed by
    /// the initiating side) and transport failures before a session existed.
    #[error("Handshake failed: {message}")]
    HandshakeFailed {
        /// Description of the handshake failure.
        message: String,
    },

    /// Connection attempt did not complete in time.
    #[error("Connect timeout after {timeout_ms}ms")]
    ConnectTimeout {
        /// Milliseconds waited before timeout.
        timeout_ms: u64,
    },

    // ========================================================================
    // Session Errors
    // ========================================================================
    /// The session failed before it was ever established.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// The connection-result destination went away before a result was
    /// published.
    #[error("Connection result channel closed")]
    ResultsClosed,

    // ========================================================================
    // External Errors
    // ========================================================================
    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] IoError),
}

// ============================================================================
// Error Constructors
// ============================================================================

impl Error {
    /// Creates a configuration error.
    #[inline]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an invalid URL error.
    #[inline]
    pub fn invalid_url(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a handshake failure error.
    #[inline]
    pub fn handshake_failed(message: impl Into<String>) -> Self {
        Self::HandshakeFailed {
            message: message.into(),
        }
    }

    /// Creates a connect timeout error.
    #[inline]
    pub fn connect_timeout(timeout_ms: u64) -> Self {
        Self::ConnectTimeout { timeout_ms }
    }
}

// ============================================================================
// Error Predicates
// ============================================================================

impl Error {
    /// Returns `true` if this is a timeout error.
    #[inline]
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::ConnectTimeout { .. })
    }

    /// Returns `true` if the connection attempt failed before a session
    /// was established.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::HandshakeFailed { .. }
                | Self::ConnectTimeout { .. }
                | Self::Session(_)
                | Self::Io(_)
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::ErrorKind;

    #[test]
    fn test_error_display() {
        let err = Error::handshake_failed("HTTP error: 403 Forbidden");
        assert_eq!(
            err.to_string(),
            "Handshake failed: HTTP error: 403 Forbidden"
        );
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::new(1009, "Message too long");
        assert_eq!(err.to_string(), "Session error 1009: Message too long");
        assert!(err.is_message_too_big());
        assert_eq!(err.close_code(), CloseCode::Size);
    }

    #[test]
    fn test_session_error_is_transparent() {
        let err: Error = SessionError::abnormal("reset").into();
        assert_eq!(err.to_string(), "Session error 1006: reset");
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_is_timeout() {
        assert!(Error::connect_timeout(500).is_timeout());
        assert!(!Error::ClientNotRunning.is_timeout());
    }

    #[test]
    fn test_is_connection_error() {
        assert!(Error::handshake_failed("x").is_connection_error());
        assert!(!Error::config("x").is_connection_error());
        assert!(!Error::ClientNotRunning.is_connection_error());
    }

    #[test]
    fn test_from_io_error() {
        let io_err = IoError::new(ErrorKind::ConnectionRefused, "refused");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
