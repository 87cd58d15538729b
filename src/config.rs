//! Session configuration.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use ws_queues::SessionConfig;
//!
//! # fn example() -> ws_queues::Result<()> {
//! let config = SessionConfig::builder()
//!     .max_message_size(1024 * 1024)
//!     .queue_capacity(256)
//!     .close_timeout(Duration::from_secs(5))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default largest accepted inbound message (64 KiB).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Default capacity of queues created by [`crate::queue::factory`] users.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Default time the pump waits for the close handshake after the
/// application closed its outbound queue.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time a client connect may take, handshake included.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// SessionConfig
// ============================================================================

/// Limits and timeouts applied to every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    max_message_size: usize,
    max_frame_size: usize,
    queue_capacity: usize,
    close_timeout: Duration,
    connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            max_frame_size: DEFAULT_MAX_MESSAGE_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Creates a builder starting from the defaults.
    #[inline]
    #[must_use]
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Largest inbound message, in bytes.
    #[inline]
    #[must_use]
    pub const fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Largest inbound frame, in bytes.
    #[inline]
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Capacity of queues created with [`crate::queue::channel`] defaults.
    #[inline]
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// Bound on waiting for the close handshake after a local close.
    #[inline]
    #[must_use]
    pub const fn close_timeout(&self) -> Duration {
        self.close_timeout
    }

    /// Bound on a client connect attempt.
    #[inline]
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Converts into the protocol engine's configuration.
    #[must_use]
    pub(crate) fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig::default()
            .max_message_size(Some(self.max_message_size))
            .max_frame_size(Some(self.max_frame_size))
    }
}

// ============================================================================
// SessionConfigBuilder
// ============================================================================

/// Builder for [`SessionConfig`].
#[derive(Debug, Default, Clone)]
pub struct SessionConfigBuilder {
    max_message_size: Option<usize>,
    max_frame_size: Option<usize>,
    queue_capacity: Option<usize>,
    close_timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl SessionConfigBuilder {
    /// Sets the largest accepted inbound message.
    ///
    /// Unless set explicitly, the frame limit follows this value.
    #[inline]
    #[must_use]
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = Some(bytes);
        self
    }

    /// Sets the largest accepted inbound frame.
    #[inline]
    #[must_use]
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = Some(bytes);
        self
    }

    /// Sets the default queue capacity.
    #[inline]
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    /// Sets how long the pump waits for the close handshake.
    #[inline]
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = Some(timeout);
        self
    }

    /// Sets the client connect timeout.
    #[inline]
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Builds the configuration with validation.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if a size or capacity is zero
    /// - [`Error::Config`] if the frame limit exceeds the message limit
    /// - [`Error::Config`] if a timeout is zero
    pub fn build(self) -> Result<SessionConfig> {
        let defaults = SessionConfig::default();

        let max_message_size = self.max_message_size.unwrap_or(defaults.max_message_size);
        let max_frame_size = self.max_frame_size.unwrap_or(max_message_size);
        let queue_capacity = self.queue_capacity.unwrap_or(defaults.queue_capacity);
        let close_timeout = self.close_timeout.unwrap_or(defaults.close_timeout);
        let connect_timeout = self.connect_timeout.unwrap_or(defaults.connect_timeout);

        if max_message_size == 0 || max_frame_size == 0 {
            return Err(Error::config("message and frame size limits must be non-zero"));
        }
        if max_frame_size > max_message_size {
            return Err(Error::config(format!(
                "max_frame_size ({max_frame_size}) exceeds max_message_size ({max_message_size})"
            )));
        }
        if queue_capacity == 0 {
            return Err(Error::config("queue_capacity must be non-zero"));
        }
        if close_timeout.is_zero() || connect_timeout.is_zero() {
            return Err(Error::config("timeouts must be non-zero"));
        }

        Ok(SessionConfig {
            max_message_size,
            max_frame_size,
            queue_capacity,
            close_timeout,
            connect_timeout,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
