//! Message queues and queue factories.
//!
//! A queue is a plain bounded tokio channel of text messages. The caller
//! chooses the capacity, which is how back-pressure is tuned per side and
//! per connection: a slow reader of the inbound queue stalls the socket
//! reader, and a full outbound queue suspends the application's writer.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{Error, Result};

// ============================================================================
// Types
// ============================================================================

/// Both ends of a text message queue.
pub type Queue = (mpsc::Sender<String>, mpsc::Receiver<String>);

/// Zero-argument function producing a fresh queue for each connection.
pub type QueueFactory = Arc<dyn Fn() -> Queue + Send + Sync>;

// ============================================================================
// Constructors
// ============================================================================

/// Creates a bounded queue.
///
/// # Panics
///
/// Panics if `capacity` is zero, as [`mpsc::channel`] does.
#[inline]
#[must_use]
pub fn channel(capacity: usize) -> Queue {
    mpsc::channel(capacity)
}

/// Creates a factory that yields bounded queues of `capacity`.
///
/// # Errors
///
/// Returns [`Error::Config`] if `capacity` is zero.
pub fn factory(capacity: usize) -> Result<QueueFactory> {
    if capacity == 0 {
        return Err(Error::config("queue capacity must be non-zero"));
    }
    Ok(Arc::new(move || channel(capacity)))
}

// ============================================================================
// Tests
// ============================================================================
