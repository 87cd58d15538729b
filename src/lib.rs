//! ws-queues - WebSocket sessions as message queues.
//!
//! This library bridges callback-driven WebSocket sessions to a queue-based
//! concurrency model. Each established session is exposed as a
//! [`Connection`]: an inbound queue, an outbound queue and a completion
//! signal that fires exactly once. Application code never sees transport
//! callbacks.
//!
//! # Architecture
//!
//! - **Transport**: `tokio-tungstenite` streams, driven by a read loop that
//!   calls a per-session [`SessionHandler`]
//! - **Event adapter**: the handler implementation that feeds queues and
//!   the stop token
//! - **Outbound pump**: the only writer to a session; the stop token always
//!   wins over a pending write
//! - **Establishment**: [`Acceptor`] for the accept side (with an optional
//!   preconnect hook), [`Client`] for the initiate side
//!
//! # Quick Start
//!
//! ```no_run
//! use ws_queues::{Client, Result, queue};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::default();
//!     client.start();
//!
//!     let mut connection = client
//!         .connect("ws://127.0.0.1:9000", queue::channel(16), queue::channel(16))
//!         .await?;
//!
//!     connection.send("ping").await.ok();
//!     if let Some(reply) = connection.recv().await {
//!         println!("received: {reply}");
//!     }
//!
//!     connection.close_write();
//!     println!("terminated: {:?}", connection.closed().await);
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | Initiate side |
//! | [`config`] | Session limits and timeouts |
//! | [`connection`] | Connection record and termination values |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`identifiers`] | Connection IDs |
//! | [`queue`] | Queue type and factories |
//! | [`request`] | Normalized upgrade request and rejections |
//! | [`server`] | Accept side |
//! | [`signal`] | Single-fire result cells |
//! | [`transport`] | WebSocket session driver and handle |

// ============================================================================
// Modules
// ============================================================================

/// Initiate side of connection establishment.
pub mod client;

/// Session limits and timeouts.
pub mod config;

/// Connection record, outbound pump and event adapter.
pub mod connection;

/// Error types and result aliases.
pub mod error;

/// Type-safe identifiers.
pub mod identifiers;

/// Queue type and factories.
pub mod queue;

/// Normalized upgrade request, headers and rejections.
pub mod request;

/// Accept side of connection establishment.
pub mod server;

/// Single-fire result cells.
pub mod signal;

/// WebSocket transport layer.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

pub use client::Client;
pub use config::{SessionConfig, SessionConfigBuilder};
pub use connection::{Connection, ConnectionParts, Termination};
pub use error::{Error, Result, SessionError};
pub use identifiers::ConnectionId;
pub use queue::{Queue, QueueFactory};
pub use request::{Headers, Rejection, RequestInfo};
pub use server::{Acceptor, Preconnect, ResultsSender};
pub use signal::{Signal, SignalReceiver};
pub use transport::{Session, SessionHandler};

// Protocol types used in public signatures.
pub use tokio_tungstenite::tungstenite::http::StatusCode;
