//! Initiate side of connection establishment.
//!
//! # Connect Race
//!
//! The transport's handshake outcome and the event adapter's published
//! result race each other. A handshake failure wins only if the adapter has
//! not published yet; otherwise whatever the adapter published is the
//! result. After the race is decided the handshake outcome is discarded.
//!
//! ```text
//! connect(url) ──► spawn transport task ──► handshake ──► drive session
//!       │                                     │              │
//!       │◄──────── handshake outcome ─────────┘              │
//!       │◄──────── adapter result (on_connected) ────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::MaybeTlsStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::connection::adapter::{Destination, EventAdapter};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::queue::{self, Queue};
use crate::transport::{Session, driver};

// ============================================================================
// Constants
// ============================================================================

/// Close code sent to live sessions when the client stops.
const GOING_AWAY: u16 = 1001;

// ============================================================================
// Types
// ============================================================================

/// Live sessions by connection ID.
type SessionMap = FxHashMap<ConnectionId, Session>;

// ============================================================================
// Client
// ============================================================================

/// WebSocket client producing queue-backed connections.
///
/// The client must be [started](Client::start) before it can connect.
///
/// # Example
///
/// ```no_run
/// use ws_queues::{Client, queue};
///
/// # async fn example() -> ws_queues::Result<()> {
/// let client = Client::default();
/// client.start();
///
/// let mut connection = client
///     .connect("ws://127.0.0.1:9000/chat", queue::channel(16), queue::channel(16))
///     .await?;
///
/// connection.send("ping").await.ok();
/// let reply = connection.recv().await;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    config: SessionConfig,
    running: AtomicBool,
    sessions: Arc<Mutex<SessionMap>>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Client {
    /// Creates a stopped client.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            running: AtomicBool::new(false),
            sessions: Arc::new(Mutex::new(SessionMap::default())),
        }
    }

    /// Returns the session configuration.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Puts the client into the running state.
    pub fn start(&self) {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("Client started");
        }
    }

    /// Returns `true` if the client accepts connect calls.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns the number of live sessions.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Stops the client and closes every live session with `1001`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Client stopping");

        let sessions: Vec<Session> = self.sessions.lock().drain().map(|(_, s)| s).collect();
        for session in sessions {
            session.close(GOING_AWAY, "Client stopped").await;
            debug!(connection = %session.id(), "Session closed during stop");
        }
    }

    /// Connects using default-capacity queues from the configuration.
    ///
    /// # Errors
    ///
    /// See [`Client::connect`].
    pub async fn connect_default(&self, url: &str) -> Result<Connection> {
        let capacity = self.config.queue_capacity();
        self.connect(url, queue::channel(capacity), queue::channel(capacity))
            .await
    }

    /// Connects to `url`, bridging the session onto the given queues.
    ///
    /// # Arguments
    ///
    /// * `url` - `ws://` or `wss://` address
    /// * `inbound` - Queue receiving messages from the peer
    /// * `outbound` - Queue whose messages are sent to the peer
    ///
    /// # Errors
    ///
    /// - [`Error::ClientNotRunning`] if the client is not started
    /// - [`Error::InvalidUrl`] if `url` is not a WebSocket URL
    /// - [`Error::HandshakeFailed`] if the upgrade was refused or failed
    /// - [`Error::ConnectTimeout`] if no result arrived in time
    pub async fn connect(&self, url: &str, inbound: Queue, outbound: Queue) -> Result<Connection> {
        if !self.is_running() {
            return Err(Error::ClientNotRunning);
        }
        let target = parse_ws_url(url)?;

        let id = ConnectionId::next();
        let (result_tx, result_rx) = oneshot::channel();
        let (handshake_tx, handshake_rx) = oneshot::channel::<Result<()>>();

        let adapter = EventAdapter::new(
            id,
            Destination::single(result_tx),
            inbound,
            outbound,
            None,
            None,
            self.config.close_timeout(),
        );

        debug!(connection = %id, url = %target, "Connecting");

        let config = self.config.websocket_config();
        tokio::spawn(async move {
            match tokio_tungstenite::connect_async_with_config(target.as_str(), Some(config), false)
                .await
            {
                Ok((stream, _response)) => {
                    let _ = handshake_tx.send(Ok(()));
                    let remote_addr = peer_addr(stream.get_ref());
                    driver::drive(stream, id, remote_addr, &adapter).await;
                }
                Err(e) => {
                    debug!(connection = %id, error = %e, "Handshake failed");
                    let _ = handshake_tx.send(Err(Error::handshake_failed(e.to_string())));
                }
            }
        });

        let connect_timeout = self.config.connect_timeout();
        let connection = timeout(connect_timeout, settle(result_rx, handshake_rx))
            .await
            .map_err(|_| Error::connect_timeout(connect_timeout.as_millis() as u64))??;

        self.track(&connection).await;
        Ok(connection)
    }

    /// Registers a session until its pump terminates.
    ///
    /// A connect that completes after [`Client::stop`] is closed right away.
    async fn track(&self, connection: &Connection) {
        let id = connection.id();
        self.sessions.lock().insert(id, connection.session().clone());

        if !self.is_running() {
            let stale = self.sessions.lock().remove(&id);
            if let Some(session) = stale {
                debug!(connection = %id, "Client stopped during connect");
                session.close(GOING_AWAY, "Client stopped").await;
            }
            return;
        }

        let sessions = Arc::clone(&self.sessions);
        let mut process_result = connection.process_result();
        tokio::spawn(async move {
            let _ = process_result.wait().await;
            sessions.lock().remove(&id);
        });
    }
}

/// Decides the connect result.
///
/// A published result always wins. A handshake failure wins only while
/// nothing was published. If the adapter was dropped unpublished, the
/// handshake outcome explains why.
async fn settle(
    mut result_rx: oneshot::Receiver<Result<Connection>>,
    mut handshake_rx: oneshot::Receiver<Result<()>>,
) -> Result<Connection> {
    tokio::select! {
        biased;

        published = &mut result_rx => {
            return match published {
                Ok(result) => result,
                Err(_) => match handshake_rx.await {
                    Ok(Err(e)) => Err(e),
                    _ => Err(Error::ResultsClosed),
                },
            };
        }

        handshake = &mut handshake_rx => {
            if let Ok(Err(e)) = handshake {
                return Err(e);
            }
        }
    }
    result_rx.await.map_err(|_| Error::ResultsClosed)?
}

/// Validates that `url` is a `ws`/`wss` URL with a host.
fn parse_ws_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url).map_err(|e| Error::invalid_url(url, e.to_string()))?;

    match parsed.scheme() {
        "ws" | "wss" => {}
        other => {
            return Err(Error::invalid_url(url, format!("unsupported scheme '{other}'")));
        }
    }
    if parsed.host_str().is_none() {
        return Err(Error::invalid_url(url, "missing host"));
    }

    Ok(parsed)
}

fn peer_addr(stream: &MaybeTlsStream<tokio::net::TcpStream>) -> Option<SocketAddr> {
    match stream {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => {
            warn!("Peer address unavailable for this stream type");
            None
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use futures_util::{SinkExt, sink};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    use crate::signal::Signal;
    use crate::transport::session::WsSink;

    fn detached_connection() -> Connection {
        let (faults_tx, _faults_rx) = mpsc::unbounded_channel();
        let sink: WsSink =
            Box::pin(sink::drain::<Message>().sink_map_err(|never| -> WsError { match never {} }));
        let session = Session::new(ConnectionId::next(), None, sink, faults_tx);
        let (_inbound_tx, read) = queue::channel(1);
        let (write, _outbound_rx) = queue::channel(1);
        Connection::new(session, read, write, Signal::new().subscribe(), None, None)
    }

    #[tokio::test]
    async fn test_connect_requires_running_client() {
        let client = Client::default();
        let result = client
            .connect("ws://127.0.0.1:1", queue::channel(1), queue::channel(1))
            .await;
        assert!(matches!(result, Err(Error::ClientNotRunning)));
    }

    #[tokio::test]
    async fn test_start_stop() {
        let client = Client::default();
        assert!(!client.is_running());
        client.start();
        assert!(client.is_running());
        client.stop().await;
        assert!(!client.is_running());
        assert_eq!(client.connection_count(), 0);
    }

    #[test]
    fn test_parse_ws_url() {
        assert!(parse_ws_url("ws://localhost:9000/chat").is_ok());
        assert!(parse_ws_url("wss://example.com").is_ok());
        assert!(matches!(
            parse_ws_url("http://example.com"),
            Err(Error::InvalidUrl { .. })
        ));
        assert!(parse_ws_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_refused_connection_is_handshake_failure() {
        // Bind then drop to obtain a port with nothing listening.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);

        let client = Client::default();
        client.start();
        let result = client
            .connect(&format!("ws://{addr}"), queue::channel(1), queue::channel(1))
            .await;

        assert!(matches!(result, Err(Error::HandshakeFailed { .. })));
        assert_eq!(client.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        // Accepts TCP but never answers the upgrade.
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let holder = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.expect("accept");
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let config = SessionConfig::builder()
            .connect_timeout(Duration::from_millis(100))
            .build()
            .expect("valid");
        let client = Client::new(config);
        client.start();

        let result = client
            .connect(&format!("ws://{addr}"), queue::channel(1), queue::channel(1))
            .await;
        assert!(matches!(result, Err(ref e) if e.is_timeout()));
        holder.abort();
    }

    #[tokio::test]
    async fn test_settle_dropped_cell_reports_handshake_failure() {
        let (result_tx, result_rx) = oneshot::channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        drop(result_tx);
        let _ = handshake_tx.send(Err(Error::handshake_failed("HTTP error: 401 Unauthorized")));

        let result = settle(result_rx, handshake_rx).await;
        assert!(matches!(result, Err(Error::HandshakeFailed { .. })));
    }

    #[tokio::test]
    async fn test_settle_without_any_outcome_is_results_closed() {
        let (result_tx, result_rx) = oneshot::channel();
        let (handshake_tx, handshake_rx) = oneshot::channel::<Result<()>>();
        drop(result_tx);
        drop(handshake_tx);

        let result = settle(result_rx, handshake_rx).await;
        assert!(matches!(result, Err(Error::ResultsClosed)));
    }

    #[tokio::test]
    async fn test_settle_published_result_wins() {
        let (result_tx, result_rx) = oneshot::channel();
        let (handshake_tx, handshake_rx) = oneshot::channel();
        let connection = detached_connection();
        let id = connection.id();
        let _ = result_tx.send(Ok(connection));
        let _ = handshake_tx.send(Err(Error::handshake_failed("late")));

        let result = settle(result_rx, handshake_rx).await;
        assert_eq!(result.map(|c| c.id()).ok(), Some(id));
    }

    #[tokio::test]
    async fn test_connect_completing_after_stop_is_closed() {
        let client = Client::default();
        let connection = detached_connection();

        client.track(&connection).await;

        assert_eq!(client.connection_count(), 0);
        assert!(connection.session().is_closing());
    }
}
