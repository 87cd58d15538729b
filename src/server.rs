//! Accept side of connection establishment.
//!
//! An [`Acceptor`] upgrades incoming TCP streams to WebSocket sessions and
//! publishes every established [`Connection`] onto one shared results
//! queue.
//!
//! # Accept Flow
//!
//! 1. The upgrade request is normalized into a [`RequestInfo`]
//! 2. The preconnect hook authorizes it (default: accept everything)
//! 3. A rejection becomes the HTTP response; nothing else happens
//! 4. Otherwise fresh queues are made by the caller's factories
//! 5. The session is driven until it terminates
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//! use tokio::sync::mpsc;
//! use ws_queues::{Acceptor, queue};
//!
//! # async fn example() -> ws_queues::Result<()> {
//! let (results_tx, mut results_rx) = mpsc::channel(16);
//! let acceptor = Arc::new(Acceptor::new(results_tx, queue::factory(64)?, queue::factory(64)?));
//!
//! let listener = TcpListener::bind("127.0.0.1:0").await?;
//! tokio::spawn(acceptor.serve(listener));
//!
//! while let Some(Ok(mut connection)) = results_rx.recv().await {
//!     tokio::spawn(async move {
//!         while let Some(text) = connection.recv().await {
//!             let _ = connection.send(text).await;
//!         }
//!     });
//! }
//! # Ok(())
//! # }
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::net::SocketAddr;
use std::result::Result as StdResult;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::connection::Connection;
use crate::connection::adapter::{Destination, EventAdapter};
use crate::error::{Error, Result};
use crate::identifiers::ConnectionId;
use crate::queue::QueueFactory;
use crate::request::{Rejection, RequestInfo};
use crate::transport::driver;

// ============================================================================
// Types
// ============================================================================

/// Authorization hook run against each upgrade request.
///
/// `Ok(value)` accepts the connection and attaches `value` as its
/// preconnect result. `Err(rejection)` refuses the upgrade.
pub type Preconnect<M> = Arc<dyn Fn(&RequestInfo) -> StdResult<M, Rejection> + Send + Sync>;

/// Sending half of the shared connection-results queue.
pub type ResultsSender<M> = mpsc::Sender<Result<Connection<M>>>;

/// Outcome of the preconnect hook, recorded during the handshake.
type Decision<M> = StdResult<(M, RequestInfo), Rejection>;

// ============================================================================
// Acceptor
// ============================================================================

/// Server-side connection acceptor.
///
/// One acceptor serves any number of connections; all of them are
/// published onto the same results queue.
pub struct Acceptor<M = ()> {
    results: ResultsSender<M>,
    inbound: QueueFactory,
    outbound: QueueFactory,
    preconnect: Preconnect<M>,
    config: SessionConfig,
}

impl Acceptor<()> {
    /// Creates an acceptor that accepts every upgrade request.
    ///
    /// # Arguments
    ///
    /// * `results` - Shared queue receiving one result per accepted connection
    /// * `inbound` - Factory for each connection's inbound queue
    /// * `outbound` - Factory for each connection's outbound queue
    #[must_use]
    pub fn new(results: ResultsSender<()>, inbound: QueueFactory, outbound: QueueFactory) -> Self {
        Self::with_preconnect(results, inbound, outbound, |_| Ok(()))
    }
}

impl<M: Send + 'static> Acceptor<M> {
    /// Creates an acceptor guarded by a preconnect hook.
    #[must_use]
    pub fn with_preconnect<F>(
        results: ResultsSender<M>,
        inbound: QueueFactory,
        outbound: QueueFactory,
        preconnect: F,
    ) -> Self
    where
        F: Fn(&RequestInfo) -> StdResult<M, Rejection> + Send + Sync + 'static,
    {
        Self {
            results,
            inbound,
            outbound,
            preconnect: Arc::new(preconnect),
            config: SessionConfig::default(),
        }
    }

    /// Replaces the session configuration.
    #[inline]
    #[must_use]
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Returns the session configuration.
    #[inline]
    #[must_use]
    pub fn session_config(&self) -> &SessionConfig {
        &self.config
    }

    /// Upgrades one TCP stream and drives the session to completion.
    ///
    /// Returns once the session has terminated or the upgrade was refused.
    ///
    /// # Errors
    ///
    /// - [`Error::Io`] if the stream's addresses cannot be read
    /// - [`Error::HandshakeFailed`] if the request was not a valid upgrade
    ///   (the preconnect hook never ran, so nothing is published)
    pub async fn accept(&self, stream: TcpStream) -> Result<()> {
        let local_addr = stream.local_addr()?;
        let remote_addr = stream.peer_addr()?;
        let id = ConnectionId::next();

        debug!(connection = %id, %remote_addr, "Upgrading TCP stream");

        let mut decision: Option<Decision<M>> = None;
        let callback = |request: &Request, response: Response| {
            let info = RequestInfo::from_handshake(request, local_addr, remote_addr);
            match (self.preconnect)(&info) {
                Ok(metadata) => {
                    decision = Some(Ok((metadata, info)));
                    Ok(response)
                }
                Err(rejection) => {
                    decision = Some(Err(rejection.clone()));
                    Err(rejection.into_response())
                }
            }
        };

        let handshake = tokio_tungstenite::accept_hdr_async_with_config(
            stream,
            callback,
            Some(self.config.websocket_config()),
        )
        .await;

        self.settle(id, remote_addr, handshake, decision).await
    }

    /// Acts on the handshake outcome and the preconnect decision.
    ///
    /// Publishes at most one result: a driven session, or a failure when the
    /// upgrade broke after the hook accepted it.
    async fn settle<S>(
        &self,
        id: ConnectionId,
        remote_addr: SocketAddr,
        handshake: StdResult<WebSocketStream<S>, WsError>,
        decision: Option<Decision<M>>,
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        match (handshake, decision) {
            (_, Some(Err(rejection))) => {
                info!(connection = %id, %remote_addr, %rejection, "Upgrade rejected by preconnect");
                Ok(())
            }

            (Ok(stream), Some(Ok((metadata, info)))) => {
                let adapter = self.adapter(id, metadata, info);
                driver::drive(stream, id, Some(remote_addr), &adapter).await;
                Ok(())
            }

            (Err(e), Some(Ok((metadata, info)))) => {
                let adapter = self.adapter(id, metadata, info);
                adapter
                    .fail(Error::handshake_failed(format!("WebSocket upgrade failed: {e}")))
                    .await;
                Ok(())
            }

            (Err(e), None) => {
                debug!(connection = %id, %remote_addr, error = %e, "Invalid upgrade request");
                Err(Error::handshake_failed(format!("WebSocket upgrade failed: {e}")))
            }

            (Ok(_), None) => Err(Error::handshake_failed(
                "upgrade completed without a preconnect decision",
            )),
        }
    }

    /// Accepts connections from `listener` until the results queue closes.
    ///
    /// Each stream is handled on its own task. Accept errors are logged and
    /// the loop continues.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        let local_addr = listener.local_addr().ok();
        info!(?local_addr, "Acceptor serving");

        loop {
            tokio::select! {
                _ = self.results.closed() => {
                    debug!(?local_addr, "Results queue closed, acceptor stopping");
                    break;
                }

                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.spawn_accept(stream, addr),
                        Err(e) => error!(error = %e, "Accept failed"),
                    }
                }
            }
        }
    }

    fn spawn_accept(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let acceptor = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = acceptor.accept(stream).await {
                warn!(error = %e, ?addr, "Connection handling failed");
            }
        });
    }

    fn adapter(&self, id: ConnectionId, metadata: M, info: RequestInfo) -> EventAdapter<M> {
        EventAdapter::new(
            id,
            Destination::Shared(self.results.clone()),
            (self.inbound)(),
            (self.outbound)(),
            Some(metadata),
            Some(info),
            self.config.close_timeout(),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================
