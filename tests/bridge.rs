//! End-to-end tests over loopback sockets.
//!
//! Every test runs a real acceptor and a real client in the same runtime.
//! Set `RUST_LOG=ws_queues=trace` to see the session lifecycle.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing_subscriber::EnvFilter;
use ws_queues::{
    Acceptor, Client, Connection, Error, Rejection, SessionConfig, SessionError, Termination,
    queue,
};

// ============================================================================
// Helpers
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);

type Results<M> = mpsc::Receiver<ws_queues::Result<Connection<M>>>;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn within<F: Future>(what: &str, future: F) -> Result<F::Output> {
    timeout(WAIT, future)
        .await
        .with_context(|| format!("timed out waiting for {what}"))
}

async fn serve<M: Send + 'static>(acceptor: Acceptor<M>) -> Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(Arc::new(acceptor).serve(listener));
    Ok(addr)
}

async fn echo_server() -> Result<(SocketAddr, Results<()>)> {
    let (results_tx, results_rx) = mpsc::channel(8);
    let acceptor = Acceptor::new(results_tx, queue::factory(16)?, queue::factory(16)?);
    Ok((serve(acceptor).await?, results_rx))
}

fn running_client(config: SessionConfig) -> Client {
    let client = Client::new(config);
    client.start();
    client
}

async fn next_connection<M>(results: &mut Results<M>) -> Result<Connection<M>> {
    let result = within("server connection", results.recv())
        .await?
        .context("results queue closed")?;
    Ok(result?)
}

// ============================================================================
// Round trip and ordering
// ============================================================================

#[tokio::test]
async fn test_ping_round_trip() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let client = running_client(SessionConfig::default());

    let mut client_conn = client.connect_default(&format!("ws://{addr}/")).await?;
    let mut server_conn = next_connection(&mut results).await?;

    client_conn.send("ping").await?;
    assert_eq!(
        within("server inbound", server_conn.recv()).await?.as_deref(),
        Some("ping")
    );

    server_conn.send("ping").await?;
    assert_eq!(
        within("client inbound", client_conn.recv()).await?.as_deref(),
        Some("ping")
    );
    Ok(())
}

#[tokio::test]
async fn test_messages_arrive_in_order_and_unmodified() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let client = running_client(SessionConfig::default());

    let client_conn = client.connect_default(&format!("ws://{addr}")).await?;
    let mut server_conn = next_connection(&mut results).await?;

    let sent = ["m1", "m2", "m3", "ünïcödé ✓", ""];
    for text in sent {
        client_conn.send(text).await?;
    }

    for expected in sent {
        let received = within("server inbound", server_conn.recv()).await?;
        assert_eq!(received.as_deref(), Some(expected));
    }
    Ok(())
}

#[tokio::test]
async fn test_each_attempt_publishes_exactly_one_result() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let client = running_client(SessionConfig::default());
    let url = format!("ws://{addr}");

    let mut clients = Vec::new();
    for _ in 0..3 {
        clients.push(client.connect_default(&url).await?);
    }
    assert_eq!(client.connection_count(), 3);

    for _ in 0..3 {
        next_connection(&mut results).await?;
    }
    assert!(
        timeout(Duration::from_millis(200), results.recv()).await.is_err(),
        "no extra result expected"
    );
    Ok(())
}

// ============================================================================
// Closing
// ============================================================================

#[tokio::test]
async fn test_closing_outbound_closes_session_normally() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let client = running_client(SessionConfig::default());

    let mut client_conn = client.connect_default(&format!("ws://{addr}")).await?;
    let mut server_conn = next_connection(&mut results).await?;

    client_conn.close_write();
    client_conn.close_write();

    // Local inbound queue is closed.
    assert_eq!(within("client inbound close", client_conn.recv()).await?, None);

    // Remote observes a normal closure.
    let server_end = within("server termination", server_conn.closed()).await?;
    assert_eq!(server_end, Termination::closed(1000, ""));
    assert_eq!(within("server inbound close", server_conn.recv()).await?, None);

    let client_end = within("client termination", client_conn.closed()).await?;
    assert!(client_end.is_normal());

    // The result is stable across reads.
    assert_eq!(client_conn.process_result().get(), Some(client_end));
    Ok(())
}

#[tokio::test]
async fn test_local_close_with_full_inbound_queue_closes_normally() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let config = SessionConfig::builder()
        .close_timeout(Duration::from_secs(2))
        .build()?;
    let client = running_client(config);

    // Room for one message: the rest of the backlog stays in flight.
    let mut client_conn = client
        .connect(&format!("ws://{addr}"), queue::channel(1), queue::channel(4))
        .await?;
    let server_conn = next_connection(&mut results).await?;

    for text in ["a", "b", "c"] {
        server_conn.send(text).await?;
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    client_conn.close_write();

    let client_end = within("client termination", client_conn.closed()).await?;
    assert_eq!(client_end, Termination::closed(1000, ""));

    let server_end = within("server termination", server_conn.closed()).await?;
    assert_eq!(server_end, Termination::closed(1000, ""));

    let mut drained = Vec::new();
    while let Some(text) = within("client inbound drain", client_conn.recv()).await? {
        drained.push(text);
    }
    let drained: Vec<&str> = drained.iter().map(String::as_str).collect();
    assert_eq!(drained.first(), Some(&"a"));
    assert!(["a", "b", "c"].starts_with(&drained), "unexpected backlog {drained:?}");
    Ok(())
}

#[tokio::test]
async fn test_repeated_close_does_not_block_or_duplicate() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let client = running_client(SessionConfig::default());

    let client_conn = client.connect_default(&format!("ws://{addr}")).await?;
    let server_conn = next_connection(&mut results).await?;

    within("first close", server_conn.session().close(1000, "done")).await?;
    within("second close", server_conn.session().close(1011, "ignored")).await?;

    let client_end = within("client termination", client_conn.closed()).await?;
    assert_eq!(client_end, Termination::closed(1000, "done"));

    let server_end = within("server termination", server_conn.closed()).await?;
    assert_eq!(server_end.code(), 1000);
    assert_eq!(within("server termination again", server_conn.closed()).await?, server_end);
    Ok(())
}

#[tokio::test]
async fn test_client_stop_closes_sessions_going_away() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let client = running_client(SessionConfig::default());

    let client_conn = client.connect_default(&format!("ws://{addr}")).await?;
    let server_conn = next_connection(&mut results).await?;

    client.stop().await;
    assert!(!client.is_running());

    let server_end = within("server termination", server_conn.closed()).await?;
    assert_eq!(server_end.code(), 1001);
    within("client termination", client_conn.closed()).await?;

    let again = client.connect_default(&format!("ws://{addr}")).await;
    assert!(matches!(again, Err(Error::ClientNotRunning)));
    Ok(())
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_oversized_message_reports_same_cause_on_both_peers() -> Result<()> {
    init_tracing();
    let config = SessionConfig::builder().max_message_size(1024).build()?;

    let (results_tx, mut results) = mpsc::channel(8);
    let acceptor = Acceptor::new(results_tx, queue::factory(4)?, queue::factory(4)?)
        .config(config.clone());
    let addr = serve(acceptor).await?;
    let client = running_client(config);

    let client_conn = client.connect_default(&format!("ws://{addr}")).await?;
    let server_conn = next_connection(&mut results).await?;

    client_conn.send("x".repeat(4096)).await?;

    let server_end = within("server termination", server_conn.closed()).await?;
    let client_end = within("client termination", client_conn.closed()).await?;

    let cause = server_end.error().context("server should report an error")?;
    assert_eq!(cause.code, SessionError::MESSAGE_TOO_BIG);
    assert_eq!(server_end, client_end);
    Ok(())
}

#[tokio::test]
async fn test_preconnect_rejection_fails_client_and_publishes_nothing() -> Result<()> {
    init_tracing();
    let (results_tx, mut results) = mpsc::channel::<ws_queues::Result<Connection<String>>>(8);
    let acceptor = Acceptor::with_preconnect(
        results_tx,
        queue::factory(4)?,
        queue::factory(4)?,
        |request| match request.query_param("token") {
            Some(token) if token == "secret" => Ok(token),
            _ => Err(Rejection::unauthorized()),
        },
    );
    let addr = serve(acceptor).await?;
    let client = running_client(SessionConfig::default());

    let rejected = client.connect_default(&format!("ws://{addr}/?token=wrong")).await;
    assert!(matches!(rejected, Err(Error::HandshakeFailed { .. })));
    assert!(
        timeout(Duration::from_millis(200), results.recv()).await.is_err(),
        "rejected attempt must not publish"
    );

    let _accepted = client
        .connect_default(&format!("ws://{addr}/room?token=secret"))
        .await?;
    let server_conn = next_connection(&mut results).await?;
    assert_eq!(server_conn.preconnect_result().map(String::as_str), Some("secret"));

    let request = server_conn.request().context("request info")?;
    assert_eq!(request.path, "/room");
    assert_eq!(request.method, "GET");
    assert_eq!(request.server_port, addr.port());
    assert!(request.headers.contains("Sec-WebSocket-Key"));
    Ok(())
}

#[tokio::test]
async fn test_connection_parts_move_into_tasks() -> Result<()> {
    init_tracing();
    let (addr, mut results) = echo_server().await?;
    let client = running_client(SessionConfig::default());

    let client_conn = client.connect_default(&format!("ws://{addr}")).await?;
    let server_conn = next_connection(&mut results).await?;

    // Echo on the server using split parts.
    let parts = server_conn.into_parts();
    let mut read = parts.read;
    let write = parts.write.context("write queue open")?;
    tokio::spawn(async move {
        while let Some(text) = read.recv().await {
            if write.send(text.to_uppercase()).await.is_err() {
                break;
            }
        }
    });

    let mut client_parts = client_conn.into_parts();
    let client_write = client_parts.write.take().context("write queue open")?;
    client_write.send("hello".to_owned()).await?;
    assert_eq!(
        within("echo", client_parts.read.recv()).await?.as_deref(),
        Some("HELLO")
    );

    drop(client_write);
    let mut client_result = client_parts.process_result;
    let end = within("client termination", client_result.wait()).await?;
    assert!(end.is_some_and(|t| t.is_normal()));
    Ok(())
}
