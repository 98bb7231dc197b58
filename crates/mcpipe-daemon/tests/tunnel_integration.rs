#![cfg(unix)]
#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end test of the supervisor against a local WebSocket server.
//!
//! The child is `cat`, so every message the server sends should come
//! straight back. Dropping the server connection forces a reconnect.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;

use mcpipe::relay::DiagnosticSink;
use mcpipe::session::SessionConfig;
use mcpipe::subprocess::{ProcessCommand, ProcessManager};
use mcpipe::tunnel::{ConnectionSupervisor, Keepalive, ReconnectPolicy, WebSocketConnector};
use mcpipe_core::Endpoint;
use mcpipe_core::config::StderrPolicy;

struct Discard;

impl DiagnosticSink for Discard {
    fn emit(&self, _process_id: &str, _line: &str) {}
}

async fn echo_once(listener: &TcpListener, text: &str) {
    let (tcp, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
    ws.send(Message::text(text.to_owned())).await.unwrap();
    loop {
        match ws.next().await.unwrap().unwrap() {
            Message::Text(reply) => {
                assert_eq!(reply.as_str(), text);
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
    // Dropping the stream without a close frame simulates a network blip.
}

#[tokio::test]
async fn relays_and_reconnects_after_drop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = Endpoint::parse(&format!("ws://{addr}/mcp/?token=secret")).unwrap();

    let supervisor = Arc::new(ConnectionSupervisor::new(
        WebSocketConnector::new(Some(Keepalive {
            interval: Duration::from_secs(20),
            timeout: Duration::from_secs(20),
        })),
        endpoint,
        ReconnectPolicy {
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            ..ReconnectPolicy::default()
        },
        ProcessManager::new(Duration::from_secs(2)),
        SessionConfig {
            command: ProcessCommand::new("cat"),
            stderr_policy: StderrPolicy::Fatal,
            diagnostics: Arc::new(Discard),
        },
    ));
    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run(rx).await }
    });

    tokio::time::timeout(Duration::from_secs(10), async {
        echo_once(&listener, "{\"id\":1}").await;
        echo_once(&listener, "{\"id\":2}").await;
    })
    .await
    .unwrap();

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(10), running)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unreachable_endpoint_retries_until_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let supervisor = Arc::new(ConnectionSupervisor::new(
        WebSocketConnector::default(),
        Endpoint::parse(&format!("ws://{addr}/mcp")).unwrap(),
        ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(20),
            ..ReconnectPolicy::default()
        },
        ProcessManager::default(),
        SessionConfig {
            command: ProcessCommand::new("cat"),
            stderr_policy: StderrPolicy::Fatal,
            diagnostics: Arc::new(Discard),
        },
    ));
    let (tx, rx) = watch::channel(false);
    let running = tokio::spawn({
        let supervisor = Arc::clone(&supervisor);
        async move { supervisor.run(rx).await }
    });

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!running.is_finished());

    tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .unwrap()
        .unwrap();
}
