#![cfg(unix)]
#![allow(clippy::unwrap_used)] // Integration tests use unwrap for brevity

//! End-to-end tests for a single session against real `/bin/sh` children.
//!
//! The remote side is the in-memory connector, so each test drives the
//! connection directly and observes what the child reads and prints.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use mcpipe::relay::{DiagnosticSink, RelayError, RelayRole};
use mcpipe::session::{Session, SessionConfig, SessionState, TerminationReason};
use mcpipe::subprocess::{ProcessCommand, ProcessManager};
use mcpipe_core::config::StderrPolicy;
use mcpipe_core::transport::memory::{MemoryConnector, MemoryPeer, MemorySink, MemorySource};
use mcpipe_core::{Connector, Endpoint};

/// Collects child stderr lines.
#[derive(Default)]
struct Collect(Mutex<Vec<String>>);

impl DiagnosticSink for Collect {
    fn emit(&self, _process_id: &str, line: &str) {
        self.0.lock().unwrap().push(line.to_string());
    }
}

impl Collect {
    fn lines(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn sh(script: &str) -> ProcessCommand {
    ProcessCommand::new("/bin/sh").with_args(["-c", script])
}

async fn connection() -> (MemoryPeer, MemorySource, MemorySink) {
    let connector = MemoryConnector::new();
    let peer = connector.accept();
    let (source, sink) = connector
        .connect(&Endpoint::parse("ws://memory/mcp").unwrap())
        .await
        .unwrap();
    (peer, source, sink)
}

fn session(
    command: ProcessCommand,
    stderr_policy: StderrPolicy,
    diagnostics: Arc<Collect>,
) -> Session {
    Session::new(
        ProcessManager::new(Duration::from_secs(2)),
        Arc::new(SessionConfig {
            command,
            stderr_policy,
            diagnostics,
        }),
    )
}

async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(10), future)
        .await
        .unwrap()
}

#[tokio::test]
async fn messages_round_trip_through_cat() {
    let (mut peer, source, sink) = connection().await;
    let (tx, rx) = watch::channel(false);
    let session = session(
        ProcessCommand::new("cat"),
        StderrPolicy::Fatal,
        Arc::default(),
    );
    let running = tokio::spawn(session.run(source, sink, rx));

    for message in ["{\"jsonrpc\":\"2.0\",\"id\":1}", "second", ""] {
        assert!(peer.send_text(message));
        assert_eq!(within(peer.recv()).await.as_deref(), Some(message));
    }
    assert!(peer.send_binary("bïnary".as_bytes()));
    assert_eq!(within(peer.recv()).await.as_deref(), Some("bïnary"));

    tx.send(true).unwrap();
    assert!(within(running).await.unwrap().is_shutdown());
    assert!(peer.is_closed());
}

#[tokio::test]
async fn inbound_message_gets_exactly_one_newline() {
    let (mut peer, source, sink) = connection().await;
    let (_tx, rx) = watch::channel(false);
    let session = session(
        sh("head -n 1 | od -An -tx1"),
        // Only stdout EOF should end this session.
        StderrPolicy::Ignore,
        Arc::default(),
    );
    let running = tokio::spawn(session.run(source, sink, rx));

    assert!(peer.send_text("hello"));
    let dump = within(peer.recv()).await.unwrap();
    assert_eq!(dump.trim(), "68 65 6c 6c 6f 0a");

    let reason = within(running).await.unwrap();
    assert!(matches!(
        reason,
        TerminationReason::Relay {
            role: RelayRole::Outbound,
            error: RelayError::ProcessExited,
        }
    ));
}

#[tokio::test]
async fn each_output_line_is_one_message() {
    let (mut peer, source, sink) = connection().await;
    let (_tx, rx) = watch::channel(false);
    let session = session(
        sh("printf 'first\\nsecond\\r\\nthird'"),
        // Only stdout EOF should end this session.
        StderrPolicy::Ignore,
        Arc::default(),
    );
    let running = tokio::spawn(session.run(source, sink, rx));

    assert_eq!(within(peer.recv()).await.as_deref(), Some("first"));
    assert_eq!(within(peer.recv()).await.as_deref(), Some("second"));
    assert_eq!(within(peer.recv()).await.as_deref(), Some("third"));
    within(running).await.unwrap();
    assert_eq!(within(peer.recv()).await, None);
}

#[tokio::test]
async fn stderr_goes_to_diagnostics_not_the_connection() {
    let (mut peer, source, sink) = connection().await;
    let (tx, rx) = watch::channel(false);
    let diagnostics = Arc::new(Collect::default());
    let session = session(
        sh("echo 'starting up' >&2; echo ready; cat"),
        StderrPolicy::Fatal,
        Arc::clone(&diagnostics),
    );
    let running = tokio::spawn(session.run(source, sink, rx));

    assert_eq!(within(peer.recv()).await.as_deref(), Some("ready"));
    within(async {
        while diagnostics.lines().is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert_eq!(diagnostics.lines(), vec!["starting up".to_string()]);

    tx.send(true).unwrap();
    within(running).await.unwrap();
}

#[tokio::test]
async fn closed_stderr_is_fatal_by_default() {
    let (_peer, source, sink) = connection().await;
    let (_tx, rx) = watch::channel(false);
    let session = session(sh("exec 2>&-; cat"), StderrPolicy::Fatal, Arc::default());

    let reason = within(session.run(source, sink, rx)).await;
    assert!(matches!(
        reason,
        TerminationReason::Relay {
            role: RelayRole::Diagnostic,
            error: RelayError::DiagnosticClosed,
        }
    ));
}

#[tokio::test]
async fn closed_stderr_can_be_ignored() {
    let (mut peer, source, sink) = connection().await;
    let (tx, rx) = watch::channel(false);
    let session = session(sh("exec 2>&-; cat"), StderrPolicy::Ignore, Arc::default());
    let running = tokio::spawn(session.run(source, sink, rx));

    assert!(peer.send_text("still alive"));
    assert_eq!(within(peer.recv()).await.as_deref(), Some("still alive"));

    tx.send(true).unwrap();
    assert!(within(running).await.unwrap().is_shutdown());
}

#[tokio::test]
async fn remote_disconnect_tears_down_once() {
    let (mut peer, source, sink) = connection().await;
    let (_tx, rx) = watch::channel(false);
    let mut session = session(ProcessCommand::new("cat"), StderrPolicy::Fatal, Arc::default());
    let mut states = session.observe();
    let running = tokio::spawn(session.run(source, sink, rx));

    assert_eq!(within(states.recv()).await, Some(SessionState::Active));
    peer.disconnect();

    let reason = within(running).await.unwrap();
    assert!(
        matches!(
            reason,
            TerminationReason::Relay {
                role: RelayRole::Inbound,
                error: RelayError::ConnectionLost(_),
            }
        ),
        "{reason:?}"
    );
    assert_eq!(within(states.recv()).await, Some(SessionState::Closing));
    assert_eq!(within(states.recv()).await, Some(SessionState::Closed));
    assert_eq!(within(states.recv()).await, None);
    assert!(peer.is_closed());
}
