//! In-memory connector for tests.
//!
//! Each call to [`MemoryConnector::connect`] consumes the next scripted
//! outcome: a refusal, or a live connection whose remote side is driven
//! through a [`MemoryPeer`]. Once the script is exhausted every attempt is
//! refused.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use super::{ConnectionError, Connector, Endpoint, Frame, MessageSink, MessageSource};

enum Scripted {
    Refuse,
    Accept(MemorySource, MemorySink),
}

#[derive(Default)]
struct Script {
    outcomes: VecDeque<Scripted>,
    attempts: Vec<Instant>,
}

/// Scripted connector; clones share the same script.
#[derive(Clone, Default)]
pub struct MemoryConnector {
    script: Arc<Mutex<Script>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `count` refused connection attempts.
    pub fn refuse(&self, count: usize) {
        let mut script = self.lock();
        for _ in 0..count {
            script.outcomes.push_back(Scripted::Refuse);
        }
    }

    /// Queue an accepted connection and return its remote side.
    pub fn accept(&self) -> MemoryPeer {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let closed_tx = Arc::new(closed_tx);

        let source = MemorySource {
            rx: inbound_rx,
            closed: closed_tx.subscribe(),
        };
        let sink = MemorySink {
            tx: Some(outbound_tx),
            closed: Arc::clone(&closed_tx),
        };
        self.lock()
            .outcomes
            .push_back(Scripted::Accept(source, sink));

        MemoryPeer {
            tx: Some(inbound_tx),
            rx: outbound_rx,
            closed: closed_rx,
        }
    }

    /// Instants at which `connect` was called, in order.
    pub fn attempts(&self) -> Vec<Instant> {
        self.lock().attempts.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Connector for MemoryConnector {
    type Source = MemorySource;
    type Sink = MemorySink;

    async fn connect(
        &self,
        _endpoint: &Endpoint,
    ) -> Result<(MemorySource, MemorySink), ConnectionError> {
        let next = {
            let mut script = self.lock();
            script.attempts.push(Instant::now());
            script.outcomes.pop_front()
        };
        match next {
            Some(Scripted::Accept(source, sink)) => Ok((source, sink)),
            Some(Scripted::Refuse) => Err(ConnectionError::Open("connection refused".into())),
            None => Err(ConnectionError::Open("no scripted connection".into())),
        }
    }
}

/// Read half handed to the relay.
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Frame>,
    closed: watch::Receiver<bool>,
}

impl MessageSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Frame>, ConnectionError> {
        if *self.closed.borrow() {
            return Ok(None);
        }
        tokio::select! {
            frame = self.rx.recv() => Ok(frame),
            _ = self.closed.wait_for(|closed| *closed) => Ok(None),
        }
    }
}

/// Write half handed to the relay.
pub struct MemorySink {
    tx: Option<mpsc::UnboundedSender<String>>,
    closed: Arc<watch::Sender<bool>>,
}

impl MessageSink for MemorySink {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        let tx = self.tx.as_ref().ok_or(ConnectionError::Closed)?;
        tx.send(text)
            .map_err(|_| ConnectionError::Send("peer went away".into()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        self.tx = None;
        self.closed.send_replace(true);
        Ok(())
    }
}

/// Remote side of an accepted in-memory connection.
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Frame>>,
    rx: mpsc::UnboundedReceiver<String>,
    closed: watch::Receiver<bool>,
}

impl MemoryPeer {
    /// Deliver a text message to the local relay.
    pub fn send_text(&self, text: &str) -> bool {
        self.send(Frame::Text(text.to_string()))
    }

    /// Deliver a binary message to the local relay.
    pub fn send_binary(&self, bytes: &[u8]) -> bool {
        self.send(Frame::Binary(bytes.to_vec()))
    }

    fn send(&self, frame: Frame) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(frame).is_ok())
    }

    /// Next message the local side sent, or `None` once it closed.
    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Drop the connection from the remote side.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Whether the local side closed the connection.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the local side closes the connection.
    pub async fn closed(&mut self) {
        let _ = self.closed.wait_for(|closed| *closed).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn endpoint() -> Endpoint {
        Endpoint::parse("ws://memory").unwrap()
    }

    #[tokio::test]
    async fn script_is_consumed_in_order() {
        let connector = MemoryConnector::new();
        connector.refuse(2);
        let _peer = connector.accept();

        assert!(connector.connect(&endpoint()).await.is_err());
        assert!(connector.connect(&endpoint()).await.is_err());
        assert!(connector.connect(&endpoint()).await.is_ok());
        assert!(connector.connect(&endpoint()).await.is_err());
        assert_eq!(connector.attempts().len(), 4);
    }

    #[tokio::test]
    async fn messages_flow_both_ways() {
        let connector = MemoryConnector::new();
        let mut peer = connector.accept();
        let (mut source, mut sink) = connector.connect(&endpoint()).await.unwrap();

        assert!(peer.send_text("ping"));
        assert_eq!(
            source.recv().await.unwrap(),
            Some(Frame::Text("ping".into()))
        );

        sink.send("pong".into()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn remote_disconnect_ends_source() {
        let connector = MemoryConnector::new();
        let mut peer = connector.accept();
        let (mut source, _sink) = connector.connect(&endpoint()).await.unwrap();

        peer.disconnect();
        assert_eq!(source.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn local_close_is_visible_to_peer_and_source() {
        let connector = MemoryConnector::new();
        let mut peer = connector.accept();
        let (mut source, mut sink) = connector.connect(&endpoint()).await.unwrap();

        sink.close().await.unwrap();
        sink.close().await.unwrap();
        peer.closed().await;
        assert!(peer.is_closed());
        assert_eq!(source.recv().await.unwrap(), None);
        assert!(sink.send("late".into()).await.is_err());
    }
}
