//! WebSocket implementation of the transport seams.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use mcpipe_core::{ConnectionError, Connector, Endpoint, Frame, MessageSink, MessageSource};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = Arc<Mutex<SplitSink<Stream, Message>>>;

/// Ping cadence for an open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Keepalive {
    /// Time between pings.
    pub interval: Duration,
    /// How long to wait for any traffic after a ping before giving up.
    pub timeout: Duration,
}

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    keepalive: Option<Keepalive>,
}

impl WebSocketConnector {
    pub const fn new(keepalive: Option<Keepalive>) -> Self {
        Self { keepalive }
    }
}

impl Connector for WebSocketConnector {
    type Source = WebSocketSource;
    type Sink = WebSocketSink;

    async fn connect(
        &self,
        endpoint: &Endpoint,
    ) -> Result<(WebSocketSource, WebSocketSink), ConnectionError> {
        let (ws, response) = tokio_tungstenite::connect_async(endpoint.as_str())
            .await
            .map_err(classify)?;
        debug!(endpoint = %endpoint, status = %response.status(), "WebSocket handshake complete");

        let (writer, reader) = ws.split();
        let writer = Arc::new(Mutex::new(writer));
        let keepalive = self.keepalive.map(|keepalive| {
            let start = Instant::now() + keepalive.interval;
            let mut ticker = tokio::time::interval_at(start, keepalive.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            KeepaliveState {
                ticker,
                timeout: keepalive.timeout,
                awaiting_since: None,
            }
        });

        Ok((
            WebSocketSource {
                reader,
                writer: Arc::clone(&writer),
                keepalive,
            },
            WebSocketSink {
                writer,
                closed: false,
            },
        ))
    }
}

fn classify(error: tungstenite::Error) -> ConnectionError {
    match error {
        tungstenite::Error::Io(_) | tungstenite::Error::Url(_) => {
            ConnectionError::Open(error.to_string())
        }
        other => ConnectionError::Handshake(other.to_string()),
    }
}

struct KeepaliveState {
    ticker: Interval,
    timeout: Duration,
    awaiting_since: Option<Instant>,
}

/// Read half. Also drives keepalive pings through the shared writer.
pub struct WebSocketSource {
    reader: SplitStream<Stream>,
    writer: Writer,
    keepalive: Option<KeepaliveState>,
}

/// Send a keepalive ping unless the sink is mid-write.
///
/// A busy writer is not waited on: the pong deadline is already running, and
/// a write that never drains means the peer is gone. A ping that cannot be
/// written before `deadline` counts as a lost connection.
async fn ping(writer: &Writer, deadline: Instant) -> Result<(), ConnectionError> {
    let Ok(mut writer) = writer.try_lock() else {
        trace!("Writer busy, skipping keepalive ping");
        return Ok(());
    };
    trace!("Sending keepalive ping");
    match tokio::time::timeout_at(deadline, writer.send(Message::Ping(Vec::new().into()))).await {
        Ok(sent) => sent.map_err(|e| ConnectionError::Send(e.to_string())),
        Err(_) => Err(ConnectionError::Receive("keepalive ping timed out".into())),
    }
}

impl MessageSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Frame>, ConnectionError> {
        loop {
            let message = match self.keepalive.as_mut() {
                None => self.reader.next().await,
                Some(keepalive) => {
                    let deadline = keepalive.awaiting_since.map(|sent| sent + keepalive.timeout);
                    tokio::select! {
                        message = self.reader.next() => {
                            keepalive.awaiting_since = None;
                            message
                        }
                        _ = keepalive.ticker.tick(), if deadline.is_none() => {
                            let now = Instant::now();
                            keepalive.awaiting_since = Some(now);
                            ping(&self.writer, now + keepalive.timeout).await?;
                            continue;
                        }
                        () = sleep_until(deadline), if deadline.is_some() => {
                            return Err(ConnectionError::Receive("keepalive ping timed out".into()));
                        }
                    }
                }
            };

            match message {
                None | Some(Ok(Message::Close(_))) => return Ok(None),
                Some(Ok(Message::Text(text))) => return Ok(Some(Frame::Text(text.as_str().to_string()))),
                Some(Ok(Message::Binary(bytes))) => return Ok(Some(Frame::Binary(bytes.to_vec()))),
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Err(e)) => return Err(ConnectionError::Receive(e.to_string())),
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Write half.
pub struct WebSocketSink {
    writer: Writer,
    closed: bool,
}

impl MessageSink for WebSocketSink {
    async fn send(&mut self, text: String) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        self.writer
            .lock()
            .await
            .send(Message::text(text))
            .await
            .map_err(|e| ConnectionError::Send(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), ConnectionError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        match self.writer.lock().await.close().await {
            Ok(())
            | Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => Err(ConnectionError::Send(e.to_string())),
        }
    }
}
