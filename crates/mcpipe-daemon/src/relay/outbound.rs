//! Child stdout → remote connection.

use std::sync::Arc;

use mcpipe_core::MessageSink;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RelayError, RelayResult, decode_line, preview};

/// Forward each stdout line as one remote message.
///
/// The sink sits behind a mutex only so teardown can close the connection;
/// this relay is its sole writer.
pub async fn run_outbound<R, K>(
    stdout: R,
    sink: Arc<Mutex<K>>,
    cancel: CancellationToken,
) -> RelayResult
where
    R: AsyncRead + Unpin + Send,
    K: MessageSink,
{
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => return Err(RelayError::ProcessExited),
            Ok(_) => {}
            Err(e) => return Err(RelayError::ProcessOutputFailed(e.to_string())),
        }

        let line = decode_line(&buf);
        debug!(">> {}", preview(&line));

        let sent = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            sent = async { sink.lock().await.send(line).await } => sent,
        };
        sent.map_err(|e| RelayError::ConnectionLost(e.to_string()))?;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use mcpipe_core::Endpoint;
    use mcpipe_core::transport::Connector;
    use mcpipe_core::transport::memory::MemoryConnector;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn each_line_is_one_message_until_eof() {
        let connector = MemoryConnector::new();
        let mut peer = connector.accept();
        let endpoint = Endpoint::parse("ws://memory").unwrap();
        let (_source, sink) = connector.connect(&endpoint).await.unwrap();
        let (mut child_side, stdout) = tokio::io::duplex(1024);

        let relay = tokio::spawn(run_outbound(
            stdout,
            Arc::new(Mutex::new(sink)),
            CancellationToken::new(),
        ));
        child_side
            .write_all(b"{\"result\":{}}\nwindows\r\n\npartial")
            .await
            .unwrap();
        drop(child_side);

        assert_eq!(relay.await.unwrap(), Err(RelayError::ProcessExited));
        assert_eq!(peer.recv().await.as_deref(), Some("{\"result\":{}}"));
        assert_eq!(peer.recv().await.as_deref(), Some("windows"));
        assert_eq!(peer.recv().await.as_deref(), Some(""));
        assert_eq!(peer.recv().await.as_deref(), Some("partial"));
    }

    #[tokio::test]
    async fn send_failure_reports_connection_lost() {
        let connector = MemoryConnector::new();
        let peer = connector.accept();
        let endpoint = Endpoint::parse("ws://memory").unwrap();
        let (_source, sink) = connector.connect(&endpoint).await.unwrap();
        drop(peer);
        let (mut child_side, stdout) = tokio::io::duplex(1024);

        let relay = tokio::spawn(run_outbound(
            stdout,
            Arc::new(Mutex::new(sink)),
            CancellationToken::new(),
        ));
        child_side.write_all(b"orphan\n").await.unwrap();

        assert!(matches!(
            relay.await.unwrap(),
            Err(RelayError::ConnectionLost(_))
        ));
    }

    #[tokio::test]
    async fn cancel_unblocks_pending_read() {
        let connector = MemoryConnector::new();
        let _peer = connector.accept();
        let endpoint = Endpoint::parse("ws://memory").unwrap();
        let (_source, sink) = connector.connect(&endpoint).await.unwrap();
        let (_child_side, stdout) = tokio::io::duplex(1024);
        let cancel = CancellationToken::new();

        let relay = tokio::spawn(run_outbound(stdout, Arc::new(Mutex::new(sink)), cancel.clone()));
        cancel.cancel();
        assert_eq!(relay.await.unwrap(), Ok(()));
    }
}
