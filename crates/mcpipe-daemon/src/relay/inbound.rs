//! Remote connection → child stdin.

use mcpipe_core::MessageSource;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{RelayError, RelayResult, preview};

/// Forward every remote message to `stdin` as one flushed line.
///
/// Dropping `stdin` on exit closes the child's input.
pub async fn run_inbound<S, W>(mut source: S, mut stdin: W, cancel: CancellationToken) -> RelayResult
where
    S: MessageSource,
    W: AsyncWrite + Unpin + Send,
{
    loop {
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            received = source.recv() => received,
        };
        let text = match received {
            Ok(Some(frame)) => frame.into_text(),
            Ok(None) => return Err(RelayError::ConnectionLost("closed by peer".into())),
            Err(e) => return Err(RelayError::ConnectionLost(e.to_string())),
        };
        debug!("<< {}", preview(&text));

        let written = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            written = write_line(&mut stdin, &text) => written,
        };
        written.map_err(|e| RelayError::ProcessInputClosed(e.to_string()))?;
    }
}

async fn write_line<W>(stdin: &mut W, text: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    stdin.write_all(text.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}
