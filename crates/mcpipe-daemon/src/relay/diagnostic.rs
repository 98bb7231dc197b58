//! Child stderr → local diagnostic sink.

use std::io::Write;
use std::sync::Arc;

use mcpipe_core::config::StderrPolicy;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{RelayError, RelayResult, decode_line};

/// Local destination for child stderr lines.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, process_id: &str, line: &str);
}

/// Copies lines verbatim to our own stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrSink;

impl DiagnosticSink for StderrSink {
    fn emit(&self, _process_id: &str, line: &str) {
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(stderr, "{line}");
        let _ = stderr.flush();
    }
}

/// Emits each line as a tracing event under the `mcpipe::child` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, process_id: &str, line: &str) {
        info!(target: "mcpipe::child", process_id, "{line}");
    }
}

/// Pump stderr lines into `sink`. EOF handling follows `policy`.
pub async fn run_diagnostic<R>(
    stderr: R,
    sink: Arc<dyn DiagnosticSink>,
    process_id: String,
    policy: StderrPolicy,
    cancel: CancellationToken,
) -> RelayResult
where
    R: AsyncRead + Unpin + Send,
{
    let mut reader = BufReader::new(stderr);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            read = reader.read_until(b'\n', &mut buf) => read,
        };
        match read {
            Ok(0) => break,
            Ok(_) => sink.emit(&process_id, &decode_line(&buf)),
            Err(e) => {
                warn!(process_id, error = %e, "Failed to read child stderr");
                break;
            }
        }
    }

    match policy {
        StderrPolicy::Fatal => Err(RelayError::DiagnosticClosed),
        StderrPolicy::Ignore => {
            info!(process_id, "Child stderr closed, session continues");
            cancel.cancelled().await;
            Ok(())
        }
    }
}
