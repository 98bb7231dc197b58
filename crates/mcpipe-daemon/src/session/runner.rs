//! One connection attempt: a live connection paired with a live child.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use mcpipe_core::{MessageSink, MessageSource};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::state::{SessionState, SessionStateCell};
use super::types::{SessionConfig, TerminationReason};
use crate::relay::{RelayError, RelayResult, RelayRole, run_diagnostic, run_inbound, run_outbound};
use crate::shutdown;
use crate::subprocess::{ChildHandle, ChildProcess, ProcessManager};

/// How long teardown waits to close the connection before stopping the child.
/// A send stuck on a peer that stopped reading holds the sink until the
/// outbound relay is cancelled.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Owns one connection, one child process and the three relays between them.
///
/// A session is consumed by [`Session::run`]; a fresh one is built for every
/// connection attempt.
pub struct Session {
    processes: ProcessManager,
    config: Arc<SessionConfig>,
    state: SessionStateCell,
}

/// The relay tasks of an active session, tagged with their role.
struct Relays {
    tasks: JoinSet<(RelayRole, RelayResult)>,
    cancel: CancellationToken,
}

impl Relays {
    fn new() -> Self {
        Self {
            tasks: JoinSet::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn spawn<F>(&mut self, role: RelayRole, relay: F)
    where
        F: Future<Output = RelayResult> + Send + 'static,
    {
        self.tasks.spawn(
            async move {
                let result = AssertUnwindSafe(relay)
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(RelayError::Panicked(panic_message(&*panic))));
                (role, result)
            }
            .in_current_span(),
        );
    }

    /// Wait for the next relay to stop.
    async fn next_exit(&mut self) -> Option<(RelayRole, RelayResult)> {
        loop {
            match self.tasks.join_next().await? {
                Ok(exit) => return Some(exit),
                Err(e) => warn!(error = %e, "Relay task aborted"),
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

impl Session {
    pub fn new(processes: ProcessManager, config: Arc<SessionConfig>) -> Self {
        Self {
            processes,
            config,
            state: SessionStateCell::new(),
        }
    }

    /// Receive every state transition of this session as it happens.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<SessionState> {
        self.state.observe()
    }

    pub fn state(&self) -> SessionState {
        self.state.get()
    }

    /// Run until the first relay stops or shutdown is requested.
    ///
    /// All resources (connection, child, relay tasks) are released before
    /// this returns.
    pub async fn run<S, K>(
        self,
        source: S,
        sink: K,
        mut shutdown: watch::Receiver<bool>,
    ) -> TerminationReason
    where
        S: MessageSource,
        K: MessageSink,
    {
        let sink = Arc::new(Mutex::new(sink));

        let child = match self.processes.spawn(&self.config.command) {
            Ok(child) => child,
            Err(e) => {
                error!(error = %e, "Failed to spawn child process");
                close_connection(&sink).await;
                self.state
                    .transition(SessionState::Connecting, SessionState::Closed);
                return TerminationReason::SpawnFailed(e);
            }
        };
        let ChildProcess {
            mut handle,
            stdin,
            stdout,
            stderr,
        } = child;

        let mut relays = Relays::new();
        relays.spawn(
            RelayRole::Inbound,
            run_inbound(source, stdin, relays.cancel.clone()),
        );
        relays.spawn(
            RelayRole::Outbound,
            run_outbound(stdout, Arc::clone(&sink), relays.cancel.clone()),
        );
        relays.spawn(
            RelayRole::Diagnostic,
            run_diagnostic(
                stderr,
                Arc::clone(&self.config.diagnostics),
                handle.id().to_string(),
                self.config.stderr_policy,
                relays.cancel.clone(),
            ),
        );
        self.state
            .transition(SessionState::Connecting, SessionState::Active);
        info!(process_id = %handle.id(), "Session active");

        let reason = tokio::select! {
            Some((role, result)) = relays.next_exit() => match result {
                Err(error) => TerminationReason::Relay { role, error },
                // Relays only return Ok when cancelled, which has not happened yet.
                Ok(()) => TerminationReason::Relay { role, error: RelayError::ProcessExited },
            },
            () = shutdown::requested(&mut shutdown) => TerminationReason::Shutdown,
        };

        if self.state.begin_closing() {
            self.teardown(&reason, &sink, &mut handle, &mut relays).await;
        }
        reason
    }

    /// Close the connection, stop the child, then drain the relays.
    ///
    /// If the close could not finish in time it is retried once the relays
    /// are gone and nothing else holds the sink.
    async fn teardown<K: MessageSink>(
        &self,
        reason: &TerminationReason,
        sink: &Mutex<K>,
        handle: &mut ChildHandle,
        relays: &mut Relays,
    ) {
        if reason.is_shutdown() {
            info!(process_id = %handle.id(), "Closing session");
        } else {
            warn!(process_id = %handle.id(), reason = %reason, "Session failed, tearing down");
        }

        let closed = close_connection(sink).await;
        let outcome = self.processes.terminate(handle).await;
        debug!(process_id = %handle.id(), ?outcome, "Child terminated");

        relays.cancel.cancel();
        while let Some((role, result)) = relays.next_exit().await {
            if let Err(error) = result {
                debug!(%role, %error, "Relay stopped during teardown");
            }
        }
        if !closed {
            close_connection(sink).await;
        }

        self.state
            .transition(SessionState::Closing, SessionState::Closed);
        info!(process_id = %handle.id(), "Session closed");
    }
}

/// Returns false if the close did not finish within [`CLOSE_TIMEOUT`].
async fn close_connection<K: MessageSink>(sink: &Mutex<K>) -> bool {
    let close = async { sink.lock().await.close().await };
    match tokio::time::timeout(CLOSE_TIMEOUT, close).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!(error = %e, "Error closing connection");
            true
        }
        Err(_) => {
            warn!(timeout_ms = CLOSE_TIMEOUT.as_millis(), "Timed out closing connection");
            false
        }
    }
}
