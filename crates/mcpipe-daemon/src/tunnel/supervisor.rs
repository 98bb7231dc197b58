//! Reconnect loop around sessions.

use std::sync::Arc;

use mcpipe_core::{Connector, Endpoint};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::backoff::{BackoffState, jitter_factor};
use super::config::ReconnectPolicy;
use crate::session::{Session, SessionConfig, SessionState, TerminationReason};
use crate::shutdown;
use crate::subprocess::ProcessManager;

/// Keeps one session alive against the endpoint, reconnecting forever.
pub struct ConnectionSupervisor<C> {
    connector: C,
    endpoint: Endpoint,
    reconnect: ReconnectPolicy,
    processes: ProcessManager,
    session: Arc<SessionConfig>,
}

impl<C: Connector> ConnectionSupervisor<C> {
    pub fn new(
        connector: C,
        endpoint: Endpoint,
        reconnect: ReconnectPolicy,
        processes: ProcessManager,
        session: SessionConfig,
    ) -> Self {
        Self {
            connector,
            endpoint,
            reconnect,
            processes,
            session: Arc::new(session),
        }
    }

    /// Run until shutdown is requested.
    ///
    /// Every failure (refused connection, spawn error, relay error) is
    /// logged and retried with jittered exponential backoff. There is no
    /// retry ceiling.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = BackoffState::new(self.reconnect.clone());
        info!(endpoint = %self.endpoint, command = %self.session.command, "Supervisor started");

        loop {
            if *shutdown.borrow() {
                info!("Supervisor shutting down");
                return;
            }

            if backoff.attempt() > 0 {
                let wait = backoff.jittered(jitter_factor());
                info!(attempt = backoff.attempt(), delay_ms = wait.as_millis(), "Reconnecting");
                tokio::select! {
                    () = sleep(wait) => {}
                    () = shutdown::requested(&mut shutdown) => {
                        info!("Supervisor shutting down during reconnect wait");
                        return;
                    }
                }
            }

            let connected = tokio::select! {
                result = self.connector.connect(&self.endpoint) => result,
                () = shutdown::requested(&mut shutdown) => {
                    info!("Supervisor shutting down while connecting");
                    return;
                }
            };
            let (source, sink) = match connected {
                Ok(halves) => halves,
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "Connection failed");
                    backoff.record_failure();
                    continue;
                }
            };
            info!(endpoint = %self.endpoint, "Connected");

            match self
                .run_session(source, sink, &mut backoff, shutdown.clone())
                .await
            {
                TerminationReason::Shutdown => {
                    info!("Supervisor shutting down");
                    return;
                }
                TerminationReason::SpawnFailed(e) => {
                    error!(error = %e, "Could not start child process");
                }
                reason @ TerminationReason::Relay { .. } => {
                    warn!(reason = %reason, "Session ended");
                }
            }
            backoff.record_failure();
        }
    }

    /// Run one session, resetting `backoff` as soon as it goes active.
    async fn run_session(
        &self,
        source: C::Source,
        sink: C::Sink,
        backoff: &mut BackoffState,
        shutdown: watch::Receiver<bool>,
    ) -> TerminationReason {
        let id = uuid::Uuid::new_v4();
        let mut session = Session::new(self.processes.clone(), Arc::clone(&self.session));
        let mut states = session.observe();

        let run = session
            .run(source, sink, shutdown)
            .instrument(info_span!("session", %id));
        tokio::pin!(run);

        let reason = loop {
            tokio::select! {
                biased;
                Some(state) = states.recv() => on_state(state, backoff),
                reason = &mut run => break reason,
            }
        };
        while let Ok(state) = states.try_recv() {
            on_state(state, backoff);
        }
        reason
    }
}

fn on_state(state: SessionState, backoff: &mut BackoffState) {
    if state == SessionState::Active && backoff.attempt() > 0 {
        debug!(attempt = backoff.attempt(), "Session active, backoff reset");
        backoff.reset();
    }
}
