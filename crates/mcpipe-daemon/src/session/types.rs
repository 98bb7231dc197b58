//! Session module types.

use std::sync::Arc;

use mcpipe_core::config::StderrPolicy;

use crate::relay::{DiagnosticSink, RelayError, RelayRole};
use crate::subprocess::{ProcessCommand, SubprocessError};

/// Fixed inputs shared by every session the supervisor creates.
#[derive(Clone)]
pub struct SessionConfig {
    /// Child program launched for each session.
    pub command: ProcessCommand,
    /// Whether child stderr EOF ends the session.
    pub stderr_policy: StderrPolicy,
    /// Destination of child stderr lines.
    pub diagnostics: Arc<dyn DiagnosticSink>,
}

impl std::fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionConfig")
            .field("command", &self.command)
            .field("stderr_policy", &self.stderr_policy)
            .finish_non_exhaustive()
    }
}

/// Why a session ended.
#[derive(Debug, thiserror::Error)]
pub enum TerminationReason {
    /// A relay stopped first; the supervisor retries.
    #[error("{role} relay stopped: {error}")]
    Relay { role: RelayRole, error: RelayError },

    /// The child could not be started; the session never became active.
    #[error(transparent)]
    SpawnFailed(#[from] SubprocessError),

    /// The operator asked the relay to stop.
    #[error("shutdown requested")]
    Shutdown,
}

impl TerminationReason {
    pub const fn is_shutdown(&self) -> bool {
        matches!(self, Self::Shutdown)
    }
}
