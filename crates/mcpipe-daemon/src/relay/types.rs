//! Relay module types.

use std::fmt;

/// Which of the three session pumps a relay is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayRole {
    /// Remote connection → child stdin.
    Inbound,
    /// Child stdout → remote connection.
    Outbound,
    /// Child stderr → local diagnostic sink.
    Diagnostic,
}

impl fmt::Display for RelayRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
            Self::Diagnostic => "diagnostic",
        })
    }
}

/// Why a relay stopped before it was cancelled.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("process input closed: {0}")]
    ProcessInputClosed(String),

    #[error("process exited")]
    ProcessExited,

    #[error("process output failed: {0}")]
    ProcessOutputFailed(String),

    #[error("process diagnostic stream closed")]
    DiagnosticClosed,

    #[error("relay task panicked: {0}")]
    Panicked(String),
}

/// Result of a relay task: `Ok(())` when it was cancelled by teardown.
pub type RelayResult = Result<(), RelayError>;
