//! Error types for `mcpipe` core library.

use thiserror::Error;

/// Result type alias using the core `Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for `mcpipe` startup and configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Endpoint URL is missing or malformed
    #[error("Invalid endpoint: {0}")]
    Endpoint(String),
}
