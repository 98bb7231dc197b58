//! `mcpipe` Core Library
//!
//! Shared functionality for the `mcpipe` relay:
//! - Configuration resolution and hierarchy
//! - Tracing initialisation
//! - Transport traits for message-oriented remote connections
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;
pub mod transport;

pub use config::Config;
pub use error::{Error, Result};
pub use transport::{ConnectionError, Connector, Endpoint, Frame, MessageSink, MessageSource};
