//! mcpipe daemon library
//!
//! Relays a remote WebSocket endpoint to a local child process:
//! - Subprocess management for the relayed program
//! - Line relays between the connection and the child's stdio
//! - Per-connection sessions with exactly-once teardown
//! - Reconnect supervision with jittered exponential backoff

pub mod relay;
pub mod session;
pub mod shutdown;
pub mod subprocess;
pub mod tunnel;
