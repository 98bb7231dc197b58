//! Tunnel to the remote endpoint.
//!
//! Opens the WebSocket connection, supervises one session at a time and
//! reconnects with jittered exponential backoff.

pub mod backoff;
pub mod config;
pub mod supervisor;
pub mod websocket;

pub use backoff::BackoffState;
pub use config::ReconnectPolicy;
pub use supervisor::ConnectionSupervisor;
pub use websocket::{Keepalive, WebSocketConnector};
