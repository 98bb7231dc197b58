//! Session: one connection attempt.
//!
//! Pairs a live connection with a freshly spawned child, runs the three
//! relays, and tears everything down exactly once on the first failure.

mod runner;
pub mod state;
mod types;

pub use runner::Session;
pub use state::{SessionState, SessionStateCell};
pub use types::{SessionConfig, TerminationReason};
