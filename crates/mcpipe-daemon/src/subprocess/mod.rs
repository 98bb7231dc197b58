//! Subprocess management for the relayed child program.

pub mod manager;

pub use manager::{
    ChildHandle, ChildProcess, ProcessCommand, ProcessManager, SubprocessError, TerminateOutcome,
};
