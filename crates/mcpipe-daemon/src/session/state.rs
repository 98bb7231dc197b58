//! Session state machine.
//!
//! ```text
//! Connecting --spawn ok--> Active --first failure / shutdown--> Closing --> Closed
//! Connecting --spawn failed--------------------------------------------> Closed
//! ```
//!
//! Transitions are compare-and-swap on an atomic, so when several failure
//! reports race only one of them wins the `Active → Closing` edge.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use tokio::sync::mpsc;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

impl SessionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Connecting => 0,
            Self::Active => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Active,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Closed => "closed",
        })
    }
}

/// Shared, observable session state.
#[derive(Debug, Clone)]
pub struct SessionStateCell {
    state: Arc<AtomicU8>,
    observer: Option<mpsc::UnboundedSender<SessionState>>,
}

impl Default for SessionStateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStateCell {
    pub fn new() -> Self {
        Self {
            state: Arc::new(AtomicU8::new(SessionState::Connecting.as_u8())),
            observer: None,
        }
    }

    /// Publish every successful transition to the returned receiver.
    pub fn observe(&mut self) -> mpsc::UnboundedReceiver<SessionState> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.observer = Some(tx);
        rx
    }

    pub fn get(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move `from → to`. Returns `false` if the state was not `from`.
    pub fn transition(&self, from: SessionState, to: SessionState) -> bool {
        let won = self
            .state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(observer) = &self.observer {
                let _ = observer.send(to);
            }
        }
        won
    }

    /// Enter `Closing` from `Active`. Exactly one caller gets `true`.
    pub fn begin_closing(&self) -> bool {
        self.transition(SessionState::Active, SessionState::Closing)
    }
}
