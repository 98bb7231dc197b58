//! Reconnect backoff bookkeeping owned by the supervisor.

use std::time::Duration;

use rand::RngExt;

use super::config::ReconnectPolicy;

/// Upper bound (exclusive) of the jitter factor applied to every wait.
pub const MAX_JITTER: f64 = 1.1;

/// Consecutive-failure counter and the wait derived from it.
///
/// After the n-th consecutive failure `attempt == n` and
/// `delay == policy.delay_for_attempt(n - 1)`, so with a 1s base the waits
/// run 1s, 2s, 4s, ... up to the cap.
#[derive(Debug, Clone)]
pub struct BackoffState {
    policy: ReconnectPolicy,
    attempt: u32,
    delay: Duration,
}

impl BackoffState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let delay = policy.initial_delay;
        Self {
            policy,
            attempt: 0,
            delay,
        }
    }

    /// Number of consecutive failures since the last reset.
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Un-jittered wait before the next attempt.
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    pub fn record_failure(&mut self) {
        self.delay = self.policy.delay_for_attempt(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
    }

    /// Back to `{attempt: 0, delay: base}`; called when a session goes active.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.delay = self.policy.initial_delay;
    }

    /// Scale the current delay by `factor`, clamped to `[1.0, MAX_JITTER)`.
    pub fn jittered(&self, factor: f64) -> Duration {
        self.delay.mul_f64(factor.clamp(1.0, MAX_JITTER))
    }
}

/// Draw a jitter factor uniformly from `[1.0, MAX_JITTER)`.
pub fn jitter_factor() -> f64 {
    rand::rng().random_range(1.0..MAX_JITTER)
}
