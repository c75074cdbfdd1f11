//! Reconnection backoff policy

use std::time::Duration;

/// Capped exponential backoff for reconnection attempts
///
/// The delay for the n-th consecutive attempt (1-indexed) is
/// `base_delay * 2^(n-1)`, clamped to `max_delay`. Scheduling stops entirely
/// once `max_attempts` consecutive attempts have failed; the counter is reset
/// only by a successful open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Ceiling on the computed delay
    pub max_delay: Duration,
    /// Attempt ceiling after which no retry is scheduled
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay for the given 1-indexed attempt number
    ///
    /// Growth is uncapped internally but clamped to `max_delay` on output;
    /// large attempt numbers saturate instead of overflowing.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        delay.min(self.max_delay)
    }
}
