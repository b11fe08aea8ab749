//! Reconnection policy.

use std::time::Duration;

/// Delay growth between reconnection attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Every attempt waits the base delay.
    Fixed,
    /// The delay doubles per attempt, up to `max_delay`.
    Exponential {
        /// Upper bound for a single delay.
        max_delay: Duration,
    },
}

/// Bounded reconnection settings for a transport session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay growth.
    pub backoff: Backoff,
    /// Base delay before the first reconnection attempt.
    pub delay: Duration,
    /// Reconnection attempts before giving up.
    pub max_attempts: u32,
    /// Timeout for a single connection attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::Exponential {
                max_delay: Duration::from_secs(5),
            },
            delay: Duration::from_millis(1000),
            max_attempts: 10,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ReconnectPolicy {
    /// A policy with a constant delay.
    #[must_use]
    pub fn fixed(delay: Duration, max_attempts: u32) -> Self {
        Self {
            backoff: Backoff::Fixed,
            delay,
            max_attempts,
            ..Self::default()
        }
    }

    /// Delay before reconnection attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let factor = 1u32
                    .checked_shl(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                self.delay.saturating_mul(factor).min(max_delay)
            }
        }
    }

    /// Whether another attempt may follow attempt number `attempt`.
    #[must_use]
    pub fn allows_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
