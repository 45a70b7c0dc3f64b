//! Retry policy for upstream calls.
//!
//! A [`RetryPolicy`] answers two questions for the scheduler's retry loop:
//! how many attempts a call gets in total, and how long to back off after
//! the n-th failure.
//!
//! ```ignore
//! use std::time::Duration;
//! use skywatch::scheduler::RetryPolicy;
//!
//! // 3 attempts, 500ms -> 1s between them, never more than 8s
//! let policy = RetryPolicy::exponential(3, Duration::from_millis(500), Duration::from_secs(8));
//! assert_eq!(policy.delay_for_attempt(2), Some(Duration::from_secs(1)));
//! ```

use std::time::Duration;

/// Multiplier applied per failed attempt by [`RetryPolicy::exponential`].
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How an upstream call handles transient failures.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryPolicy {
    /// Single attempt, fail immediately.
    None,

    /// Constant delay between attempts.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        delay: Duration,
    },

    /// Delay grows by `multiplier` after each failure, capped at `max_delay`.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        max_delay: Duration,
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::None
    }
}

impl RetryPolicy {
    /// Doubling backoff starting at `initial_delay`, capped at `max_delay`.
    pub fn exponential(max_attempts: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay,
            max_delay,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Delay to wait after `attempt` failed attempts (1-based), or `None` if
    /// the attempt budget is spent.
    ///
    /// Exponential backoff waits `initial_delay × multiplier^(attempt − 1)`,
    /// capped at `max_delay`: the first retry waits exactly `initial_delay`
    /// rather than `initial_delay × multiplier`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
                let delay_ms = initial_delay.as_millis() as f64 * multiplier.powi(exponent);
                let capped = delay_ms.min(max_delay.as_millis() as f64);
                Some(Duration::from_millis(capped as u64).min(*max_delay))
            }
        }
    }

    /// Total attempts allowed, initial attempt included.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}
