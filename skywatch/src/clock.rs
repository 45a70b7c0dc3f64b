//! Wall-clock abstraction for epoch-second timestamps.
//!
//! Storage rows carry epoch seconds (`last_contact`, `updated_at`), so the
//! tracker and sweeper read time through [`Clock`] to keep staleness testable.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Source of the current epoch time in seconds.
pub trait Clock: Send + Sync {
    fn now_epoch(&self) -> i64;
}

/// System UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually driven clock for tests and replays.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now_epoch: i64) -> Self {
        Self {
            now: AtomicI64::new(now_epoch),
        }
    }

    pub fn set(&self, now_epoch: i64) {
        self.now.store(now_epoch, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_epoch(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::new(1_000);
        clock.advance(Duration::from_secs(3 * 3600));
        assert_eq!(clock.now_epoch(), 1_000 + 10_800);
        clock.set(5);
        assert_eq!(clock.now_epoch(), 5);
    }

    #[test]
    fn test_system_clock_is_recent() {
        // 2020-01-01T00:00:00Z
        assert!(SystemClock.now_epoch() > 1_577_836_800);
    }
}
