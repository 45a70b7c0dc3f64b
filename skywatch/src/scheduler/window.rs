//! Sliding-window request ceilings.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// Length of the short window.
pub const MINUTE: Duration = Duration::from_secs(60);

/// Length of the long window.
pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Admission timestamps for the last minute and the last 24 hours.
///
/// Not synchronized; the scheduler owns it behind its admission gate.
#[derive(Debug)]
pub struct RateWindow {
    per_minute: usize,
    per_day: usize,
    minute: VecDeque<Instant>,
    day: VecDeque<Instant>,
}

impl RateWindow {
    pub fn new(per_minute: u32, per_day: u32) -> Self {
        let per_minute = per_minute.max(1) as usize;
        let per_day = per_day.max(1) as usize;
        Self {
            per_minute,
            per_day,
            minute: VecDeque::with_capacity(per_minute),
            day: VecDeque::new(),
        }
    }

    /// Record an admission at `now` if both ceilings allow it.
    ///
    /// Otherwise returns how long until the oldest blocking timestamp leaves
    /// its window. Nothing is recorded on rejection.
    pub fn try_admit(&mut self, now: Instant) -> Result<(), Duration> {
        self.prune(now);

        let mut wait = Duration::ZERO;
        if self.minute.len() >= self.per_minute {
            if let Some(oldest) = self.minute.front() {
                wait = wait.max(MINUTE.saturating_sub(now.saturating_duration_since(*oldest)));
            }
        }
        if self.day.len() >= self.per_day {
            if let Some(oldest) = self.day.front() {
                wait = wait.max(DAY.saturating_sub(now.saturating_duration_since(*oldest)));
            }
        }

        if wait.is_zero() {
            self.minute.push_back(now);
            self.day.push_back(now);
            Ok(())
        } else {
            Err(wait)
        }
    }

    /// Admissions still inside the minute window.
    pub fn in_last_minute(&self) -> usize {
        self.minute.len()
    }

    /// Admissions still inside the day window.
    pub fn in_last_day(&self) -> usize {
        self.day.len()
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.minute.front() {
            if now.saturating_duration_since(*oldest) >= MINUTE {
                self.minute.pop_front();
            } else {
                break;
            }
        }
        while let Some(oldest) = self.day.front() {
            if now.saturating_duration_since(*oldest) >= DAY {
                self.day.pop_front();
            } else {
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_minute_ceiling_reports_wait() {
        let start = Instant::now();
        let mut window = RateWindow::new(2, 100);

        assert!(window.try_admit(start).is_ok());
        assert!(window.try_admit(start + Duration::from_secs(10)).is_ok());

        let wait = window
            .try_admit(start + Duration::from_secs(20))
            .unwrap_err();
        assert_eq!(wait, Duration::from_secs(40));
        assert_eq!(window.in_last_minute(), 2);

        // first stamp has left the window
        assert!(window.try_admit(start + Duration::from_secs(60)).is_ok());
        assert_eq!(window.in_last_minute(), 2);
        assert_eq!(window.in_last_day(), 3);
    }

    #[test]
    fn test_day_ceiling_reports_long_wait() {
        let start = Instant::now();
        let mut window = RateWindow::new(10, 2);

        assert!(window.try_admit(start).is_ok());
        assert!(window.try_admit(start + Duration::from_secs(61)).is_ok());

        let wait = window
            .try_admit(start + Duration::from_secs(200))
            .unwrap_err();
        assert_eq!(wait, DAY - Duration::from_secs(200));
    }

    #[test]
    fn test_rejection_records_nothing() {
        let start = Instant::now();
        let mut window = RateWindow::new(1, 10);
        window.try_admit(start).unwrap();
        for s in 1..5 {
            assert!(window.try_admit(start + Duration::from_secs(s)).is_err());
        }
        assert_eq!(window.in_last_day(), 1);
    }

    proptest! {
        #[test]
        fn prop_no_minute_holds_more_than_ceiling(
            per_minute in 1u32..8,
            gaps in proptest::collection::vec(0u64..30_000, 1..120),
        ) {
            let start = Instant::now();
            let mut window = RateWindow::new(per_minute, 10_000);
            let mut offset = 0u64;
            let mut admitted = Vec::new();

            for gap in gaps {
                offset += gap;
                let at = start + Duration::from_millis(offset);
                if window.try_admit(at).is_ok() {
                    admitted.push(offset);
                }
            }

            for (i, &t) in admitted.iter().enumerate() {
                let in_window = admitted[i..]
                    .iter()
                    .take_while(|&&u| u < t + MINUTE.as_millis() as u64)
                    .count();
                prop_assert!(in_window <= per_minute as usize);
            }
        }
    }
}
