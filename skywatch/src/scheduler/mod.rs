//! Rate-limited scheduler for upstream calls.
//!
//! Every outbound call goes through [`RateLimitedScheduler::schedule`]:
//!
//! ```text
//! caller ──► FIFO gate ──► concurrency permit ──► minute/day windows ──► task
//!              (fair mutex)   (semaphore)           (sleep until a slot frees)
//! ```
//!
//! The gate is held until the call is admitted, so callers are admitted in
//! submission order. The permit is held for the duration of the attempt. A
//! retried attempt is admitted again and counts against both ceilings.
//!
//! If the wait for a window slot would exceed the configured queue wait, the
//! call is rejected with [`TrackError::UpstreamRateLimited`] instead of
//! queueing for hours behind an exhausted daily budget.

mod policy;
mod window;

pub use policy::{RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER};
pub use window::{RateWindow, DAY, MINUTE};

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::config::SchedulerConfig;
use crate::error::{TrackError, TrackResult};

/// Throttles, queues and retries upstream calls.
#[derive(Debug)]
pub struct RateLimitedScheduler {
    gate: Mutex<RateWindow>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    request_timeout: Duration,
    max_queue_wait: Duration,
    retry: RetryPolicy,
    stats: SchedulerCounters,
}

#[derive(Debug, Default)]
struct SchedulerCounters {
    admitted: AtomicU64,
    succeeded: AtomicU64,
    retried: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    queued: AtomicUsize,
}

/// Point-in-time scheduler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Attempts that passed admission (retries included).
    pub admitted: u64,
    pub succeeded: u64,
    /// Attempts that failed and were retried.
    pub retried: u64,
    /// Calls that surfaced an error after admission.
    pub failed: u64,
    /// Calls rejected before leaving the process.
    pub rejected: u64,
    /// Callers currently waiting for admission.
    pub queued: usize,
    /// Attempts currently holding a concurrency permit.
    pub in_flight: usize,
}

/// Decrements the queued counter when admission finishes or is abandoned.
struct QueueSlot<'a>(&'a AtomicUsize);

impl<'a> QueueSlot<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter)
    }
}

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

impl RateLimitedScheduler {
    pub fn new(config: &SchedulerConfig) -> Self {
        let max_concurrent = config.max_concurrent_requests.max(1);
        Self {
            gate: Mutex::new(RateWindow::new(
                config.requests_per_minute,
                config.requests_per_day,
            )),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            request_timeout: config.request_timeout,
            max_queue_wait: config.max_queue_wait,
            retry: config.retry.clone(),
            stats: SchedulerCounters::default(),
        }
    }

    /// Run `task` under the rate limits, retrying transient failures.
    ///
    /// `task` is called once per attempt. Each attempt is bounded by the
    /// request timeout; an elapsed timeout counts as
    /// [`TrackError::UpstreamTimeout`].
    pub async fn schedule<T, F, Fut>(&self, mut task: F) -> TrackResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = TrackResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let permit = self.admit().await?;

            let result = match timeout(self.request_timeout, task()).await {
                Ok(result) => result,
                Err(_) => Err(TrackError::UpstreamTimeout(self.request_timeout)),
            };
            drop(permit);

            let err = match result {
                Ok(value) => {
                    self.stats.succeeded.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                }
                Err(err) => err,
            };

            let delay = if err.is_retryable() {
                self.retry.delay_for_attempt(attempt)
            } else {
                None
            };
            match delay {
                Some(delay) => {
                    self.stats.retried.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        attempt,
                        max_attempts = self.retry.max_attempts(),
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Upstream call failed, retrying"
                    );
                    sleep(delay).await;
                }
                None => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    return Err(err);
                }
            }
        }
    }

    async fn admit(&self) -> TrackResult<OwnedSemaphorePermit> {
        let _queued = QueueSlot::enter(&self.stats.queued);

        let mut window = self.gate.lock().await;
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| TrackError::TaskFailed("scheduler closed".to_string()))?;

        loop {
            match window.try_admit(Instant::now()) {
                Ok(()) => {
                    self.stats.admitted.fetch_add(1, Ordering::Relaxed);
                    return Ok(permit);
                }
                Err(wait) if wait > self.max_queue_wait => {
                    self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        retry_after_secs = wait.as_secs(),
                        "Upstream request budget exhausted, rejecting call"
                    );
                    return Err(TrackError::UpstreamRateLimited { retry_after: wait });
                }
                Err(wait) => {
                    debug!(
                        wait_ms = wait.as_millis() as u64,
                        "Rate window full, waiting for a slot"
                    );
                    sleep(wait).await;
                }
            }
        }
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            admitted: self.stats.admitted.load(Ordering::Relaxed),
            succeeded: self.stats.succeeded.load(Ordering::Relaxed),
            retried: self.stats.retried.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
            rejected: self.stats.rejected.load(Ordering::Relaxed),
            queued: self.stats.queued.load(Ordering::Relaxed),
            in_flight: self
                .max_concurrent
                .saturating_sub(self.permits.available_permits()),
        }
    }
}
