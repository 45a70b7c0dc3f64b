//! Staleness sweeper.
//!
//! Evicts active aircraft whose last contact is older than the stale
//! threshold and occasionally compacts the store. Sweeps never overlap; a
//! sweep that starts while another runs waits for it.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::SweeperConfig;
use crate::error::TrackResult;
use crate::store::TrackingStore;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Active records deleted.
    pub removed: usize,
    /// Whether compaction ran and succeeded.
    pub compacted: bool,
    /// Records with `last_contact` before this epoch were evicted.
    pub threshold_epoch: i64,
}

/// Periodic eviction of stale active aircraft.
pub struct StalenessSweeper {
    store: Arc<dyn TrackingStore>,
    clock: Arc<dyn Clock>,
    stale_threshold: Duration,
    interval: Duration,
    compaction_one_in: u32,
    running: Mutex<()>,
}

impl StalenessSweeper {
    pub fn new(config: &SweeperConfig, store: Arc<dyn TrackingStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            stale_threshold: config.stale_threshold,
            interval: config.interval,
            compaction_one_in: config.compaction_one_in,
            running: Mutex::new(()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Delete every active record older than the threshold.
    ///
    /// Running it twice in a row removes nothing the second time.
    pub async fn sweep(&self) -> TrackResult<SweepReport> {
        let _running = self.running.lock().await;

        let threshold_secs = i64::try_from(self.stale_threshold.as_secs()).unwrap_or(i64::MAX);
        let threshold_epoch = self.clock.now_epoch().saturating_sub(threshold_secs);
        let removed = self.store.delete_stale(threshold_epoch).await?;

        let compacted = if self.should_compact() {
            match self.store.compact().await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Compaction failed");
                    false
                }
            }
        } else {
            false
        };

        if removed > 0 {
            info!(removed, threshold_epoch, compacted, "Evicted stale aircraft");
        } else {
            debug!(threshold_epoch, compacted, "Sweep found nothing stale");
        }
        Ok(SweepReport {
            removed,
            compacted,
            threshold_epoch,
        })
    }

    fn should_compact(&self) -> bool {
        match self.compaction_one_in {
            0 => false,
            1 => true,
            n => rand::rng().random_ratio(1, n),
        }
    }

    /// Sweep every interval until `shutdown` fires.
    ///
    /// The first sweep runs immediately. Missed ticks are skipped, not
    /// replayed.
    pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(interval_secs = self.interval.as_secs(), "Staleness sweeper started");

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => break,

                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep().await {
                            warn!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
            info!("Staleness sweeper stopped");
        })
    }
}
