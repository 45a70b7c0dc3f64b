//! Batch fetch orchestrator.
//!
//! A sync of one manufacturer:
//!
//! ```text
//! sync(m) ──► coalesce on m
//!              │
//!              ├─ fleet      TtlCache over the catalog (empty → InvalidManufacturer)
//!              ├─ diff       fleet − active = unconfirmed → add_pending
//!              ├─ batches    chunked by batch_size, in order, inter_batch_delay apart
//!              │    └─ fetch    coalesced on (m, ids), through the rate-limited scheduler
//!              │    └─ confirm  confirm_batch under identifier locks; absent ids stay pending,
//!              │                untracked ids (reset meanwhile) are dropped
//!              └─ report     current active / pending counts
//! ```
//!
//! Upstream errors on a batch become warnings and leave its identifiers
//! pending; a local rate-limit rejection stops further batches. Storage
//! errors fail the sync.

mod batch;
mod report;
mod selection;

pub use batch::{chunk, partition, BatchKey, Partition};
pub use report::SyncReport;
pub use selection::{SelectOutcome, Selection};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cache::{CacheStats, TtlCache};
use crate::catalog::AircraftCatalog;
use crate::clock::Clock;
use crate::coalesce::{CoalescerStats, RequestCoalescer};
use crate::config::{EngineConfig, TrackerConfig};
use crate::error::{TrackError, TrackResult};
use crate::scheduler::{RateLimitedScheduler, SchedulerStats};
use crate::store::{IdentifierLocks, TrackingStore};
use crate::types::{CatalogEntry, Icao24, Manufacturer, PositionReport, TrackedAircraftRecord};
use crate::upstream::PositionSource;

/// Collaborators the tracker drives.
#[derive(Clone)]
pub struct TrackerServices {
    pub catalog: Arc<dyn AircraftCatalog>,
    pub source: Arc<dyn PositionSource>,
    pub store: Arc<dyn TrackingStore>,
    pub clock: Arc<dyn Clock>,
}

/// Counters of the tracker's shared services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackerStats {
    pub scheduler: SchedulerStats,
    pub fleet_cache: CacheStats,
    pub syncs: CoalescerStats,
    pub fetches: CoalescerStats,
}

#[derive(Debug, Default)]
struct BatchOutcome {
    attempted: usize,
    failed: usize,
    warnings: Vec<String>,
}

struct TrackerInner {
    config: TrackerConfig,
    services: TrackerServices,
    scheduler: RateLimitedScheduler,
    fleets: TtlCache<Manufacturer, Arc<Vec<CatalogEntry>>>,
    syncs: RequestCoalescer<Manufacturer, SyncReport>,
    fetches: RequestCoalescer<BatchKey, Arc<Vec<PositionReport>>>,
    locks: IdentifierLocks,
}

/// Moves a manufacturer's aircraft from pending to active.
///
/// Cloning is cheap; clones share the scheduler, caches and coalescers.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

impl Tracker {
    pub fn new(config: &EngineConfig, services: TrackerServices) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                config: config.tracker.clone(),
                scheduler: RateLimitedScheduler::new(&config.scheduler),
                fleets: TtlCache::new(&config.cache),
                syncs: RequestCoalescer::new(config.tracker.coalesce_grace),
                fetches: RequestCoalescer::new(config.tracker.coalesce_grace),
                locks: IdentifierLocks::default(),
                services,
            }),
        }
    }

    /// Confirm the manufacturer's pending aircraft against live data.
    ///
    /// Concurrent calls for the same manufacturer share one run.
    pub async fn sync(&self, manufacturer: &Manufacturer) -> TrackResult<SyncReport> {
        let tracker = self.clone();
        let m = manufacturer.clone();
        self.inner
            .syncs
            .coalesce(manufacturer.clone(), move || async move {
                tracker.run_sync(m).await
            })
            .await
    }

    /// Re-poll the manufacturer's active aircraft and refresh their fixes.
    ///
    /// Aircraft without a new report stay active until the sweeper retires
    /// them.
    pub async fn refresh(&self, manufacturer: &Manufacturer) -> TrackResult<SyncReport> {
        let store = &self.inner.services.store;
        let active = store.get_active(manufacturer.clone()).await?;
        let ids: Vec<Icao24> = active.iter().map(|r| r.icao24).collect();
        let models: HashMap<Icao24, Option<String>> =
            active.into_iter().map(|r| (r.icao24, r.model)).collect();

        debug!(manufacturer = %manufacturer, active = ids.len(), "Refreshing active aircraft");
        let outcome = self.fetch_batches(manufacturer, &ids, &models).await?;
        self.report(manufacturer, outcome).await
    }

    /// Active aircraft of a manufacturer as stored.
    pub async fn get_active(
        &self,
        manufacturer: &Manufacturer,
    ) -> TrackResult<Vec<TrackedAircraftRecord>> {
        self.inner
            .services
            .store
            .get_active(manufacturer.clone())
            .await
    }

    /// Drop everything tracked for a manufacturer and forget its fleet.
    ///
    /// Recent sync and fetch results are forgotten too, so the next sync
    /// starts from the empty store. A sync still in flight only confirms
    /// identifiers that were queued again since.
    pub async fn reset_manufacturer(&self, manufacturer: &Manufacturer) -> TrackResult<usize> {
        let store = &self.inner.services.store;
        let mut ids: Vec<Icao24> = store
            .get_active(manufacturer.clone())
            .await?
            .into_iter()
            .map(|r| r.icao24)
            .collect();
        ids.extend(
            store
                .get_pending(manufacturer.clone())
                .await?
                .into_iter()
                .map(|r| r.icao24),
        );

        let removed = {
            let _guard = self.inner.locks.lock(&ids).await;
            store.reset_manufacturer(manufacturer.clone()).await?
        };
        self.inner.syncs.forget(manufacturer);
        let fetches = self
            .inner
            .fetches
            .forget_where(|key| key.manufacturer() == manufacturer);
        self.inner.fleets.invalidate(manufacturer).await;
        info!(manufacturer = %manufacturer, removed, fetches, "Reset manufacturer");
        Ok(removed)
    }

    /// Interval between polls while a manufacturer is watched.
    pub fn poll_interval(&self) -> Duration {
        self.inner.config.poll_interval
    }

    pub fn stats(&self) -> TrackerStats {
        TrackerStats {
            scheduler: self.inner.scheduler.stats(),
            fleet_cache: self.inner.fleets.stats(),
            syncs: self.inner.syncs.stats(),
            fetches: self.inner.fetches.stats(),
        }
    }

    async fn run_sync(&self, manufacturer: Manufacturer) -> TrackResult<SyncReport> {
        let fleet = self.fleet(&manufacturer).await?;
        if fleet.is_empty() {
            return Err(TrackError::InvalidManufacturer(manufacturer.name().to_string()));
        }

        let store = &self.inner.services.store;
        let now = self.inner.services.clock.now_epoch();
        let active: HashSet<Icao24> = store
            .get_active(manufacturer.clone())
            .await?
            .into_iter()
            .map(|r| r.icao24)
            .collect();

        let mut seen = HashSet::with_capacity(fleet.len());
        let unconfirmed: Vec<Icao24> = fleet
            .iter()
            .map(|entry| entry.icao24)
            .filter(|id| !active.contains(id) && seen.insert(*id))
            .collect();
        let queued = store
            .add_pending(manufacturer.clone(), unconfirmed.clone(), now)
            .await?;

        info!(
            manufacturer = %manufacturer,
            fleet = fleet.len(),
            active = active.len(),
            unconfirmed = unconfirmed.len(),
            queued,
            "Starting sync"
        );

        let models: HashMap<Icao24, Option<String>> = fleet
            .iter()
            .map(|entry| (entry.icao24, entry.model.clone()))
            .collect();
        let outcome = self
            .fetch_batches(&manufacturer, &unconfirmed, &models)
            .await?;
        self.report(&manufacturer, outcome).await
    }

    async fn fleet(&self, manufacturer: &Manufacturer) -> TrackResult<Arc<Vec<CatalogEntry>>> {
        let catalog = Arc::clone(&self.inner.services.catalog);
        let key = manufacturer.clone();
        self.inner
            .fleets
            .get_or_revalidate(manufacturer.clone(), move || async move {
                catalog.fleet(key).await.map(Arc::new)
            })
            .await
    }

    async fn fetch_batches(
        &self,
        manufacturer: &Manufacturer,
        ids: &[Icao24],
        models: &HashMap<Icao24, Option<String>>,
    ) -> TrackResult<BatchOutcome> {
        let batches = chunk(ids, self.inner.config.batch_size);
        let total = batches.len();
        let mut outcome = BatchOutcome::default();

        for (index, batch) in batches.into_iter().enumerate() {
            if index > 0 && !self.inner.config.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inner.config.inter_batch_delay).await;
            }
            outcome.attempted += 1;

            let reports = match self.fetch_batch(manufacturer, &batch).await {
                Ok(reports) => reports,
                Err(e) if e.is_upstream() => {
                    outcome.failed += 1;
                    warn!(
                        manufacturer = %manufacturer,
                        batch = index + 1,
                        total,
                        size = batch.len(),
                        error = %e,
                        "Batch fetch failed, identifiers stay pending"
                    );
                    outcome
                        .warnings
                        .push(format!("batch {}/{}: {}", index + 1, total, e));

                    if matches!(e, TrackError::UpstreamRateLimited { .. }) {
                        let skipped = total - index - 1;
                        if skipped > 0 {
                            outcome.warnings.push(format!(
                                "{skipped} remaining batches skipped until the request budget frees up"
                            ));
                        }
                        break;
                    }
                    continue;
                }
                Err(e) => return Err(e),
            };

            let now = self.inner.services.clock.now_epoch();
            let Partition { confirmed, absent } =
                partition(manufacturer, &batch, &reports, models, now);
            let confirmed_count = confirmed.len();
            if !confirmed.is_empty() {
                let confirmed_ids: Vec<Icao24> = confirmed.iter().map(|r| r.icao24).collect();
                let _guard = self.inner.locks.lock(&confirmed_ids).await;
                self.inner.services.store.confirm_batch(confirmed).await?;
            }
            debug!(
                manufacturer = %manufacturer,
                batch = index + 1,
                total,
                confirmed = confirmed_count,
                absent = absent.len(),
                "Batch applied"
            );
        }
        Ok(outcome)
    }

    async fn fetch_batch(
        &self,
        manufacturer: &Manufacturer,
        batch: &[Icao24],
    ) -> TrackResult<Arc<Vec<PositionReport>>> {
        let key = BatchKey::new(manufacturer.clone(), batch);
        let tracker = self.clone();
        let m = manufacturer.clone();
        let ids = batch.to_vec();
        self.inner
            .fetches
            .coalesce(key, move || async move {
                let source = Arc::clone(&tracker.inner.services.source);
                tracker
                    .inner
                    .scheduler
                    .schedule(|| source.fetch_positions(m.clone(), ids.clone()))
                    .await
                    .map(Arc::new)
            })
            .await
    }

    async fn report(
        &self,
        manufacturer: &Manufacturer,
        outcome: BatchOutcome,
    ) -> TrackResult<SyncReport> {
        let store = &self.inner.services.store;
        let positions = store.get_active(manufacturer.clone()).await?;
        let pending = store.get_pending(manufacturer.clone()).await?;

        let report = SyncReport {
            manufacturer: manufacturer.name().to_string(),
            active_count: positions.len(),
            pending_count: pending.len(),
            positions,
            warnings: outcome.warnings,
            batches_attempted: outcome.attempted,
            batches_failed: outcome.failed,
        };
        info!(
            manufacturer = %manufacturer,
            active = report.active_count,
            pending = report.pending_count,
            batches = report.batches_attempted,
            failed = report.batches_failed,
            "Sync finished"
        );
        Ok(report)
    }
}
