//! End-to-end sync scenarios over in-memory collaborators.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use skywatch::catalog::InMemoryCatalog;
use skywatch::clock::ManualClock;
use skywatch::config::{EngineConfig, SchedulerConfig, TrackerConfig};
use skywatch::scheduler::RetryPolicy;
use skywatch::store::{InMemoryTrackingStore, SqliteDatabase, SqliteTrackingStore, TrackingStore};
use skywatch::types::{
    CatalogEntry, PendingAircraftRecord, Position, PositionReport, TrackedAircraftRecord,
};
use skywatch::upstream::PositionSource;
use skywatch::{
    BoxFuture, Icao24, Manufacturer, SelectOutcome, Selection, TrackError, TrackResult, Tracker,
    TrackerServices,
};

const NOW: i64 = 1_700_000_000;

/// Upstream that reports a fixed set of identifiers as live.
struct FakeSource {
    live: HashSet<Icao24>,
    delay: Duration,
    fail: bool,
    calls: AtomicUsize,
}

impl FakeSource {
    fn live(ids: &[Icao24]) -> Self {
        Self {
            live: ids.iter().copied().collect(),
            delay: Duration::ZERO,
            fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::live(&[])
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl PositionSource for FakeSource {
    fn fetch_positions(
        &self,
        _manufacturer: Manufacturer,
        ids: Vec<Icao24>,
    ) -> BoxFuture<'_, TrackResult<Vec<PositionReport>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(TrackError::UpstreamUnavailable("HTTP 503".to_string()));
            }
            Ok(ids
                .into_iter()
                .filter(|id| self.live.contains(id))
                .map(|icao24| PositionReport {
                    icao24,
                    position: Position::new(47.45, -122.31),
                    on_ground: false,
                    last_contact: NOW - 5,
                })
                .collect())
        })
    }
}

/// Store whose batch confirmation always fails.
struct BrokenConfirmStore {
    inner: InMemoryTrackingStore,
}

impl TrackingStore for BrokenConfirmStore {
    fn upsert_active_batch(
        &self,
        records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        self.inner.upsert_active_batch(records)
    }

    fn remove_pending(&self, ids: Vec<Icao24>) -> BoxFuture<'_, TrackResult<usize>> {
        self.inner.remove_pending(ids)
    }

    fn add_pending(
        &self,
        manufacturer: Manufacturer,
        ids: Vec<Icao24>,
        enqueued_at: i64,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        self.inner.add_pending(manufacturer, ids, enqueued_at)
    }

    fn confirm_batch(
        &self,
        _records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(async {
            Err(TrackError::StorageTransactionFailed(
                "database is locked".to_string(),
            ))
        })
    }

    fn get_active(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<TrackedAircraftRecord>>> {
        self.inner.get_active(manufacturer)
    }

    fn get_pending(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<PendingAircraftRecord>>> {
        self.inner.get_pending(manufacturer)
    }

    fn delete_stale(&self, threshold_epoch: i64) -> BoxFuture<'_, TrackResult<usize>> {
        self.inner.delete_stale(threshold_epoch)
    }

    fn reset_manufacturer(&self, manufacturer: Manufacturer) -> BoxFuture<'_, TrackResult<usize>> {
        self.inner.reset_manufacturer(manufacturer)
    }

    fn compact(&self) -> BoxFuture<'_, TrackResult<()>> {
        self.inner.compact()
    }
}

struct Harness {
    tracker: Tracker,
    store: Arc<InMemoryTrackingStore>,
    source: Arc<FakeSource>,
}

fn id(raw: u32) -> Icao24 {
    Icao24::new(raw)
}

fn boeing() -> Manufacturer {
    Manufacturer::new("Boeing").unwrap()
}

fn airbus() -> Manufacturer {
    Manufacturer::new("Airbus").unwrap()
}

fn catalog() -> InMemoryCatalog {
    InMemoryCatalog::from_entries([
        CatalogEntry::new(id(0xa), "Boeing", Some("737-800".to_string())),
        CatalogEntry::new(id(0xb), "Boeing", Some("777-300ER".to_string())),
        CatalogEntry::new(id(0xc), "Boeing", None),
        CatalogEntry::new(id(0x1a), "Airbus", Some("A320neo".to_string())),
    ])
    .unwrap()
}

fn config() -> EngineConfig {
    EngineConfig {
        scheduler: SchedulerConfig::default().with_retry(RetryPolicy::None),
        tracker: TrackerConfig::default().with_inter_batch_delay(Duration::ZERO),
        ..EngineConfig::default()
    }
}

fn tracker_over(
    config: &EngineConfig,
    store: Arc<dyn TrackingStore>,
    source: Arc<FakeSource>,
) -> Tracker {
    Tracker::new(
        config,
        TrackerServices {
            catalog: Arc::new(catalog()),
            source,
            store,
            clock: Arc::new(ManualClock::new(NOW)),
        },
    )
}

fn harness(source: FakeSource) -> Harness {
    let store = Arc::new(InMemoryTrackingStore::new());
    let source = Arc::new(source);
    let services = TrackerServices {
        catalog: Arc::new(catalog()),
        source: source.clone(),
        store: store.clone(),
        clock: Arc::new(ManualClock::new(NOW)),
    };
    Harness {
        tracker: Tracker::new(&config(), services),
        store,
        source,
    }
}

#[tokio::test(start_paused = true)]
async fn test_sync_confirms_live_and_keeps_absent_pending() {
    let h = harness(FakeSource::live(&[id(0xa), id(0xc)]));

    let report = h.tracker.sync(&boeing()).await.unwrap();

    assert_eq!(report.active_count, 2);
    assert_eq!(report.pending_count, 1);
    assert_eq!(report.status(), "2 active, 1 pending");
    let active: Vec<Icao24> = report.positions.iter().map(|r| r.icao24).collect();
    assert_eq!(active, vec![id(0xa), id(0xc)]);
    assert_eq!(report.positions[0].model.as_deref(), Some("737-800"));

    let pending = h.store.get_pending(boeing()).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].icao24, id(0xb));
    assert!(h.store.lookup(id(0xb)).unwrap().is_pending());
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_syncs_share_one_upstream_call() {
    let h = harness(FakeSource::live(&[id(0xa)]).with_delay(Duration::from_millis(200)));
    let m = boeing();

    let (first, second) = tokio::join!(h.tracker.sync(&m), h.tracker.sync(&m));

    assert_eq!(first.unwrap(), second.unwrap());
    assert_eq!(h.source.calls(), 1);
    assert_eq!(h.tracker.stats().syncs.coalesced, 1);
}

#[tokio::test(start_paused = true)]
async fn test_upstream_failure_leaves_everything_pending() {
    let h = harness(FakeSource::failing());

    let report = h.tracker.sync(&boeing()).await.unwrap();

    assert_eq!(report.active_count, 0);
    assert_eq!(report.pending_count, 3);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.status(), "0 active, 3 pending - will retry");
    assert!(report.warnings[0].starts_with("batch 1/1:"));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_manufacturer_is_rejected() {
    let h = harness(FakeSource::live(&[]));

    let err = h
        .tracker
        .sync(&Manufacturer::new("Zeppelin").unwrap())
        .await
        .unwrap_err();

    assert_eq!(err, TrackError::InvalidManufacturer("Zeppelin".to_string()));
    assert_eq!(h.source.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_refresh_updates_active_without_evicting_absent() {
    let h = harness(FakeSource::live(&[id(0xa), id(0xc)]));
    h.tracker.sync(&boeing()).await.unwrap();

    let report = h.tracker.refresh(&boeing()).await.unwrap();

    assert_eq!(report.active_count, 2);
    assert_eq!(h.tracker.get_active(&boeing()).await.unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_reset_clears_pending_and_active() {
    let h = harness(FakeSource::live(&[id(0xa)]));
    h.tracker.sync(&boeing()).await.unwrap();

    let removed = h.tracker.reset_manufacturer(&boeing()).await.unwrap();

    assert_eq!(removed, 3);
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_batches_are_chunked() {
    let store = Arc::new(InMemoryTrackingStore::new());
    let source = Arc::new(FakeSource::live(&[id(0xa), id(0xb), id(0xc)]));
    let mut config = config();
    config.tracker = config.tracker.with_batch_size(2);
    let tracker = Tracker::new(
        &config,
        TrackerServices {
            catalog: Arc::new(catalog()),
            source: source.clone(),
            store,
            clock: Arc::new(ManualClock::new(NOW)),
        },
    );

    let report = tracker.sync(&boeing()).await.unwrap();

    assert_eq!(report.batches_attempted, 2);
    assert_eq!(report.active_count, 3);
    assert_eq!(source.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_newer_selection_supersedes_older_sync() {
    let h = harness(FakeSource::live(&[id(0xa), id(0x1a)]).with_delay(Duration::from_millis(100)));
    let selection = Arc::new(Selection::new(h.tracker.clone()));

    let older = {
        let selection = selection.clone();
        tokio::spawn(async move { selection.select(boeing()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    let newer = selection.select(airbus()).await.unwrap();

    assert_eq!(older.await.unwrap().unwrap(), SelectOutcome::Superseded);
    assert!(matches!(newer, SelectOutcome::Applied(ref r) if r.active_count == 1));
    assert_eq!(selection.current(), Some(airbus()));

    // the superseded sync still completed its writes
    assert!(h.store.lookup(id(0xa)).unwrap().is_active());

    let removed = selection.deselect().await.unwrap();
    assert_eq!(removed, 1);
    assert_eq!(selection.current(), None);
    assert_eq!(selection.deselect().await.unwrap(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sync_right_after_reset_starts_over() {
    let h = harness(FakeSource::live(&[id(0xa), id(0xc)]));
    assert_eq!(h.tracker.sync(&boeing()).await.unwrap().active_count, 2);

    h.tracker.reset_manufacturer(&boeing()).await.unwrap();
    // still inside the replay window of the first sync
    let report = h.tracker.sync(&boeing()).await.unwrap();

    let stored = h.tracker.get_active(&boeing()).await.unwrap();
    assert_eq!(report.active_count, stored.len());
    assert_eq!(report.active_count, 2);
    assert_eq!(report.pending_count, 1);
    assert_eq!(h.source.calls(), 2);
    assert_eq!(h.tracker.stats().syncs.replayed, 0);
    assert_eq!(h.tracker.stats().fetches.replayed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reset_during_sync_is_not_undone() {
    let h = harness(FakeSource::live(&[id(0xa), id(0xc)]).with_delay(Duration::from_millis(500)));

    let in_flight = {
        let tracker = h.tracker.clone();
        tokio::spawn(async move { tracker.sync(&boeing()).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.tracker.reset_manufacturer(&boeing()).await.unwrap(), 3);

    let report = in_flight.await.unwrap().unwrap();
    assert_eq!(report.active_count, 0);
    assert_eq!(report.pending_count, 0);
    assert!(h.store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_storage_failure_fails_the_sync() {
    let store = Arc::new(BrokenConfirmStore {
        inner: InMemoryTrackingStore::new(),
    });
    let source = Arc::new(FakeSource::live(&[id(0xa)]));
    let tracker = tracker_over(&config(), store.clone(), source);

    let err = tracker.sync(&boeing()).await.unwrap_err();

    assert!(matches!(err, TrackError::StorageTransactionFailed(_)));
    // nothing was promoted
    assert!(store.inner.get_active(boeing()).await.unwrap().is_empty());
    assert_eq!(store.inner.get_pending(boeing()).await.unwrap().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_budget_skips_remaining_batches() {
    let source = Arc::new(FakeSource::live(&[id(0xa), id(0xb), id(0xc)]));
    let mut config = config();
    config.scheduler = config
        .scheduler
        .with_requests_per_minute(1)
        .with_max_queue_wait(Duration::from_secs(10));
    config.tracker = config.tracker.with_batch_size(1);
    let store = Arc::new(InMemoryTrackingStore::new());
    let tracker = tracker_over(&config, store, source.clone());

    let report = tracker.sync(&boeing()).await.unwrap();

    assert_eq!(source.calls(), 1);
    assert_eq!(report.batches_attempted, 2);
    assert_eq!(report.batches_failed, 1);
    assert_eq!(report.active_count, 1);
    assert_eq!(report.pending_count, 2);
    assert!(report.warnings[0].starts_with("batch 2/3:"));
    assert_eq!(
        report.warnings[1],
        "1 remaining batches skipped until the request budget frees up"
    );
    assert_eq!(tracker.stats().scheduler.rejected, 1);
}

#[tokio::test]
async fn test_sqlite_store_keeps_pending_and_active_disjoint() {
    let store = Arc::new(SqliteTrackingStore::new(
        SqliteDatabase::open_in_memory().unwrap(),
    ));
    let source = Arc::new(FakeSource::live(&[id(0xa), id(0xc)]));
    let mut config = config();
    config.tracker = config.tracker.with_coalesce_grace(Duration::ZERO);
    let tracker = tracker_over(&config, store.clone(), source.clone());

    for _ in 0..2 {
        let report = tracker.sync(&boeing()).await.unwrap();
        assert_eq!(report.status(), "2 active, 1 pending");

        let active: HashSet<Icao24> = store
            .get_active(boeing())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.icao24)
            .collect();
        let pending: HashSet<Icao24> = store
            .get_pending(boeing())
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.icao24)
            .collect();
        assert!(active.is_disjoint(&pending));
        assert_eq!(active, HashSet::from([id(0xa), id(0xc)]));
        assert_eq!(pending, HashSet::from([id(0xb)]));
    }
    // the second round only asked about the one still pending
    assert_eq!(source.calls(), 2);
}
