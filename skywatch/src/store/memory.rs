//! In-memory [`TrackingStore`].

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use parking_lot::RwLock;

use super::TrackingStore;
use crate::error::TrackResult;
use crate::types::{
    Icao24, Manufacturer, PendingAircraftRecord, TrackedAircraft, TrackedAircraftRecord,
};
use crate::BoxFuture;

/// Keeps one [`TrackedAircraft`] per identifier.
///
/// Every operation is a single critical section and never awaits while
/// holding the lock.
#[derive(Debug, Default)]
pub struct InMemoryTrackingStore {
    aircraft: RwLock<HashMap<Icao24, TrackedAircraft>>,
}

impl InMemoryTrackingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked identifiers in either phase.
    pub fn len(&self) -> usize {
        self.aircraft.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.read().is_empty()
    }

    /// Phase snapshot of one identifier.
    pub fn lookup(&self, icao24: Icao24) -> Option<TrackedAircraft> {
        self.aircraft.read().get(&icao24).cloned()
    }

    fn upsert(
        map: &mut HashMap<Icao24, TrackedAircraft>,
        records: Vec<TrackedAircraftRecord>,
    ) -> usize {
        let count = records.len();
        for record in records {
            let next = match map.remove(&record.icao24) {
                Some(existing) => existing.confirm(record),
                None => TrackedAircraft::from_record(record),
            };
            map.insert(next.icao24, next);
        }
        count
    }
}

impl TrackingStore for InMemoryTrackingStore {
    fn upsert_active_batch(
        &self,
        records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(async move {
            let mut map = self.aircraft.write();
            Ok(Self::upsert(&mut map, records))
        })
    }

    fn remove_pending(&self, ids: Vec<Icao24>) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(async move {
            let mut map = self.aircraft.write();
            let mut removed = 0;
            for id in ids {
                if map.get(&id).is_some_and(TrackedAircraft::is_pending) {
                    map.remove(&id);
                    removed += 1;
                }
            }
            Ok(removed)
        })
    }

    fn add_pending(
        &self,
        manufacturer: Manufacturer,
        ids: Vec<Icao24>,
        enqueued_at: i64,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(async move {
            let mut map = self.aircraft.write();
            let mut added = 0;
            for id in ids {
                if let Entry::Vacant(slot) = map.entry(id) {
                    slot.insert(TrackedAircraft::pending(
                        id,
                        manufacturer.clone(),
                        enqueued_at,
                    ));
                    added += 1;
                }
            }
            Ok(added)
        })
    }

    fn confirm_batch(
        &self,
        records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(async move {
            let mut map = self.aircraft.write();
            let tracked: Vec<_> = records
                .into_iter()
                .filter(|r| {
                    map.get(&r.icao24)
                        .is_some_and(|a| a.manufacturer == r.manufacturer)
                })
                .collect();
            // replacing the entry retires the pending phase too
            Ok(Self::upsert(&mut map, tracked))
        })
    }

    fn get_active(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<TrackedAircraftRecord>>> {
        Box::pin(async move {
            let map = self.aircraft.read();
            let mut records: Vec<_> = map
                .values()
                .filter(|a| a.manufacturer == manufacturer)
                .filter_map(TrackedAircraft::as_active_record)
                .collect();
            records.sort_by_key(|r| r.icao24);
            Ok(records)
        })
    }

    fn get_pending(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<PendingAircraftRecord>>> {
        Box::pin(async move {
            let map = self.aircraft.read();
            let mut records: Vec<_> = map
                .values()
                .filter(|a| a.manufacturer == manufacturer)
                .filter_map(TrackedAircraft::as_pending_record)
                .collect();
            records.sort_by_key(|r| r.icao24);
            Ok(records)
        })
    }

    fn delete_stale(&self, threshold_epoch: i64) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(async move {
            let mut map = self.aircraft.write();
            let before = map.len();
            map.retain(|_, a| !a.is_stale(threshold_epoch));
            Ok(before - map.len())
        })
    }

    fn reset_manufacturer(&self, manufacturer: Manufacturer) -> BoxFuture<'_, TrackResult<usize>> {
        Box::pin(async move {
            let mut map = self.aircraft.write();
            let before = map.len();
            map.retain(|_, a| a.manufacturer != manufacturer);
            Ok(before - map.len())
        })
    }

    fn compact(&self) -> BoxFuture<'_, TrackResult<()>> {
        Box::pin(async move {
            self.aircraft.write().shrink_to_fit();
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Position;

    fn boeing() -> Manufacturer {
        Manufacturer::new("Boeing").unwrap()
    }

    fn airbus() -> Manufacturer {
        Manufacturer::new("Airbus").unwrap()
    }

    fn live(id: u32, manufacturer: Manufacturer, last_contact: i64) -> TrackedAircraftRecord {
        TrackedAircraftRecord {
            icao24: Icao24::new(id),
            manufacturer,
            model: None,
            position: Position::new(51.47, -0.45),
            on_ground: false,
            last_contact,
            updated_at: last_contact,
        }
    }

    #[tokio::test]
    async fn test_add_pending_skips_known_ids() {
        let store = InMemoryTrackingStore::new();
        store
            .upsert_active_batch(vec![live(1, boeing(), 100)])
            .await
            .unwrap();

        let added = store
            .add_pending(boeing(), vec![Icao24::new(1), Icao24::new(2)], 50)
            .await
            .unwrap();
        assert_eq!(added, 1);

        // second enqueue is a no-op
        let added = store
            .add_pending(boeing(), vec![Icao24::new(2)], 60)
            .await
            .unwrap();
        assert_eq!(added, 0);

        assert!(store.lookup(Icao24::new(1)).unwrap().is_active());
        let pending = store.get_pending(boeing()).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].enqueued_at, 50);
    }

    #[tokio::test]
    async fn test_confirm_moves_pending_to_active() {
        let store = InMemoryTrackingStore::new();
        store
            .add_pending(boeing(), vec![Icao24::new(1), Icao24::new(2)], 10)
            .await
            .unwrap();

        let confirmed = store
            .confirm_batch(vec![live(2, boeing(), 20)])
            .await
            .unwrap();
        assert_eq!(confirmed, 1);

        let active = store.get_active(boeing()).await.unwrap();
        let pending = store.get_pending(boeing()).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].icao24, Icao24::new(2));
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].icao24, Icao24::new(1));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_confirm_skips_untracked_ids() {
        let store = InMemoryTrackingStore::new();
        store
            .add_pending(boeing(), vec![Icao24::new(1), Icao24::new(2)], 10)
            .await
            .unwrap();
        store.reset_manufacturer(boeing()).await.unwrap();
        store
            .add_pending(boeing(), vec![Icao24::new(2)], 20)
            .await
            .unwrap();

        // id 1 was reset, id 3 was never queued, id 2 belongs to another maker
        let confirmed = store
            .confirm_batch(vec![
                live(1, boeing(), 30),
                live(3, boeing(), 30),
                live(2, airbus(), 30),
            ])
            .await
            .unwrap();
        assert_eq!(confirmed, 0);
        assert!(store.lookup(Icao24::new(1)).is_none());
        assert!(store.lookup(Icao24::new(2)).unwrap().is_pending());

        let confirmed = store
            .confirm_batch(vec![live(2, boeing(), 40)])
            .await
            .unwrap();
        assert_eq!(confirmed, 1);
        assert!(store.lookup(Icao24::new(2)).unwrap().is_active());
    }

    #[tokio::test]
    async fn test_remove_pending_leaves_active() {
        let store = InMemoryTrackingStore::new();
        store
            .add_pending(boeing(), vec![Icao24::new(1)], 10)
            .await
            .unwrap();
        store
            .upsert_active_batch(vec![live(2, boeing(), 20)])
            .await
            .unwrap();

        let removed = store
            .remove_pending(vec![Icao24::new(1), Icao24::new(2)])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.lookup(Icao24::new(2)).is_some());
    }

    #[tokio::test]
    async fn test_delete_stale_is_idempotent() {
        let store = InMemoryTrackingStore::new();
        store
            .upsert_active_batch(vec![live(1, boeing(), 1_000), live(2, boeing(), 9_000)])
            .await
            .unwrap();
        store
            .add_pending(boeing(), vec![Icao24::new(3)], 0)
            .await
            .unwrap();

        assert_eq!(store.delete_stale(5_000).await.unwrap(), 1);
        assert_eq!(store.delete_stale(5_000).await.unwrap(), 0);

        // pending entries never go stale
        assert!(store.lookup(Icao24::new(3)).unwrap().is_pending());
        assert!(store.lookup(Icao24::new(1)).is_none());
    }

    #[tokio::test]
    async fn test_reset_manufacturer_only_touches_its_own() {
        let store = InMemoryTrackingStore::new();
        store
            .upsert_active_batch(vec![live(1, boeing(), 10), live(2, airbus(), 10)])
            .await
            .unwrap();
        store
            .add_pending(boeing(), vec![Icao24::new(3)], 0)
            .await
            .unwrap();

        let removed = store.reset_manufacturer(boeing()).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.get_active(airbus()).await.unwrap().len(), 1);
        assert!(store.get_active(boeing()).await.unwrap().is_empty());
    }
}
