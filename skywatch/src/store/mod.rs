//! Tracking state storage.
//!
//! Every identifier moves through
//!
//! ```text
//! unknown ──add_pending──► pending ──confirm_batch──► active ──delete_stale──► (gone)
//!                             ▲                         │
//!                             └──── reset / requeue ────┘
//! ```
//!
//! and sits in at most one of `pending` and `active`. Batch operations are
//! all-or-nothing: a failed batch leaves storage as it was.

mod locks;
mod memory;
mod sqlite;

pub use locks::{IdentifierLocks, DEFAULT_LOCK_STRIPES};
pub use memory::InMemoryTrackingStore;
pub use sqlite::{SqliteDatabase, SqliteTrackingStore};

use crate::error::TrackResult;
use crate::types::{Icao24, Manufacturer, PendingAircraftRecord, TrackedAircraftRecord};
use crate::BoxFuture;

/// Storage for pending and active aircraft.
///
/// Methods take owned arguments so implementations can move work onto
/// blocking threads.
pub trait TrackingStore: Send + Sync {
    /// Insert or refresh active records. Returns rows written.
    fn upsert_active_batch(
        &self,
        records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>>;

    /// Drop identifiers from `pending`. Returns rows removed.
    fn remove_pending(&self, ids: Vec<Icao24>) -> BoxFuture<'_, TrackResult<usize>>;

    /// Queue identifiers that are neither pending nor active.
    ///
    /// Returns how many were newly queued.
    fn add_pending(
        &self,
        manufacturer: Manufacturer,
        ids: Vec<Icao24>,
        enqueued_at: i64,
    ) -> BoxFuture<'_, TrackResult<usize>>;

    /// Upsert `records` into `active` and remove them from `pending`, as one
    /// transaction. Returns records confirmed.
    ///
    /// Only identifiers currently pending or active for the record's
    /// manufacturer are confirmed; the rest are dropped.
    fn confirm_batch(
        &self,
        records: Vec<TrackedAircraftRecord>,
    ) -> BoxFuture<'_, TrackResult<usize>>;

    /// Active records for a manufacturer, ordered by identifier.
    fn get_active(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<TrackedAircraftRecord>>>;

    /// Pending records for a manufacturer, ordered by identifier.
    fn get_pending(
        &self,
        manufacturer: Manufacturer,
    ) -> BoxFuture<'_, TrackResult<Vec<PendingAircraftRecord>>>;

    /// Delete every active record with `last_contact < threshold_epoch`.
    fn delete_stale(&self, threshold_epoch: i64) -> BoxFuture<'_, TrackResult<usize>>;

    /// Clear pending and active records of a manufacturer.
    fn reset_manufacturer(&self, manufacturer: Manufacturer) -> BoxFuture<'_, TrackResult<usize>>;

    /// Reclaim space and refresh planner statistics.
    fn compact(&self) -> BoxFuture<'_, TrackResult<()>>;
}
