//! Currently selected manufacturer.

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info};

use super::{SyncReport, Tracker};
use crate::error::TrackResult;
use crate::types::Manufacturer;

/// Result of [`Selection::select`].
#[derive(Debug, Clone, PartialEq)]
pub enum SelectOutcome {
    /// The sync finished while this manufacturer was still selected.
    Applied(SyncReport),
    /// Another selection happened while the sync ran; its result was dropped.
    Superseded,
}

/// Tracks one selected manufacturer at a time.
///
/// A newer selection does not abort an older sync in flight. The older caller
/// gets [`SelectOutcome::Superseded`] once it finishes.
pub struct Selection {
    tracker: Tracker,
    generation: AtomicU64,
    current: Mutex<Option<Manufacturer>>,
}

impl Selection {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            tracker,
            generation: AtomicU64::new(0),
            current: Mutex::new(None),
        }
    }

    /// Make `manufacturer` the selection and sync it.
    pub async fn select(&self, manufacturer: Manufacturer) -> TrackResult<SelectOutcome> {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.current.lock() = Some(manufacturer.clone());
        info!(manufacturer = %manufacturer, generation, "Manufacturer selected");

        let report = self.tracker.sync(&manufacturer).await?;

        if self.generation.load(Ordering::Acquire) != generation {
            debug!(manufacturer = %manufacturer, generation, "Selection superseded, dropping result");
            return Ok(SelectOutcome::Superseded);
        }
        Ok(SelectOutcome::Applied(report))
    }

    /// Clear the selection and drop the manufacturer's tracking state.
    ///
    /// Returns the number of records removed; 0 if nothing was selected.
    pub async fn deselect(&self) -> TrackResult<usize> {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let previous = self.current.lock().take();
        match previous {
            Some(manufacturer) => self.tracker.reset_manufacturer(&manufacturer).await,
            None => Ok(0),
        }
    }

    pub fn current(&self) -> Option<Manufacturer> {
        self.current.lock().clone()
    }
}
