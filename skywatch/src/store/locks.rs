//! Striped per-identifier locks.
//!
//! Identifiers hash onto a fixed set of async mutexes. A batch locks only
//! the stripes it touches, always in ascending stripe order, so two batches
//! with overlapping identifiers serialize and disjoint batches do not block
//! each other.

use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::Icao24;

/// Default number of stripes.
pub const DEFAULT_LOCK_STRIPES: usize = 64;

/// Striped lock set keyed by [`Icao24`].
#[derive(Debug)]
pub struct IdentifierLocks {
    stripes: Vec<Arc<Mutex<()>>>,
}

/// Held stripes; released on drop.
#[derive(Debug)]
pub struct IdentifierGuard {
    held: Vec<OwnedMutexGuard<()>>,
}

impl IdentifierGuard {
    /// Number of stripes held.
    pub fn stripes(&self) -> usize {
        self.held.len()
    }
}

impl Default for IdentifierLocks {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_STRIPES)
    }
}

impl IdentifierLocks {
    pub fn new(stripes: usize) -> Self {
        let stripes = stripes.max(1);
        Self {
            stripes: (0..stripes).map(|_| Arc::new(Mutex::new(()))).collect(),
        }
    }

    fn stripe_of(&self, id: Icao24) -> usize {
        id.raw() as usize % self.stripes.len()
    }

    /// Lock every stripe covering `ids`.
    pub async fn lock(&self, ids: &[Icao24]) -> IdentifierGuard {
        let mut indices: Vec<usize> = ids.iter().map(|id| self.stripe_of(*id)).collect();
        indices.sort_unstable();
        indices.dedup();

        let mut held = Vec::with_capacity(indices.len());
        for index in indices {
            held.push(Arc::clone(&self.stripes[index]).lock_owned().await);
        }
        IdentifierGuard { held }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_duplicate_ids_take_one_stripe() {
        let locks = IdentifierLocks::new(8);
        let guard = locks
            .lock(&[Icao24::new(1), Icao24::new(9), Icao24::new(1)])
            .await;
        // 1 and 9 share stripe 1
        assert_eq!(guard.stripes(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disjoint_batches_do_not_block() {
        let locks = IdentifierLocks::new(8);
        let _held = locks.lock(&[Icao24::new(1)]).await;

        let other =
            tokio::time::timeout(Duration::from_secs(1), locks.lock(&[Icao24::new(2)])).await;
        assert!(other.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_batches_serialize() {
        let locks = Arc::new(IdentifierLocks::new(8));
        let held = locks.lock(&[Icao24::new(1), Icao24::new(2)]).await;

        let blocked =
            tokio::time::timeout(Duration::from_secs(1), locks.lock(&[Icao24::new(2)])).await;
        assert!(blocked.is_err());

        drop(held);
        let acquired =
            tokio::time::timeout(Duration::from_secs(1), locks.lock(&[Icao24::new(2)])).await;
        assert!(acquired.is_ok());
    }
}
