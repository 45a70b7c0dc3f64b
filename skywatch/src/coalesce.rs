//! Request coalescing.
//!
//! Collapses concurrent calls for the same key into one producer call:
//!
//! ```text
//! caller A ─┐
//! caller B ─┼─► register(key) ─► first caller leads ─► spawned producer ─► settle
//! caller C ─┘                   later callers attach ──────────────────────┘
//! ```
//!
//! The producer runs on its own task, so a caller that stops waiting
//! (superseded selection, dropped request) does not abort the call for the
//! others. A successful result stays around for a short grace window and is
//! replayed to callers arriving back-to-back. A failure is delivered to every
//! waiter and the key is cleared at once, so the next call tries again.

use std::hash::Hash;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{TrackError, TrackResult};

type Outcome<V> = Option<TrackResult<V>>;

enum Slot<V> {
    InFlight {
        rx: watch::Receiver<Outcome<V>>,
        generation: u64,
    },
    Settled {
        value: V,
        settled_at: Instant,
        generation: u64,
    },
}

impl<V> Slot<V> {
    fn generation(&self) -> u64 {
        match self {
            Self::InFlight { generation, .. } | Self::Settled { generation, .. } => *generation,
        }
    }
}

/// Outcome of registering interest in a key.
pub enum CoalesceResult<V> {
    /// Caller leads and owns the sender; the `u64` tags the settled slot.
    NewRequest(watch::Sender<Outcome<V>>, u64),
    /// Another caller leads; wait on the receiver.
    Coalesced(watch::Receiver<Outcome<V>>),
    /// A result settled within the grace window.
    Replayed(V),
}

#[derive(Debug, Default)]
struct CoalescerCounters {
    leaders: AtomicU64,
    coalesced: AtomicU64,
    replayed: AtomicU64,
}

/// Coalescer counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoalescerStats {
    /// Producer calls started.
    pub leaders: u64,
    /// Callers that attached to an in-flight call.
    pub coalesced: u64,
    /// Callers served from a settled result.
    pub replayed: u64,
}

/// Deduplicates concurrent calls per key.
pub struct RequestCoalescer<K, V> {
    slots: Arc<DashMap<K, Slot<V>>>,
    grace: Duration,
    generation: AtomicU64,
    stats: CoalescerCounters,
}

impl<K, V> RequestCoalescer<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Coalescer that replays successes for `grace` after they settle.
    pub fn new(grace: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            grace,
            generation: AtomicU64::new(0),
            stats: CoalescerCounters::default(),
        }
    }

    /// Register interest in `key`.
    ///
    /// The decision and the slot update happen under the key's shard lock.
    pub fn register(&self, key: &K) -> CoalesceResult<V> {
        match self.slots.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let attach = match occupied.get() {
                    // a leader that vanished without settling leaves a closed channel
                    Slot::InFlight { rx, .. } if rx.has_changed().is_ok() => Some(rx.clone()),
                    Slot::Settled {
                        value, settled_at, ..
                    } if settled_at.elapsed() < self.grace => {
                        self.stats.replayed.fetch_add(1, Ordering::Relaxed);
                        return CoalesceResult::Replayed(value.clone());
                    }
                    _ => None,
                };
                match attach {
                    Some(rx) => {
                        self.stats.coalesced.fetch_add(1, Ordering::Relaxed);
                        CoalesceResult::Coalesced(rx)
                    }
                    None => {
                        let (tx, rx) = watch::channel(None);
                        let generation = self.lead();
                        occupied.insert(Slot::InFlight { rx, generation });
                        CoalesceResult::NewRequest(tx, generation)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let (tx, rx) = watch::channel(None);
                let generation = self.lead();
                vacant.insert(Slot::InFlight { rx, generation });
                CoalesceResult::NewRequest(tx, generation)
            }
        }
    }

    fn lead(&self) -> u64 {
        self.stats.leaders.fetch_add(1, Ordering::Relaxed);
        self.generation.fetch_add(1, Ordering::Relaxed)
    }

    /// Drop the slot of `key` so the next call starts a fresh producer.
    ///
    /// A producer already running still answers the callers attached to it,
    /// but its result is no longer replayed. Returns whether a slot existed.
    pub fn forget(&self, key: &K) -> bool {
        self.slots.remove(key).is_some()
    }

    /// [`forget`](Self::forget) every key matching `predicate`. Returns slots
    /// dropped.
    pub fn forget_where(&self, mut predicate: impl FnMut(&K) -> bool) -> usize {
        let mut dropped = 0;
        self.slots.retain(|key, _| {
            let forget = predicate(key);
            if forget {
                dropped += 1;
            }
            !forget
        });
        dropped
    }

    /// Run `producer` once for all concurrent callers of `key`.
    ///
    /// A panicking producer settles as [`TrackError::TaskFailed`].
    pub async fn coalesce<F, Fut>(&self, key: K, producer: F) -> TrackResult<V>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = TrackResult<V>> + Send + 'static,
    {
        match self.register(&key) {
            CoalesceResult::Replayed(value) => Ok(value),
            CoalesceResult::Coalesced(rx) => wait(rx).await,
            CoalesceResult::NewRequest(tx, generation) => {
                let rx = tx.subscribe();
                let work = producer();
                let slots = Arc::clone(&self.slots);
                let grace = self.grace;
                tokio::spawn(async move {
                    let result = match AssertUnwindSafe(work).catch_unwind().await {
                        Ok(result) => result,
                        Err(_) => Err(TrackError::TaskFailed("producer panicked".to_string())),
                    };
                    settle(slots, grace, key, tx, generation, result).await;
                });
                wait(rx).await
            }
        }
    }

    /// Keys with an in-flight or settled slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Whether a producer call for `key` is currently running.
    pub fn is_in_flight(&self, key: &K) -> bool {
        self.slots
            .get(key)
            .map(|slot| matches!(*slot, Slot::InFlight { .. }))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> CoalescerStats {
        CoalescerStats {
            leaders: self.stats.leaders.load(Ordering::Relaxed),
            coalesced: self.stats.coalesced.load(Ordering::Relaxed),
            replayed: self.stats.replayed.load(Ordering::Relaxed),
        }
    }
}

async fn settle<K, V>(
    slots: Arc<DashMap<K, Slot<V>>>,
    grace: Duration,
    key: K,
    tx: watch::Sender<Outcome<V>>,
    generation: u64,
    result: TrackResult<V>,
) where
    K: Clone + Eq + Hash,
    V: Clone,
{
    // a forgotten slot may have been taken over by a newer leader
    match result {
        Ok(value) if !grace.is_zero() => {
            let kept = match slots.get_mut(&key) {
                Some(mut slot) if slot.generation() == generation => {
                    *slot = Slot::Settled {
                        value: value.clone(),
                        settled_at: Instant::now(),
                        generation,
                    };
                    true
                }
                _ => false,
            };
            tx.send_replace(Some(Ok(value)));
            drop(tx);

            if !kept {
                debug!(generation, "Forgotten request settled, result not replayed");
                return;
            }
            tokio::time::sleep(grace).await;
            slots.remove_if(&key, |_, slot| {
                matches!(slot, Slot::Settled { generation: g, .. } if *g == generation)
            });
        }
        other => {
            slots.remove_if(&key, |_, slot| slot.generation() == generation);
            tx.send_replace(Some(other));
        }
    }
}

async fn wait<V: Clone>(mut rx: watch::Receiver<Outcome<V>>) -> TrackResult<V> {
    let settled = rx
        .wait_for(Option::is_some)
        .await
        .map_err(|_| TrackError::TaskFailed("coalesced request abandoned".to_string()))?;
    settled
        .clone()
        .unwrap_or_else(|| Err(TrackError::TaskFailed("coalesced request abandoned".to_string())))
}
