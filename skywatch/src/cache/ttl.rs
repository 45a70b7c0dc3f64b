//! [`TtlCache`] backed by `moka::future::Cache`.
//!
//! moka bounds the entry count and drops entries past the hard expiry.
//! Freshness is computed here from the write instant of each entry.

use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use moka::future::Cache;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::coalesce::RequestCoalescer;
use crate::config::CacheConfig;
use crate::error::TrackResult;

#[derive(Clone)]
struct CacheEntry<V> {
    value: V,
    written_at: Instant,
}

/// Phase of a cache hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// Past the fresh TTL but not yet expired.
    Stale,
}

/// A value read from the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct Cached<V> {
    pub value: V,
    pub freshness: Freshness,
    pub age: Duration,
}

#[derive(Debug, Default)]
struct CacheCounters {
    hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    revalidations: AtomicU64,
    revalidation_failures: AtomicU64,
}

/// Cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub stale_hits: u64,
    /// Reads that found nothing usable (missing or expired).
    pub misses: u64,
    /// Background revalidations started.
    pub revalidations: u64,
    pub revalidation_failures: u64,
    pub entries: u64,
}

struct Inner<K, V> {
    entries: Cache<K, CacheEntry<V>>,
    fresh_ttl: Duration,
    expiry_ttl: Duration,
    fetches: RequestCoalescer<K, V>,
    refreshing: DashMap<K, ()>,
    stats: CacheCounters,
}

/// Key/value cache with fresh, stale and expired phases.
///
/// Cloning is cheap and shares the underlying storage.
pub struct TtlCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: &CacheConfig) -> Self {
        let entries = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.expiry_ttl)
            .build();

        Self {
            inner: Arc::new(Inner {
                entries,
                fresh_ttl: config.fresh_ttl,
                expiry_ttl: config.expiry_ttl,
                // settled fetches land in the cache itself
                fetches: RequestCoalescer::new(Duration::ZERO),
                refreshing: DashMap::new(),
                stats: CacheCounters::default(),
            }),
        }
    }

    /// Read `key` without fetching. Expired entries are dropped and read as `None`.
    pub async fn get(&self, key: &K) -> Option<Cached<V>> {
        let cached = self.lookup(key).await;
        let counter = match cached.as_ref().map(|c| c.freshness) {
            Some(Freshness::Fresh) => &self.inner.stats.hits,
            Some(Freshness::Stale) => &self.inner.stats.stale_hits,
            None => &self.inner.stats.misses,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        cached
    }

    pub async fn set(&self, key: K, value: V) {
        self.inner
            .entries
            .insert(
                key,
                CacheEntry {
                    value,
                    written_at: Instant::now(),
                },
            )
            .await;
    }

    pub async fn invalidate(&self, key: &K) {
        self.inner.entries.invalidate(key).await;
    }

    /// Read `key`, fetching through `producer` as its phase requires.
    ///
    /// Fresh values are returned as-is. Stale values are returned immediately
    /// while at most one background call to `producer` per key refreshes
    /// them; if that call fails the stale value is kept. Missing or expired
    /// values are fetched before returning, with concurrent callers sharing
    /// one fetch.
    pub async fn get_or_revalidate<F, Fut>(&self, key: K, producer: F) -> TrackResult<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TrackResult<V>> + Send + 'static,
    {
        match self.get(&key).await {
            Some(Cached {
                value,
                freshness: Freshness::Fresh,
                ..
            }) => Ok(value),
            Some(Cached {
                value,
                freshness: Freshness::Stale,
                age,
            }) => {
                self.spawn_revalidation(key, producer, age);
                Ok(value)
            }
            None => self.fetch(key, producer).await,
        }
    }

    pub fn stats(&self) -> CacheStats {
        let stats = &self.inner.stats;
        CacheStats {
            hits: stats.hits.load(Ordering::Relaxed),
            stale_hits: stats.stale_hits.load(Ordering::Relaxed),
            misses: stats.misses.load(Ordering::Relaxed),
            revalidations: stats.revalidations.load(Ordering::Relaxed),
            revalidation_failures: stats.revalidation_failures.load(Ordering::Relaxed),
            entries: self.inner.entries.entry_count(),
        }
    }

    async fn lookup(&self, key: &K) -> Option<Cached<V>> {
        let entry = self.inner.entries.get(key).await?;
        let age = entry.written_at.elapsed();
        if age >= self.inner.expiry_ttl {
            self.inner.entries.invalidate(key).await;
            return None;
        }
        let freshness = if age < self.inner.fresh_ttl {
            Freshness::Fresh
        } else {
            Freshness::Stale
        };
        Some(Cached {
            value: entry.value,
            freshness,
            age,
        })
    }

    async fn fetch<F, Fut>(&self, key: K, producer: F) -> TrackResult<V>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TrackResult<V>> + Send + 'static,
    {
        let cache = self.clone();
        let write_key = key.clone();
        self.inner
            .fetches
            .coalesce(key, move || async move {
                let value = producer().await?;
                cache.set(write_key, value.clone()).await;
                Ok(value)
            })
            .await
    }

    fn spawn_revalidation<F, Fut>(&self, key: K, producer: F, age: Duration)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = TrackResult<V>> + Send + 'static,
    {
        if self.inner.refreshing.insert(key.clone(), ()).is_some() {
            return;
        }
        self.inner
            .stats
            .revalidations
            .fetch_add(1, Ordering::Relaxed);
        debug!(age_secs = age.as_secs(), "Revalidating stale cache entry");

        let cache = self.clone();
        tokio::spawn(async move {
            let result = cache.fetch(key.clone(), producer).await;
            cache.inner.refreshing.remove(&key);
            if let Err(e) = result {
                cache
                    .inner
                    .stats
                    .revalidation_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Cache revalidation failed, keeping stale value");
            }
        });
    }
}
