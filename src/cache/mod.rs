//! In-memory TTL cache shared by the endpoint handlers.
//!
//! Entries expire a fixed time after insertion. `get` treats an expired
//! entry as a miss even before the background sweeper removes it, and
//! `flush_all` drops everything at once. A flush also bumps the cache
//! generation, so a read-through fetch that started before the flush
//! never stores its result. Nothing is persisted.

mod coalesce;

use coalesce::KeyLocks;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    cached_at: DateTime<Utc>,
}

/// A cached value together with its capture time
#[derive(Debug, Clone)]
pub struct CacheHit<V> {
    pub value: V,
    pub cached_at: DateTime<Utc>,
}

/// Result of a read-through lookup
#[derive(Debug, Clone)]
pub struct Lookup<V> {
    pub value: V,
    pub cached_at: DateTime<Utc>,
    /// `true` when served from the cache without calling the fetcher
    pub hit: bool,
}

pub struct TtlCache<V> {
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    ttl: Duration,
    /// Bumped by `flush_all`; only changed under the `entries` write lock
    generation: AtomicU64,
    locks: KeyLocks,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            generation: AtomicU64::new(0),
            locks: KeyLocks::new(),
        }
    }

    fn is_live(&self, entry: &CacheEntry<V>, now: Instant) -> bool {
        now.duration_since(entry.inserted_at) < self.ttl
    }

    pub fn get(&self, key: &str) -> Option<CacheHit<V>> {
        let now = Instant::now();
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| self.is_live(entry, now))
            .map(|entry| CacheHit {
                value: entry.value.clone(),
                cached_at: entry.cached_at,
            })
    }

    /// Store a value, returning its capture time
    pub fn set(&self, key: impl Into<String>, value: V) -> DateTime<Utc> {
        let cached_at = Utc::now();
        self.entries.write().insert(
            key.into(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
                cached_at,
            },
        );
        cached_at
    }

    /// Like `set`, but dropped when the cache was flushed after `generation`
    fn set_if_current(&self, key: &str, value: V, generation: u64) -> DateTime<Utc> {
        let cached_at = Utc::now();
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) == generation {
            entries.insert(
                key.to_string(),
                CacheEntry {
                    value,
                    inserted_at: Instant::now(),
                    cached_at,
                },
            );
        } else {
            debug!(key, "cache flushed during fetch, result not stored");
        }
        cached_at
    }

    pub fn flush_all(&self) {
        let mut entries = self.entries.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    /// Remove expired entries, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| now.duration_since(entry.inserted_at) < self.ttl);
        let removed = before - entries.len();
        drop(entries);
        self.locks.prune();
        removed
    }

    /// Number of stored entries, expired ones included until swept
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read-through lookup. Concurrent misses on one key wait for the first
    /// fetch and then read its result instead of fetching again.
    pub async fn get_or_try_fetch<F, Fut, E>(&self, key: &str, fetch: F) -> Result<Lookup<V>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(key) {
            return Ok(Lookup {
                value: hit.value,
                cached_at: hit.cached_at,
                hit: true,
            });
        }

        let _guard = self.locks.acquire(key).await;
        if let Some(hit) = self.get(key) {
            debug!(key, "cache filled by concurrent request");
            return Ok(Lookup {
                value: hit.value,
                cached_at: hit.cached_at,
                hit: true,
            });
        }

        let generation = self.generation.load(Ordering::Acquire);
        let value = fetch().await?;
        let cached_at = self.set_if_current(key, value.clone(), generation);
        Ok(Lookup {
            value,
            cached_at,
            hit: false,
        })
    }
}

impl<V: Clone + Send + Sync + 'static> TtlCache<V> {
    /// Spawn the periodic sweep. The task stops once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                let removed = cache.sweep();
                if removed > 0 {
                    debug!(removed, "swept expired cache entries");
                }
            }
        })
    }
}
