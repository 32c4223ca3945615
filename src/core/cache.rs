// src/core/cache.rs

//! TTL cache for expensive lookups.
//!
//! Expiry is checked on every read, so an entry is never served past its
//! `expires_at` even if the background sweeper has not run yet. Concurrent
//! misses on the same key are collapsed: the first caller fetches while the
//! others wait on a per-key lock and then read the freshly stored value.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::core::clock::{add_duration, Clock};
use crate::core::models::CacheStats;

type InflightLocks = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// A stored value with its bookkeeping.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

/// Concurrency-safe cache with per-entry TTL and cumulative hit/miss counters.
#[derive(Debug)]
pub struct TtlCache<V> {
    name: &'static str,
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    inflight: InflightLocks,
    hits: AtomicU64,
    misses: AtomicU64,
    clock: Arc<dyn Clock>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(name: &'static str, clock: Arc<dyn Clock>) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            clock,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns the live value for `key`, counting a hit or a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let found = self.lookup(key);
        self.record(found.is_some());
        found
    }

    /// Stores `value` under `key` for `ttl`, replacing any previous entry.
    pub fn set(&self, key: &str, value: V, ttl: Duration) {
        let now = self.clock.now();
        let entry = CacheEntry {
            key: key.to_string(),
            value,
            created_at: now,
            expires_at: add_duration(now, ttl),
            hit_count: 0,
        };
        trace!(cache = self.name, key, ttl = ?ttl, "Storing cache entry.");
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), entry);
    }

    /// Returns the cached value or runs `fetch` to produce it.
    ///
    /// Exactly one hit or miss is counted per call. Errors from `fetch` are
    /// returned as-is and nothing is stored. The boolean is `true` when the
    /// value came from the cache.
    pub async fn get_or_fetch<F, Fut, E>(
        &self,
        key: &str,
        ttl_for: impl FnOnce(&V) -> Duration,
        fetch: F,
    ) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(value) = self.lookup(key) {
            self.record(true);
            return Ok((value, true));
        }

        let _slot = self.acquire_key_lock(key).await;

        // Someone else may have filled the entry while we waited.
        if let Some(value) = self.lookup(key) {
            self.record(true);
            return Ok((value, true));
        }

        self.record(false);
        debug!(cache = self.name, key, "Cache miss, fetching.");
        let outcome = fetch().await;
        if let Ok(value) = &outcome {
            let ttl = ttl_for(value);
            self.set(key, value.clone(), ttl);
        }
        outcome.map(|value| (value, false))
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(cache = self.name, removed, "Purged expired cache entries.");
        }
        removed
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A copy of the entry for `key`, without counting a hit. Test and
    /// diagnostics helper.
    pub fn entry(&self, key: &str) -> Option<CacheEntry<V>> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(key)
            .cloned()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            name: self.name.to_string(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }

    /// Spawns a task that purges expired entries every `interval`. The task
    /// ends on its own once the cache is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(cache) => {
                        cache.purge_expired();
                    }
                    None => break,
                }
            }
        })
    }

    fn lookup(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match entries.get_mut(key) {
            Some(entry) if entry.expires_at > now => {
                entry.hit_count += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                trace!(cache = self.name, key, "Dropping expired entry on read.");
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn acquire_key_lock(&self, key: &str) -> KeySlot<'_> {
        let lock = {
            let mut inflight = self
                .inflight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            Arc::clone(inflight.entry(key.to_string()).or_default())
        };
        let held = Arc::clone(&lock).lock_owned().await;
        KeySlot {
            inflight: &self.inflight,
            key: key.to_string(),
            lock,
            _held: held,
        }
    }
}

/// Exclusive right to fetch one key. Dropping it, on completion or when the
/// fetching future is cancelled, frees the key's slot in the in-flight map.
struct KeySlot<'a> {
    inflight: &'a InflightLocks,
    key: String,
    lock: Arc<tokio::sync::Mutex<()>>,
    _held: OwnedMutexGuard<()>,
}

impl Drop for KeySlot<'_> {
    fn drop(&mut self) {
        let mut inflight = self
            .inflight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // A later caller may already have installed a fresh lock for this key.
        if inflight
            .get(&self.key)
            .is_some_and(|current| Arc::ptr_eq(current, &self.lock))
        {
            inflight.remove(&self.key);
        }
    }
}
