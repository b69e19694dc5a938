//! Bounded in-memory response cache.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

use crate::cache::entry::{CacheEntry, CacheLookup, Freshness};
use crate::config::{CacheConfig, EvictionPolicy};
use crate::lifecycle::TaskSlot;
use crate::observability::metrics;

/// Errors raised while setting up a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CacheError {
    #[error("Invalid cache size {0}: max_size must be greater than 0")]
    InvalidMaxSize(usize),
}

/// A thread-safe keyed store with freshness tracking and size-bounded eviction.
///
/// Expired entries are logically absent: lookups never return them and remove
/// them on sight.
#[derive(Debug)]
pub struct Cache<V> {
    entries: DashMap<String, CacheEntry<V>>,
    policy: EvictionPolicy,
    max_size: usize,
    check_interval: Duration,
}

impl<V: Clone + Send + Sync + 'static> Cache<V> {
    pub fn new(config: &CacheConfig) -> Result<Self, CacheError> {
        if config.max_size == 0 {
            return Err(CacheError::InvalidMaxSize(config.max_size));
        }
        Ok(Self {
            entries: DashMap::new(),
            policy: config.eviction_policy,
            max_size: config.max_size,
            check_interval: config.check_interval(),
        })
    }

    /// Look up `key`, counting the use. Expired entries are removed and reported absent.
    pub fn get(&self, key: &str) -> Option<CacheLookup<V>> {
        let now = Instant::now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired(now) {
                entry.use_count += 1;
                let lookup = CacheLookup {
                    value: entry.value.clone(),
                    is_stale: entry.is_stale(now),
                };
                metrics::record_cache_hit(lookup.is_stale);
                return Some(lookup);
            }
        }

        if self
            .entries
            .remove_if(key, |_, entry| entry.is_expired(now))
            .is_some()
        {
            tracing::trace!(key = %key, "Dropped expired cache entry");
        }
        metrics::record_cache_miss();
        None
    }

    /// Like `get`, without touching the use count or removing anything.
    pub fn peek(&self, key: &str) -> Option<CacheLookup<V>> {
        let now = Instant::now();
        self.entries
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| CacheLookup {
                value: entry.value.clone(),
                is_stale: entry.is_stale(now),
            })
    }

    /// Insert or update `key`. Updates keep the original creation time.
    pub fn store(&self, key: impl Into<String>, value: V, freshness: Freshness) {
        let now = Instant::now();
        match self.entries.entry(key.into()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if entry.is_expired(now) {
                    *entry = CacheEntry::new(value, now);
                } else {
                    entry.value = value;
                }
                entry.refresh(freshness, now);
                entry.use_count += 1;
            }
            Entry::Vacant(vacant) => {
                let mut entry = CacheEntry::new(value, now);
                entry.refresh(freshness, now);
                entry.use_count = 1;
                vacant.insert(entry);
            }
        }
        self.evict();
    }

    /// Remove `key` unconditionally. Returns whether anything was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            metrics::record_cache_size(self.entries.len());
        }
        removed
    }

    pub fn clear(&self) {
        self.entries.clear();
        metrics::record_cache_size(0);
    }

    /// Whether a live (unexpired) entry exists.
    pub fn contains_key(&self, key: &str) -> bool {
        self.peek(key).is_some()
    }

    /// Number of entries held, including expired ones not yet removed.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Trim the cache to half its maximum size if it has outgrown it.
    ///
    /// Returns the number of entries removed.
    pub fn evict(&self) -> usize {
        let size = self.entries.len();
        if size <= self.max_size {
            metrics::record_cache_size(size);
            return 0;
        }

        let keep = self.max_size / 2;
        let mut ranked: Vec<(String, u64, Instant)> = self
            .entries
            .iter()
            .map(|r| (r.key().clone(), r.value().use_count, r.value().created))
            .collect();

        // Most valuable first.
        match self.policy {
            EvictionPolicy::Lru => {
                ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.2.cmp(&a.2)))
            }
            EvictionPolicy::Oldest => {
                ranked.sort_by(|a, b| b.2.cmp(&a.2).then_with(|| b.1.cmp(&a.1)))
            }
        }

        let removed = ranked
            .into_iter()
            .skip(keep)
            .filter(|(key, _, _)| self.entries.remove(key).is_some())
            .count();

        tracing::debug!(
            policy = ?self.policy,
            removed,
            remaining = self.entries.len(),
            "Cache eviction pass"
        );
        metrics::record_cache_evictions(removed);
        metrics::record_cache_size(self.entries.len());
        removed
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Start the periodic maintenance pass (purge expired, then evict).
    ///
    /// The task stops when the returned slot is dropped or the cache is gone.
    pub fn spawn_eviction(self: &Arc<Self>) -> TaskSlot {
        let slot = TaskSlot::new();
        let cache = Arc::downgrade(self);
        let interval = self.check_interval;

        slot.replace(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                ticker.tick().await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                let purged = cache.purge_expired();
                if purged > 0 {
                    tracing::debug!(purged, "Purged expired cache entries");
                }
                cache.evict();
            }
        }));
        slot
    }
}
