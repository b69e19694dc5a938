//! Cache entry model.

use std::time::Duration;
use tokio::time::Instant;

/// How long a stored value stays fresh and how long it stays at all.
///
/// `None` means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Freshness {
    pub stale_time: Option<Duration>,
    pub ttl: Option<Duration>,
}

impl Freshness {
    pub fn new(stale_time: Duration, ttl: Duration) -> Self {
        Self {
            stale_time: Some(stale_time),
            ttl: Some(ttl),
        }
    }

    /// Never stale, never expires.
    pub fn immutable() -> Self {
        Self {
            stale_time: None,
            ttl: None,
        }
    }
}

/// A stored value with its timestamps.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created: Instant,
    pub stale_at: Option<Instant>,
    pub expires_at: Option<Instant>,
    pub use_count: u64,
}

impl<V> CacheEntry<V> {
    pub(crate) fn new(value: V, now: Instant) -> Self {
        Self {
            value,
            created: now,
            stale_at: Some(now),
            expires_at: Some(now),
            use_count: 0,
        }
    }

    /// Reset freshness timestamps relative to `now`.
    pub(crate) fn refresh(&mut self, freshness: Freshness, now: Instant) {
        self.stale_at = freshness.stale_time.and_then(|d| now.checked_add(d));
        self.expires_at = freshness.ttl.and_then(|d| now.checked_add(d));
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }

    pub fn is_stale(&self, now: Instant) -> bool {
        matches!(self.stale_at, Some(at) if now >= at)
    }
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<V> {
    pub value: V,
    pub is_stale: bool,
}
