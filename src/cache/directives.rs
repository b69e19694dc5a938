//! Cache-Control interpretation.
//!
//! Supported subset:
//! - `no-store` → do not cache
//! - `immutable` → never stale, never expires
//! - `s-maxage` (preferred) / `max-age` → ttl
//! - `no-cache` / `must-revalidate` → stale immediately
//! - `stale-while-revalidate=N` → stale after N seconds
//!
//! Anything the header does not decide falls back to the caller's defaults.

use reqwest::header::{HeaderMap, CACHE_CONTROL};
use std::time::Duration;

use crate::cache::entry::Freshness;

/// Parsed Cache-Control directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheDirectives {
    pub no_store: bool,
    pub no_cache: bool,
    pub must_revalidate: bool,
    pub immutable: bool,
    /// Seconds.
    pub max_age: Option<u64>,
    /// Seconds.
    pub s_maxage: Option<u64>,
    /// Seconds.
    pub stale_while_revalidate: Option<u64>,
}

impl CacheDirectives {
    /// Parse a header value. Unknown directives and malformed numbers are ignored.
    pub fn parse(header: &str) -> Self {
        let mut directives = Self::default();

        for part in header.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            let (name, value) = match part.split_once('=') {
                Some((name, value)) => (name.trim(), Some(value.trim().trim_matches('"'))),
                None => (part, None),
            };
            let seconds = value.and_then(|v| v.parse::<u64>().ok());

            match name.to_ascii_lowercase().as_str() {
                "no-store" => directives.no_store = true,
                "no-cache" => directives.no_cache = true,
                "must-revalidate" => directives.must_revalidate = true,
                "immutable" => directives.immutable = true,
                "max-age" => directives.max_age = seconds.or(directives.max_age),
                "s-maxage" => directives.s_maxage = seconds.or(directives.s_maxage),
                "stale-while-revalidate" => {
                    directives.stale_while_revalidate =
                        seconds.or(directives.stale_while_revalidate)
                }
                _ => {}
            }
        }

        directives
    }

    /// Collect every Cache-Control header in `headers`. `None` if there is none.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let values: Vec<&str> = headers
            .get_all(CACHE_CONTROL)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        if values.is_empty() {
            None
        } else {
            Some(Self::parse(&values.join(",")))
        }
    }
}

/// What to do with a successful response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessDecision {
    NoStore,
    Store(Freshness),
}

/// Resolve freshness for a response from its headers and the caller's defaults.
pub fn resolve_freshness(headers: &HeaderMap, defaults: Freshness) -> FreshnessDecision {
    match CacheDirectives::from_headers(headers) {
        Some(directives) => directives.resolve(defaults),
        None => FreshnessDecision::Store(defaults),
    }
}

impl CacheDirectives {
    pub fn resolve(&self, defaults: Freshness) -> FreshnessDecision {
        if self.no_store {
            return FreshnessDecision::NoStore;
        }
        if self.immutable {
            return FreshnessDecision::Store(Freshness::immutable());
        }

        let ttl = self
            .s_maxage
            .or(self.max_age)
            .map(Duration::from_secs)
            .or(defaults.ttl);

        let stale_time = if self.no_cache || self.must_revalidate {
            Some(Duration::ZERO)
        } else if let Some(seconds) = self.stale_while_revalidate {
            Some(Duration::from_secs(seconds))
        } else {
            defaults.stale_time
        };

        FreshnessDecision::Store(Freshness { stale_time, ttl })
    }
}
