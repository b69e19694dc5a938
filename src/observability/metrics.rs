//! Metrics collection.
//!
//! # Metrics
//! - `fetch_cache_hits_total` (counter): lookups served by a live entry, by freshness
//! - `fetch_cache_misses_total` (counter): lookups that found nothing usable
//! - `fetch_cache_evictions_total` (counter): entries removed by eviction passes
//! - `fetch_cache_entries` (gauge): current entry count
//! - `fetch_breaker_transitions_total` (counter): breaker state changes, by target state
//! - `fetch_dedupe_coalesced_total` (counter): requests that joined an in-flight call
//! - `fetch_retries_scheduled_total` (counter): retry timers started
//! - `fetch_requests_total` (counter): transport calls, by outcome

use metrics::{counter, gauge};

pub fn record_cache_hit(stale: bool) {
    let freshness = if stale { "stale" } else { "fresh" };
    counter!("fetch_cache_hits_total", "freshness" => freshness).increment(1);
}

pub fn record_cache_miss() {
    counter!("fetch_cache_misses_total").increment(1);
}

pub fn record_cache_evictions(count: usize) {
    counter!("fetch_cache_evictions_total").increment(count as u64);
}

pub fn record_cache_size(size: usize) {
    gauge!("fetch_cache_entries").set(size as f64);
}

pub fn record_breaker_transition(state: &'static str) {
    counter!("fetch_breaker_transitions_total", "state" => state).increment(1);
}

pub fn record_dedupe_coalesced() {
    counter!("fetch_dedupe_coalesced_total").increment(1);
}

pub fn record_retry_scheduled() {
    counter!("fetch_retries_scheduled_total").increment(1);
}

pub fn record_request(outcome: &'static str) {
    counter!("fetch_requests_total", "outcome" => outcome).increment(1);
}
