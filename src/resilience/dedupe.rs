//! In-flight request deduplication (single-flight).
//!
//! # Responsibilities
//! - Coalesce concurrent identical requests into one underlying call
//! - Hand the same settled outcome to every caller that joined
//! - Forget the call the moment it settles, success or failure
//!
//! # Design Decisions
//! - Pending calls are `Shared` futures driven by a spawned task, so the call
//!   settles and its entry is removed even after every waiter has gone
//! - A request arriving right after settlement issues anew
//! - Entries carry a call id so a settling call never removes a newer one
//! - Only idempotent methods are eligible by default (POST is excluded)

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, Shared};
use futures_util::FutureExt;
use reqwest::Method;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::DedupeConfig;
use crate::http::RequestDescriptor;
use crate::observability::metrics;

/// A pending outcome shared by every waiter.
pub type SharedOutcome<T> = Shared<BoxFuture<'static, T>>;

type PendingMap<T> = DashMap<String, (u64, SharedOutcome<T>)>;

/// Maps in-flight request identities to their pending outcomes.
pub struct Deduplicator<T: Clone> {
    pending: Arc<PendingMap<T>>,
    next_id: AtomicU64,
    enabled: bool,
    methods: Vec<Method>,
}

impl<T> Deduplicator<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(config: &DedupeConfig) -> Self {
        let methods = config
            .methods
            .iter()
            .filter_map(|m| Method::from_bytes(m.to_ascii_uppercase().as_bytes()).ok())
            .collect();
        Self {
            pending: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(1),
            enabled: config.enabled,
            methods,
        }
    }

    /// Whether `descriptor` may share an in-flight call.
    pub fn is_eligible(&self, descriptor: &RequestDescriptor) -> bool {
        self.enabled && !descriptor.no_dedupe && self.methods.contains(&descriptor.method)
    }

    /// Join the pending call for `key`, or start one with `issue`.
    ///
    /// `issue` is only invoked when no call for `key` is pending.
    pub fn dedupe<F>(&self, key: &str, issue: F) -> SharedOutcome<T>
    where
        F: FnOnce() -> BoxFuture<'static, T>,
    {
        match self.pending.entry(key.to_string()) {
            Entry::Occupied(occupied) => {
                tracing::trace!(key = %key, "Joining in-flight request");
                metrics::record_dedupe_coalesced();
                occupied.get().1.clone()
            }
            Entry::Vacant(vacant) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                let pending = Arc::downgrade(&self.pending);
                let key = key.to_string();
                let call = issue();

                let shared = async move {
                    let outcome = call.await;
                    if let Some(pending) = pending.upgrade() {
                        pending.remove_if(&key, |_, (entry_id, _)| *entry_id == id);
                    }
                    outcome
                }
                .boxed()
                .shared();

                vacant.insert((id, shared.clone()));
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    runtime.spawn(shared.clone().map(drop));
                }
                shared
            }
        }
    }

    /// Number of calls currently in flight.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn slow_call(
        calls: &Arc<AtomicUsize>,
        outcome: Result<u32, String>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, String>> {
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                outcome
            }
            .boxed()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_flight() {
        let dedupe = Deduplicator::new(&DedupeConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..10)
            .map(|_| dedupe.dedupe("k", slow_call(&calls, Ok(7))))
            .collect();
        assert_eq!(dedupe.pending_count(), 1);

        let outcomes = join_all(waiters).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(outcomes.iter().all(|o| *o == Ok(7)));
        assert_eq!(dedupe.pending_count(), 0);

        // Settled: the next request issues again.
        dedupe.dedupe("k", slow_call(&calls, Ok(8))).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_is_shared_and_cleared() {
        let dedupe = Deduplicator::new(&DedupeConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = dedupe.dedupe("k", slow_call(&calls, Err("boom".into())));
        let b = dedupe.dedupe("k", slow_call(&calls, Ok(1)));
        let (a, b) = tokio::join!(a, b);

        assert_eq!(a, Err("boom".to_string()));
        assert_eq!(a, b);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!dedupe.is_pending("k"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_call_still_clears_entry() {
        let dedupe = Deduplicator::new(&DedupeConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        drop(dedupe.dedupe("k", slow_call(&calls, Ok(1))));
        assert!(dedupe.is_pending("k"));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!dedupe.is_pending("k"));
        assert_eq!(dedupe.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_distinct_keys_do_not_coalesce() {
        let dedupe = Deduplicator::new(&DedupeConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let a = dedupe.dedupe("a", slow_call(&calls, Ok(1)));
        let b = dedupe.dedupe("b", slow_call(&calls, Ok(2)));
        assert_eq!(tokio::join!(a, b), (Ok(1), Ok(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_eligibility() {
        let dedupe = Deduplicator::<u8>::new(&DedupeConfig::default());
        assert!(dedupe.is_eligible(&RequestDescriptor::get("https://a.test")));
        assert!(dedupe.is_eligible(&RequestDescriptor::delete("https://a.test")));
        assert!(!dedupe.is_eligible(&RequestDescriptor::post("https://a.test")));
        assert!(!dedupe.is_eligible(&RequestDescriptor::get("https://a.test").no_dedupe()));

        let disabled = Deduplicator::<u8>::new(&DedupeConfig {
            enabled: false,
            ..DedupeConfig::default()
        });
        assert!(!disabled.is_eligible(&RequestDescriptor::get("https://a.test")));
    }
}
