//! Per-resource request controller.
//!
//! # Responsibilities
//! - Track the current request descriptor and publish a `ResourceSnapshot`
//! - Serve fresh cache hits without a network call; revalidate stale ones
//! - Feed outcomes to the circuit breaker and retry policy
//! - Own the refresh timer and the breaker watcher until `destroy`
//!
//! # Data Flow
//! ```text
//! load(descriptor) / reload() / refresh tick
//!     → breaker available?          no  → publish disabled
//!     → cache (fresh?)              yes → publish Resolved
//!     → publish Loading (stale or previous value)
//!     → dedupe → transport (+ If-None-Match / If-Modified-Since)
//!     → 304? reuse cached response
//!     → parse → breaker / retry / cache store → publish
//! ```
//!
//! # Design Decisions
//! - Every descriptor change bumps a generation; outcomes from an older
//!   generation are dropped without touching breaker, cache or snapshot
//! - Retries re-enter through `reload`, so they probe an open breaker
//! - Each fetch cycle runs on its own task; a caller dropping `load` or
//!   `reload` does not strand the outcome
//! - Background tasks hold `Weak` references and never keep a resource alive

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::header::{HeaderMap, HeaderValue, IF_MODIFIED_SINCE, IF_NONE_MATCH};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};

use crate::cache::{resolve_freshness, CacheLookup, FreshnessDecision};
use crate::http::{FetchError, FetchResult, HttpResponse, RequestDescriptor};
use crate::lifecycle::TaskSlot;
use crate::resilience::{CircuitBreaker, CircuitState, RetryPolicy};
use crate::resource::client::{ClientShared, ResourceOptions};
use crate::resource::snapshot::ResourceSnapshot;

type Outcome = FetchResult<Arc<HttpResponse>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchMode {
    /// Descriptor change: a fresh cache entry short-circuits the call.
    Normal,
    /// Explicit reload or retry: always re-issue.
    Force,
    /// Periodic refresh: re-issue quietly, skip while the breaker is open.
    Background,
}

#[derive(Debug, Default)]
struct ControllerState {
    descriptor: Option<RequestDescriptor>,
    generation: u64,
}

struct ResourceInner<T> {
    shared: Arc<ClientShared>,
    options: ResourceOptions<T>,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    state: Mutex<ControllerState>,
    snapshot: watch::Sender<ResourceSnapshot<T>>,
    refresh: TaskSlot,
    watcher: TaskSlot,
    destroyed: AtomicBool,
}

/// A cached, breaker-protected, retried view of one remote value.
///
/// Dropping the resource runs [`Resource::destroy`].
pub struct Resource<T>
where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    inner: Arc<ResourceInner<T>>,
}

impl<T> Resource<T>
where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    pub(crate) fn new(
        shared: Arc<ClientShared>,
        options: ResourceOptions<T>,
        breaker: CircuitBreaker,
    ) -> Self {
        let initial = ResourceSnapshot {
            disabled: !breaker.is_available(),
            ..ResourceSnapshot::default()
        };
        let (snapshot, _) = watch::channel(initial);

        let inner = Arc::new(ResourceInner {
            retry: RetryPolicy::new(&options.retry),
            shared,
            options,
            breaker,
            state: Mutex::new(ControllerState::default()),
            snapshot,
            refresh: TaskSlot::new(),
            watcher: TaskSlot::new(),
            destroyed: AtomicBool::new(false),
        });
        inner.spawn_breaker_watcher();

        Self { inner }
    }

    /// Switch to `descriptor` (or to no request with `None`) and fetch it.
    ///
    /// Loading a descriptor equal to the current one does nothing. The request
    /// settles even if the returned future is dropped.
    pub async fn load(&self, descriptor: Option<RequestDescriptor>) {
        ResourceInner::load(self.inner.clone(), descriptor).await
    }

    /// Re-issue the current request, probing the breaker if it is open.
    ///
    /// Returns whether a request was actually triggered.
    pub async fn reload(&self) -> bool {
        ResourceInner::reload(self.inner.clone()).await
    }

    /// Write `value` into the cache under the current key and publish it.
    pub fn set(&self, value: T) -> FetchResult<()> {
        self.inner.set(value)
    }

    /// Derive a new value from the current one and [`set`](Self::set) it.
    pub fn update<F>(&self, f: F) -> FetchResult<()>
    where
        F: FnOnce(Option<&T>) -> T,
    {
        let current = self.inner.snapshot.borrow().value.clone();
        self.inner.set(f(current.as_ref()))
    }

    /// Warm the cache for `descriptor` without touching this resource's state.
    ///
    /// Failures are logged and swallowed.
    pub async fn prefetch(&self, descriptor: RequestDescriptor) {
        self.inner.prefetch(descriptor).await
    }

    pub fn snapshot(&self) -> ResourceSnapshot<T> {
        self.inner.snapshot.borrow().clone()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ResourceSnapshot<T>> {
        self.inner.snapshot.subscribe()
    }

    pub fn descriptor(&self) -> Option<RequestDescriptor> {
        self.inner.lock_state().descriptor.clone()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// Retries scheduled since the last success or descriptor change.
    pub fn retry_attempts(&self) -> u32 {
        self.inner.retry.attempts()
    }

    pub fn is_refresh_scheduled(&self) -> bool {
        self.inner.refresh.is_active()
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Cancel every timer and subscription. Safe to call more than once.
    pub fn destroy(&self) {
        self.inner.destroy();
    }
}

impl<T> Drop for Resource<T>
where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

impl<T> ResourceInner<T>
where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    async fn load(self: Arc<Self>, descriptor: Option<RequestDescriptor>) {
        if self.is_destroyed() {
            return;
        }

        let generation = {
            let mut state = self.lock_state();
            if state.descriptor == descriptor {
                return;
            }
            state.descriptor = descriptor.clone();
            state.generation += 1;
            state.generation
        };

        self.retry.reset();
        self.refresh.cancel();

        match descriptor {
            None => {
                let disabled = !self.breaker.is_available();
                self.publish(generation, |snapshot| snapshot.mark_idle(disabled));
            }
            Some(descriptor) => {
                tracing::debug!(request = %descriptor, "Loading resource");
                self.schedule_refresh();
                self.spawn_fetch(FetchMode::Normal).await;
            }
        }
    }

    fn reload(self: Arc<Self>) -> BoxFuture<'static, bool> {
        async move {
            let idle = self.is_destroyed() || self.lock_state().descriptor.is_none();
            if idle {
                return false;
            }

            self.refresh.cancel();
            self.breaker.half_open();

            let resource = self.clone();
            let cycle = tokio::spawn(async move {
                let triggered = resource.clone().fetch(FetchMode::Force).await;
                resource.schedule_refresh();
                triggered
            });
            cycle.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Reload task failed");
                false
            })
        }
        .boxed()
    }

    /// Run [`fetch`](Self::fetch) on its own task and wait for it.
    async fn spawn_fetch(self: &Arc<Self>, mode: FetchMode) -> bool {
        tokio::spawn(self.clone().fetch(mode))
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Fetch task failed");
                false
            })
    }

    /// Run one fetch cycle for the current descriptor.
    ///
    /// Returns `false` when nothing was attempted (no descriptor, destroyed,
    /// breaker open).
    async fn fetch(self: Arc<Self>, mode: FetchMode) -> bool {
        let (descriptor, generation) = {
            let state = self.lock_state();
            match &state.descriptor {
                Some(descriptor) if !self.is_destroyed() => {
                    (descriptor.clone(), state.generation)
                }
                _ => return false,
            }
        };

        if !self.breaker.is_available() {
            if mode != FetchMode::Background {
                tracing::debug!(request = %descriptor, "Circuit open, request suppressed");
                self.publish(generation, |snapshot| snapshot.mark_blocked());
            }
            return false;
        }

        let key = descriptor.cache_key();
        let mut served = None;
        let cached = match self.shared.cache.get(&key) {
            Some(lookup) => match (self.options.parser)(&lookup.value) {
                Ok(value) => {
                    if mode == FetchMode::Normal && !lookup.is_stale {
                        let status = lookup.value.status;
                        let headers = lookup.value.headers.clone();
                        self.publish(generation, |snapshot| {
                            snapshot.mark_resolved(value, Some(status), headers)
                        });
                        return true;
                    }
                    if self.options.serve_stale {
                        served = Some(value);
                    }
                    Some(lookup)
                }
                Err(error) => {
                    tracing::debug!(key = %key, error = %error, "Dropping unparseable cache entry");
                    self.shared.cache.invalidate(&key);
                    None
                }
            },
            None => None,
        };

        if mode != FetchMode::Background {
            let keep_previous = self.options.keep_previous;
            self.publish(generation, |snapshot| {
                snapshot.mark_loading(served, keep_previous)
            });
        }

        let request = match cached.as_ref().map(conditional_headers) {
            Some(extra) if !extra.is_empty() => descriptor.with_headers(extra),
            _ => descriptor.clone(),
        };

        let outcome = self
            .issue(request)
            .await
            .and_then(|response| settle_not_modified(response, cached.as_ref()))
            .and_then(|(response, directives)| {
                (self.options.parser)(&response).map(|value| (value, response, directives))
            });

        if !self.is_current(generation) {
            tracing::debug!(request = %descriptor, "Discarding outcome of superseded request");
            return true;
        }

        match outcome {
            Ok((value, response, directives)) => {
                self.breaker.success();
                self.retry.on_success();
                match resolve_freshness(&directives, self.options.freshness) {
                    FreshnessDecision::Store(freshness) => {
                        self.shared.cache.store(key, response.clone(), freshness)
                    }
                    FreshnessDecision::NoStore => {
                        self.shared.cache.invalidate(&key);
                    }
                }
                self.publish(generation, |snapshot| {
                    snapshot.mark_resolved(value, Some(response.status), response.headers.clone())
                });
            }
            Err(error) => {
                self.breaker.fail();
                let disabled = !self.breaker.is_available();
                tracing::warn!(request = %descriptor, error = %error, "Request failed");

                self.publish(generation, |snapshot| {
                    snapshot.mark_errored(error.clone(), disabled)
                });
                if let Some(callback) = &self.options.on_error {
                    callback(&error);
                }

                let resource = Arc::downgrade(&self);
                self.retry.on_failure(async move {
                    if let Some(resource) = resource.upgrade() {
                        ResourceInner::reload(resource).await;
                    }
                });
            }
        }
        true
    }

    /// Send `request` through the deduplicator when eligible.
    fn issue(&self, request: RequestDescriptor) -> BoxFuture<'static, Outcome> {
        let transport = self.shared.transport.clone();
        if self.options.dedupe && self.shared.dedupe.is_eligible(&request) {
            let identity = request.identity();
            self.shared
                .dedupe
                .dedupe(&identity, move || {
                    transport.issue(request).map(|r| r.map(Arc::new)).boxed()
                })
                .boxed()
        } else {
            transport.issue(request).map(|r| r.map(Arc::new)).boxed()
        }
    }

    fn set(&self, value: T) -> FetchResult<()> {
        if self.is_destroyed() {
            return Err(FetchError::Destroyed);
        }
        let body = serde_json::to_vec(&value).map_err(|e| FetchError::Parse(e.to_string()))?;

        let state = self.lock_state();
        if let Some(descriptor) = &state.descriptor {
            self.shared.cache.store(
                descriptor.cache_key(),
                Arc::new(HttpResponse::ok(body)),
                self.options.freshness,
            );
        }
        self.snapshot.send_modify(|snapshot| snapshot.mark_local(value));
        Ok(())
    }

    async fn prefetch(&self, descriptor: RequestDescriptor) {
        if self.is_destroyed() {
            return;
        }
        let key = descriptor.cache_key();
        if matches!(self.shared.cache.peek(&key), Some(lookup) if !lookup.is_stale) {
            return;
        }

        match self.issue(descriptor.clone()).await {
            Ok(response) => match resolve_freshness(&response.headers, self.options.freshness) {
                FreshnessDecision::Store(freshness) => {
                    tracing::debug!(request = %descriptor, "Prefetched");
                    self.shared.cache.store(key, response, freshness);
                }
                FreshnessDecision::NoStore => {}
            },
            Err(error) => {
                tracing::warn!(request = %descriptor, error = %error, "Prefetch failed");
            }
        }
    }

    fn schedule_refresh(self: &Arc<Self>) {
        let Some(interval) = self.options.refresh_interval else {
            return;
        };
        if self.is_destroyed() || self.lock_state().descriptor.is_none() {
            return;
        }

        let resource = Arc::downgrade(self);
        self.refresh.replace(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(resource) = resource.upgrade() else {
                    break;
                };
                tracing::trace!("Periodic refresh");
                resource.fetch(FetchMode::Background).await;
            }
        }));
    }

    fn spawn_breaker_watcher(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            return;
        }

        let mut states = self.breaker.subscribe();
        let resource = Arc::downgrade(self);
        self.watcher.replace(tokio::spawn(async move {
            while states.changed().await.is_ok() {
                let disabled = *states.borrow_and_update() == CircuitState::Open;
                let Some(resource) = resource.upgrade() else {
                    break;
                };
                if resource.is_destroyed() {
                    break;
                }
                resource.snapshot.send_if_modified(|snapshot| {
                    let changed = snapshot.disabled != disabled;
                    snapshot.disabled = disabled;
                    changed
                });
            }
        }));
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.lock_state().generation += 1;
        self.retry.reset();
        self.refresh.cancel();
        self.watcher.cancel();
        tracing::debug!("Resource destroyed");
    }

    /// Apply `update` only while `generation` is still current.
    fn publish<F>(&self, generation: u64, update: F) -> bool
    where
        F: FnOnce(&mut ResourceSnapshot<T>),
    {
        let state = self.lock_state();
        if state.generation != generation || self.is_destroyed() {
            return false;
        }
        self.snapshot.send_modify(update);
        true
    }

    fn is_current(&self, generation: u64) -> bool {
        self.lock_state().generation == generation && !self.is_destroyed()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn lock_state(&self) -> MutexGuard<'_, ControllerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Validators from a cached response, as conditional request headers.
fn conditional_headers(lookup: &CacheLookup<Arc<HttpResponse>>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(value) = lookup.value.etag().and_then(|v| HeaderValue::from_str(v).ok()) {
        headers.insert(IF_NONE_MATCH, value);
    }
    if let Some(value) = lookup
        .value
        .last_modified()
        .and_then(|v| HeaderValue::from_str(v).ok())
    {
        headers.insert(IF_MODIFIED_SINCE, value);
    }
    headers
}

/// Resolve a 304 to the cached response.
///
/// Returns the response to parse and the headers carrying its freshness
/// directives. A 304 without its own Cache-Control keeps the cached ones.
fn settle_not_modified(
    response: Arc<HttpResponse>,
    cached: Option<&CacheLookup<Arc<HttpResponse>>>,
) -> FetchResult<(Arc<HttpResponse>, HeaderMap)> {
    if !response.is_not_modified() {
        let directives = response.headers.clone();
        return Ok((response, directives));
    }

    match cached {
        Some(lookup) => {
            let directives = if response.cache_control().is_some() {
                response.headers.clone()
            } else {
                lookup.value.headers.clone()
            };
            Ok((lookup.value.clone(), directives))
        }
        None => Err(FetchError::Transport(
            "304 Not Modified without a cached response".to_string(),
        )),
    }
}
