//! Write requests with settlement hooks.
//!
//! # Responsibilities
//! - Run `on_mutate → issue → on_success | on_error → on_settled` exactly once
//!   per `mutate` call
//! - Gate writes on the circuit breaker and report outcomes to it
//! - Invalidate dependent cache keys after a successful write
//!
//! # Design Decisions
//! - The protocol runs in its own task, so dropping the caller's future
//!   cannot skip `on_settled`
//! - Writes are never cached or deduplicated
//! - A superseded mutation still settles its hooks but no longer publishes

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::http::{FetchError, FetchResult, RequestDescriptor};
use crate::resilience::CircuitBreaker;
use crate::resource::client::ClientShared;
use crate::resource::snapshot::ResourceStatus;

/// Callbacks around a mutation.
///
/// `Context` is produced before the write (typically a rollback token for an
/// optimistic update) and handed to the settlement hooks.
pub trait MutationHooks<B, T>: Send + Sync + 'static {
    type Context: Send + 'static;

    fn on_mutate(&self, body: &B) -> Self::Context;

    fn on_success(&self, _value: &T, _context: &Self::Context) {}

    fn on_error(&self, _error: &FetchError, _context: &Self::Context) {}

    /// Always runs last, after exactly one of `on_success` / `on_error`.
    fn on_settled(&self, _context: Self::Context) {}
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<B, T> MutationHooks<B, T> for NoHooks {
    type Context = ();

    fn on_mutate(&self, _body: &B) {}
}

/// Read model of the most recent mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationSnapshot<T> {
    pub value: Option<T>,
    pub status: ResourceStatus,
    pub is_loading: bool,
    pub error: Option<FetchError>,
    pub status_code: Option<u16>,
}

impl<T> Default for MutationSnapshot<T> {
    fn default() -> Self {
        Self {
            value: None,
            status: ResourceStatus::Idle,
            is_loading: false,
            error: None,
            status_code: None,
        }
    }
}

/// Sends `B` bodies and parses `T` responses.
pub struct Mutation<B, T, H> {
    shared: Arc<ClientShared>,
    hooks: Arc<H>,
    breaker: CircuitBreaker,
    invalidates: Vec<RequestDescriptor>,
    generation: Arc<AtomicU64>,
    snapshot: Arc<watch::Sender<MutationSnapshot<T>>>,
    _body: PhantomData<fn(B)>,
}

impl<B, T, H> Mutation<B, T, H>
where
    B: Serialize + Send + 'static,
    T: DeserializeOwned + Clone + Send + Sync + 'static,
    H: MutationHooks<B, T>,
{
    pub(crate) fn new(shared: Arc<ClientShared>, hooks: H) -> Self {
        let (snapshot, _) = watch::channel(MutationSnapshot::default());
        Self {
            breaker: shared.breakers.dedicated(),
            shared,
            hooks: Arc::new(hooks),
            invalidates: Vec::new(),
            generation: Arc::new(AtomicU64::new(0)),
            snapshot: Arc::new(snapshot),
            _body: PhantomData,
        }
    }

    /// Share `breaker` with other resources or mutations.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    /// Use the client's shared breaker for the origin of `url`.
    pub fn endpoint_breaker(mut self, url: &str) -> Self {
        self.breaker = self.shared.breakers.for_endpoint(url);
        self
    }

    /// Drop the cached response for `descriptor` after every successful write.
    pub fn invalidates(mut self, descriptor: RequestDescriptor) -> Self {
        self.invalidates.push(descriptor);
        self
    }

    /// Send `body` as the JSON body of `request`.
    ///
    /// Hooks settle even if the returned future is dropped.
    pub async fn mutate(&self, request: RequestDescriptor, body: B) -> FetchResult<T> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let run = MutationRun {
            shared: self.shared.clone(),
            hooks: self.hooks.clone(),
            breaker: self.breaker.clone(),
            invalidates: self.invalidates.clone(),
            current: self.generation.clone(),
            snapshot: self.snapshot.clone(),
            generation,
        };

        tokio::spawn(run.execute(request, body))
            .await
            .map_err(|e| FetchError::Transport(format!("Mutation task failed: {e}")))?
    }

    pub fn snapshot(&self) -> MutationSnapshot<T> {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<MutationSnapshot<T>> {
        self.snapshot.subscribe()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Return to `Idle`. In-flight mutations stop publishing.
    pub fn reset(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.snapshot.send_replace(MutationSnapshot::default());
    }
}

struct MutationRun<T, H> {
    shared: Arc<ClientShared>,
    hooks: Arc<H>,
    breaker: CircuitBreaker,
    invalidates: Vec<RequestDescriptor>,
    current: Arc<AtomicU64>,
    snapshot: Arc<watch::Sender<MutationSnapshot<T>>>,
    generation: u64,
}

impl<T, H> MutationRun<T, H>
where
    T: DeserializeOwned + Clone + Send + Sync + 'static,
{
    async fn execute<B>(self, request: RequestDescriptor, body: B) -> FetchResult<T>
    where
        B: Serialize + Send + 'static,
        H: MutationHooks<B, T>,
    {
        let context = self.hooks.on_mutate(&body);
        self.publish(|snapshot| {
            snapshot.status = ResourceStatus::Loading;
            snapshot.is_loading = true;
            snapshot.error = None;
        });

        let payload = serde_json::to_value(&body).map_err(|e| FetchError::Parse(e.to_string()));
        let outcome = self.send(request, payload).await;
        match &outcome {
            Ok(value) => self.hooks.on_success(value, &context),
            Err(error) => self.hooks.on_error(error, &context),
        }
        self.hooks.on_settled(context);

        self.publish(|snapshot| {
            snapshot.is_loading = false;
            match &outcome {
                Ok(value) => {
                    snapshot.value = Some(value.clone());
                    snapshot.status = ResourceStatus::Resolved;
                    snapshot.error = None;
                    snapshot.status_code = None;
                }
                Err(error) => {
                    snapshot.value = None;
                    snapshot.status = ResourceStatus::Errored;
                    snapshot.status_code = error.status_code();
                    snapshot.error = Some(error.clone());
                }
            }
        });
        outcome
    }

    async fn send(
        &self,
        request: RequestDescriptor,
        payload: FetchResult<serde_json::Value>,
    ) -> FetchResult<T> {
        let payload = payload?;
        if !self.breaker.is_available() {
            return Err(FetchError::CircuitOpen);
        }

        let request = request.json_body(payload).no_dedupe();
        tracing::debug!(request = %request, "Sending mutation");

        let outcome = self
            .shared
            .transport
            .issue(request)
            .await
            .and_then(|response| response.json::<T>());

        match &outcome {
            Ok(_) => {
                self.breaker.success();
                for descriptor in &self.invalidates {
                    self.shared.cache.invalidate(&descriptor.cache_key());
                }
            }
            Err(error) => {
                self.breaker.fail();
                tracing::warn!(error = %error, "Mutation failed");
            }
        }
        outcome
    }

    fn publish<F>(&self, update: F)
    where
        F: FnOnce(&mut MutationSnapshot<T>),
    {
        let generation = self.generation;
        let current = &self.current;
        self.snapshot.send_if_modified(|snapshot| {
            if current.load(Ordering::SeqCst) != generation {
                return false;
            }
            update(snapshot);
            true
        });
    }
}
