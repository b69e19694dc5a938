//! Shared fetch context and resource construction.
//!
//! One `FetchClient` per application: it owns the process-wide cache (and its
//! eviction timer), the deduplicator, the transport and the endpoint breaker
//! registry. Resources and mutations built from it share all of these.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::cache::{Cache, CacheError, Freshness};
use crate::config::loader::join_errors;
use crate::config::{validate_config, ClientConfig, RetryConfig, ValidationError};
use crate::http::{FetchError, FetchResult, HttpResponse, ReqwestTransport, Transport};
use crate::lifecycle::TaskSlot;
use crate::resilience::{BreakerRegistry, CircuitBreaker, Deduplicator};
use crate::resource::controller::Resource;
use crate::resource::mutation::{Mutation, MutationHooks};

/// Turns a settled response into the resource's value type.
pub type Parser<T> = Arc<dyn Fn(&HttpResponse) -> FetchResult<T> + Send + Sync>;

/// Invoked with every failure a resource publishes.
pub type ErrorCallback = Arc<dyn Fn(&FetchError) + Send + Sync>;

/// Errors raised while setting up a client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Invalid configuration: {}", join_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("Transport setup failed: {0}")]
    Transport(#[from] FetchError),
}

pub(crate) struct ClientShared {
    pub(crate) config: ClientConfig,
    pub(crate) cache: Arc<Cache<Arc<HttpResponse>>>,
    pub(crate) dedupe: Deduplicator<FetchResult<Arc<HttpResponse>>>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) breakers: BreakerRegistry,
    _eviction: TaskSlot,
}

impl ClientShared {
    pub(crate) fn default_freshness(&self) -> Freshness {
        Freshness::new(
            self.config.cache.default_stale_time(),
            self.config.cache.default_ttl(),
        )
    }
}

/// Entry point: shared cache, dedup, transport and breakers.
#[derive(Clone)]
pub struct FetchClient {
    shared: Arc<ClientShared>,
}

impl FetchClient {
    /// Build a client that talks HTTP through `reqwest`.
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let transport = ReqwestTransport::new(&config.transport)?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Build a client around a custom transport.
    ///
    /// Starts the periodic cache eviction pass when called inside a Tokio runtime.
    pub fn with_transport(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, ClientError> {
        validate_config(&config).map_err(ClientError::InvalidConfig)?;

        let cache = Arc::new(Cache::new(&config.cache)?);
        let eviction = if tokio::runtime::Handle::try_current().is_ok() {
            cache.spawn_eviction()
        } else {
            tracing::warn!("No async runtime; cache eviction runs on store only");
            TaskSlot::new()
        };

        tracing::info!(
            max_size = config.cache.max_size,
            policy = ?config.cache.eviction_policy,
            breaker_threshold = config.circuit_breaker.threshold,
            retries = config.retries.max_attempts,
            "Fetch client initialized"
        );

        Ok(Self {
            shared: Arc::new(ClientShared {
                dedupe: Deduplicator::new(&config.dedupe),
                breakers: BreakerRegistry::new(config.circuit_breaker.clone()),
                cache,
                transport,
                config,
                _eviction: eviction,
            }),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.shared.config
    }

    /// The process-wide response cache.
    pub fn cache(&self) -> &Arc<Cache<Arc<HttpResponse>>> {
        &self.shared.cache
    }

    /// Shared breaker for the origin of `url`.
    pub fn endpoint_breaker(&self, url: &str) -> CircuitBreaker {
        self.shared.breakers.for_endpoint(url)
    }

    /// Number of deduplicated calls currently in flight.
    pub fn pending_requests(&self) -> usize {
        self.shared.dedupe.pending_count()
    }

    /// Start building a resource whose value is parsed as JSON into `T`.
    pub fn resource<T>(&self) -> ResourceBuilder<T>
    where
        T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
    {
        ResourceBuilder::new(self.shared.clone())
    }

    /// Build a mutation that sends `B` bodies and parses `T` responses.
    pub fn mutation<B, T, H>(&self, hooks: H) -> Mutation<B, T, H>
    where
        B: Serialize + Send + 'static,
        T: DeserializeOwned + Clone + Send + Sync + 'static,
        H: MutationHooks<B, T>,
    {
        Mutation::new(self.shared.clone(), hooks)
    }
}

#[derive(Clone)]
pub(crate) enum BreakerChoice {
    Dedicated,
    Shared(CircuitBreaker),
}

pub(crate) struct ResourceOptions<T> {
    pub(crate) keep_previous: bool,
    pub(crate) serve_stale: bool,
    pub(crate) refresh_interval: Option<Duration>,
    pub(crate) freshness: Freshness,
    pub(crate) retry: RetryConfig,
    pub(crate) dedupe: bool,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) parser: Parser<T>,
}

/// Configures and creates a [`Resource`].
pub struct ResourceBuilder<T> {
    shared: Arc<ClientShared>,
    options: ResourceOptions<T>,
    breaker: BreakerChoice,
}

impl<T> ResourceBuilder<T>
where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + 'static,
{
    fn new(shared: Arc<ClientShared>) -> Self {
        let options = ResourceOptions {
            keep_previous: false,
            serve_stale: true,
            refresh_interval: None,
            freshness: shared.default_freshness(),
            retry: shared.config.retries.clone(),
            dedupe: true,
            on_error: None,
            parser: Arc::new(|response: &HttpResponse| response.json::<T>()),
        };
        Self {
            shared,
            options,
            breaker: BreakerChoice::Dedicated,
        }
    }

    /// Keep showing the last resolved value while a new request loads.
    pub fn keep_previous(mut self, keep: bool) -> Self {
        self.options.keep_previous = keep;
        self
    }

    /// Publish a stale cache entry while it is revalidated (on by default).
    ///
    /// When off, revalidation looks like any other load: the value is cleared
    /// unless `keep_previous` holds it.
    pub fn serve_stale(mut self, serve: bool) -> Self {
        self.options.serve_stale = serve;
        self
    }

    /// Re-issue the current request on a fixed interval.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.options.refresh_interval = Some(interval);
        self
    }

    /// Default stale time for responses without Cache-Control guidance.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.options.freshness.stale_time = Some(stale_time);
        self
    }

    /// Default time-to-live for responses without Cache-Control guidance.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.options.freshness.ttl = Some(ttl);
        self
    }

    /// Maximum retry attempts. Zero disables retries.
    pub fn retries(mut self, max_attempts: u32) -> Self {
        self.options.retry.max_attempts = max_attempts;
        self
    }

    pub fn retry_backoff(mut self, base_delay: Duration) -> Self {
        self.options.retry.base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    /// Share `breaker` with other resources.
    pub fn circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = BreakerChoice::Shared(breaker);
        self
    }

    /// Use the client's shared breaker for the origin of `url`.
    pub fn endpoint_breaker(mut self, url: &str) -> Self {
        self.breaker = BreakerChoice::Shared(self.shared.breakers.for_endpoint(url));
        self
    }

    pub fn dedupe(mut self, enabled: bool) -> Self {
        self.options.dedupe = enabled;
        self
    }

    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(&FetchError) + Send + Sync + 'static,
    {
        self.options.on_error = Some(Arc::new(callback));
        self
    }

    /// Replace the JSON parser. Failures are treated like transport failures.
    pub fn parser<F>(mut self, parser: F) -> Self
    where
        F: Fn(&HttpResponse) -> FetchResult<T> + Send + Sync + 'static,
    {
        self.options.parser = Arc::new(parser);
        self
    }

    pub fn build(self) -> Resource<T> {
        let breaker = match self.breaker {
            BreakerChoice::Dedicated => self.shared.breakers.dedicated(),
            BreakerChoice::Shared(breaker) => breaker,
        };
        Resource::new(self.shared, self.options, breaker)
    }
}
