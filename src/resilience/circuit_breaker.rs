//! Circuit breaker for endpoint protection.
//!
//! # States
//! - Closed: normal operation, calls are allowed and failures counted
//! - Open: endpoint assumed down, calls are denied outright
//! - Half-Open: one trial call allowed to test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: failure_count >= threshold
//! Open → Half-Open: reset timer elapses, or half_open() (explicit reload)
//!                   failure_count = threshold - 1
//! Half-Open → Closed: success (failure_count = 0)
//! Half-Open → Open: failure (restarts the reset timer)
//! ```
//!
//! # Design Decisions
//! - The breaker never intercepts calls; callers check `is_available()` first
//! - Success while Open is ignored (it belongs to a call issued earlier)
//! - One breaker per resource unless the caller shares one explicitly

use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

use crate::config::CircuitBreakerConfig;
use crate::lifecycle::TaskSlot;
use crate::observability::metrics;

/// Circuit breaker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls are allowed.
    Closed,
    /// Calls are blocked.
    Open,
    /// A probe call is allowed.
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: Mutex<BreakerState>,
    threshold: u32,
    reset_timeout: Duration,
    reset_timer: TaskSlot,
    state_tx: watch::Sender<CircuitState>,
}

/// Cheaply cloneable handle to a shared breaker.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    inner: Arc<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker that opens after `threshold` consecutive failures.
    pub fn new(threshold: u32, reset_timeout: Duration) -> Self {
        let (state_tx, _) = watch::channel(CircuitState::Closed);
        Self {
            inner: Arc::new(BreakerInner {
                state: Mutex::new(BreakerState {
                    state: CircuitState::Closed,
                    failure_count: 0,
                }),
                threshold: threshold.max(1),
                reset_timeout,
                reset_timer: TaskSlot::new(),
                state_tx,
            }),
        }
    }

    pub fn from_config(config: &CircuitBreakerConfig) -> Self {
        Self::new(config.threshold, config.reset_timeout())
    }

    /// Whether a call may be issued right now.
    pub fn is_available(&self) -> bool {
        self.state() != CircuitState::Open
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn threshold(&self) -> u32 {
        self.inner.threshold
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<CircuitState> {
        self.inner.state_tx.subscribe()
    }

    /// Report a successful call.
    pub fn success(&self) {
        let closed = {
            let mut state = self.lock();
            match state.state {
                CircuitState::Open => false,
                CircuitState::Closed => {
                    state.failure_count = 0;
                    false
                }
                CircuitState::HalfOpen => {
                    state.failure_count = 0;
                    self.transition(&mut state, CircuitState::Closed);
                    true
                }
            }
        };

        if closed {
            self.inner.reset_timer.cancel();
            tracing::info!("Circuit breaker closed after successful probe");
        }
    }

    /// Report a failed call.
    pub fn fail(&self) {
        let opened = {
            let mut state = self.lock();
            state.failure_count = state.failure_count.saturating_add(1);
            if state.state != CircuitState::Open && state.failure_count >= self.inner.threshold {
                self.transition(&mut state, CircuitState::Open);
                Some(state.failure_count)
            } else {
                None
            }
        };

        if let Some(failure_count) = opened {
            tracing::warn!(
                failure_count,
                threshold = self.inner.threshold,
                reset_timeout_ms = self.inner.reset_timeout.as_millis() as u64,
                "Circuit breaker opened"
            );
            self.start_reset_timer();
        }
    }

    /// Move Open → Half-Open, allowing one probe. No-op in any other state.
    ///
    /// Returns whether a transition happened.
    pub fn half_open(&self) -> bool {
        let mut state = self.lock();
        if state.state != CircuitState::Open {
            return false;
        }
        state.failure_count = self.inner.threshold - 1;
        self.transition(&mut state, CircuitState::HalfOpen);
        drop(state);

        tracing::info!("Circuit breaker half-open, allowing probe");
        true
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState) {
        state.state = next;
        self.inner.state_tx.send_replace(next);
        metrics::record_breaker_transition(next.as_str());
    }

    fn start_reset_timer(&self) {
        if tokio::runtime::Handle::try_current().is_err() {
            tracing::warn!("No async runtime; circuit breaker stays open until half_open()");
            return;
        }

        let breaker = Arc::downgrade(&self.inner);
        let delay = self.inner.reset_timeout;
        self.inner.reset_timer.replace(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = breaker.upgrade() {
                CircuitBreaker { inner }.half_open();
            }
        }));
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Breakers shared per endpoint origin (`scheme://host:port`).
#[derive(Debug)]
pub struct BreakerRegistry {
    breakers: DashMap<String, CircuitBreaker>,
    config: CircuitBreakerConfig,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
        }
    }

    /// The breaker guarding the origin of `url`, created on first use.
    pub fn for_endpoint(&self, url: &str) -> CircuitBreaker {
        let endpoint = url::Url::parse(url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_else(|_| url.to_string());
        self.breakers
            .entry(endpoint)
            .or_insert_with(|| CircuitBreaker::from_config(&self.config))
            .clone()
    }

    /// A fresh breaker owned by a single resource.
    pub fn dedicated(&self) -> CircuitBreaker {
        CircuitBreaker::from_config(&self.config)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}
