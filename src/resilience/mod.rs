//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Before issuing:
//!     → circuit_breaker.rs (is_available? otherwise surface "disabled")
//!     → dedupe.rs (join an identical in-flight call, or start one)
//! After settlement:
//!     → circuit_breaker.rs (success / fail)
//!     → retries.rs (schedule reload with backoff.rs delay, or reset)
//! ```
//!
//! # Design Decisions
//! - Breaker is advisory: callers check it, it never wraps the call
//! - Retries re-enter through reload so cache, breaker and dedup apply again
//! - Only idempotent requests are coalesced

pub mod backoff;
pub mod circuit_breaker;
pub mod dedupe;
pub mod retries;

pub use backoff::calculate_backoff;
pub use circuit_breaker::{BreakerRegistry, CircuitBreaker, CircuitState};
pub use dedupe::{Deduplicator, SharedOutcome};
pub use retries::RetryPolicy;
