//! Retry scheduling.
//!
//! # Responsibilities
//! - On failure, schedule a retry after exponential backoff, up to `max_attempts`
//! - On success, cancel any scheduled retry and reset the attempt counter
//!
//! # Design Decisions
//! - At most one retry is scheduled at a time; a new failure replaces it
//! - The retry action runs in its own task, so cancelling the timer never
//!   interrupts a retry that has already started
//! - Retries go back through the owner's reload path, not a raw re-issue

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::lifecycle::TaskSlot;
use crate::observability::metrics;
use crate::resilience::backoff::calculate_backoff;

/// Bounded exponential-backoff retry state for one resource.
#[derive(Debug)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter: bool,
    attempts: AtomicU32,
    timer: TaskSlot,
}

impl RetryPolicy {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            jitter: config.jitter,
            attempts: AtomicU32::new(0),
            timer: TaskSlot::new(),
        }
    }

    /// Handle a failed outcome. Returns the scheduled delay, or `None` if the
    /// budget is exhausted (or retries are disabled).
    pub fn on_failure<F>(&self, retry: F) -> Option<Duration>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.timer.cancel();

        let attempt = self.attempts.load(Ordering::SeqCst);
        if attempt >= self.max_attempts {
            if self.max_attempts > 0 {
                tracing::debug!(attempts = attempt, "Retry budget exhausted");
            }
            return None;
        }

        let delay = calculate_backoff(attempt, self.base_delay, self.max_delay, self.jitter);
        self.attempts.store(attempt + 1, Ordering::SeqCst);

        self.timer.replace(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(retry);
        }));

        tracing::debug!(
            attempt = attempt + 1,
            delay_ms = delay.as_millis() as u64,
            "Retry scheduled"
        );
        metrics::record_retry_scheduled();
        Some(delay)
    }

    /// Handle a successful outcome.
    pub fn on_success(&self) {
        self.reset();
    }

    /// Cancel the scheduled retry, if any, keeping the attempt count.
    pub fn cancel(&self) -> bool {
        self.timer.cancel()
    }

    /// Cancel and forget all attempts.
    pub fn reset(&self) {
        self.timer.cancel();
        self.attempts.store(0, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn is_scheduled(&self) -> bool {
        self.timer.is_active()
    }
}
