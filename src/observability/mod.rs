//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via the `metrics` facade)
//!
//! Consumers:
//!     → Log output (stdout, human-readable or JSON)
//!     → Whatever metrics recorder the embedding application installs
//! ```
//!
//! # Design Decisions
//! - Structured fields (key, state, attempt) instead of formatted strings
//! - The library never installs a metrics exporter; the facade is a no-op
//!   until the application sets a recorder

pub mod logging;
pub mod metrics;
