//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Owner (Cache, CircuitBreaker, Resource):
//!     spawn background task → TaskSlot::replace (aborts previous)
//!     cancel / destroy      → TaskSlot::cancel  (aborts current)
//!     owner dropped         → TaskSlot::drop    (aborts current)
//!
//! Background task:
//!     holds Weak<owner> → exits on its own once upgrade fails
//! ```
//!
//! # Design Decisions
//! - Every timer is a tokio task owned by exactly one slot
//! - Teardown is explicit (`destroy`) and also guaranteed on drop
//! - Tasks never keep their owner alive

pub mod task;

pub use task::TaskSlot;
