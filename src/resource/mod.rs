//! Resource subsystem: the consumer-facing surface.
//!
//! # Data Flow
//! ```text
//! FetchClient (shared cache, dedupe, transport, breakers)
//!     → ResourceBuilder → Resource<T>
//!         load / reload / refresh → controller.rs → ResourceSnapshot<T> (watch)
//!         set / update            → cache + publish
//!     → Mutation<B, T, H>
//!         mutate → hooks → transport → MutationSnapshot<T> (watch)
//! ```
//!
//! # Design Decisions
//! - Observers subscribe to explicit snapshots instead of derived state
//! - One breaker per resource unless one is shared explicitly
//! - Teardown is explicit (`destroy`) and repeated on drop

pub mod client;
pub mod controller;
pub mod mutation;
pub mod snapshot;

pub use client::{ClientError, ErrorCallback, FetchClient, Parser, ResourceBuilder};
pub use controller::Resource;
pub use mutation::{Mutation, MutationHooks, MutationSnapshot, NoHooks};
pub use snapshot::{ResourceSnapshot, ResourceStatus};
