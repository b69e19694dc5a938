//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! Successful response
//!     → directives.rs (Cache-Control → Freshness or NoStore)
//!     → store.rs (insert/update entry, eviction check)
//!
//! Lookup
//!     → store.rs (absent | fresh | stale; expired entries dropped)
//!
//! Timer (check_interval)
//!     → store.rs (purge expired, evict to max_size / 2)
//! ```
//!
//! # Design Decisions
//! - Eviction halves the cache instead of trimming to the limit, so the cost
//!   of a pass is spread over many stores
//! - `Lru` ranks by use count, `Oldest` by creation time
//! - Immutable entries get no special treatment under size pressure

pub mod directives;
pub mod entry;
pub mod store;

pub use directives::{resolve_freshness, CacheDirectives, FreshnessDecision};
pub use entry::{CacheEntry, CacheLookup, Freshness};
pub use store::{Cache, CacheError};
