//! Client-side HTTP resilience and caching library

pub mod cache;
pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod resource;

pub use config::schema::ClientConfig;
pub use http::{FetchError, FetchResult, RequestDescriptor};
pub use resource::{FetchClient, Resource, ResourceSnapshot, ResourceStatus};
