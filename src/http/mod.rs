//! HTTP request/response model and the transport seam.
//!
//! # Data Flow
//! ```text
//! RequestDescriptor (method, url, params, headers, body)
//!     → request.rs (canonical form → cache key / identity)
//!     → transport.rs (issue via reqwest, attach request ID)
//!     → response.rs (status, headers, body; validators & cache-control)
//!     → types.rs (FetchError on any failure)
//! ```
//!
//! # Design Decisions
//! - Cache keys ignore headers; dedup identity includes them
//! - Non-2xx statuses (other than 304) are failures at the transport boundary
//! - The transport is a trait object so tests can script outcomes

pub mod request;
pub mod response;
pub mod transport;
pub mod types;

pub use request::{canonical_json, RequestDescriptor};
pub use response::HttpResponse;
pub use transport::{ReqwestTransport, Transport, X_REQUEST_ID};
pub use types::{FetchError, FetchResult};
