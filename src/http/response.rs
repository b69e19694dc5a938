//! Transport-independent response model.

use reqwest::header::{HeaderMap, CACHE_CONTROL, ETAG, LAST_MODIFIED};
use serde::de::DeserializeOwned;

use crate::http::types::FetchError;

/// A settled HTTP response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }

    /// A 200 response carrying `body` and no headers.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self::new(200, HeaderMap::new(), body)
    }

    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    pub fn etag(&self) -> Option<&str> {
        self.header_str(ETAG.as_str())
    }

    pub fn last_modified(&self) -> Option<&str> {
        self.header_str(LAST_MODIFIED.as_str())
    }

    pub fn cache_control(&self) -> Option<&str> {
        self.header_str(CACHE_CONTROL.as_str())
    }

    fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Deserialize the body as JSON. An empty body reads as `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        let body: &[u8] = if self.body.is_empty() { b"null" } else { &self.body };
        serde_json::from_slice(body).map_err(|e| FetchError::Parse(e.to_string()))
    }
}
