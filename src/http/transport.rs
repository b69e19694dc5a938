//! Transport collaborator: issues a request and settles with a response or error.
//!
//! # Responsibilities
//! - Turn a `RequestDescriptor` into a concrete HTTP call
//! - Attach a unique request ID for tracing
//! - Classify failures (timeout, connection, non-success status)
//!
//! # Design Decisions
//! - `issue` returns a boxed `'static` future so the trait stays object-safe
//!   and the call can be shared between deduplicated waiters
//! - 304 is a success; the caller resolves it against its cached copy

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use reqwest::header::HeaderValue;
use uuid::Uuid;

use crate::config::TransportConfig;
use crate::http::request::RequestDescriptor;
use crate::http::response::HttpResponse;
use crate::http::types::{FetchError, FetchResult};
use crate::observability::metrics;

/// Request ID header name.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Something that can perform network I/O for a descriptor.
pub trait Transport: Send + Sync + 'static {
    fn issue(&self, request: RequestDescriptor) -> BoxFuture<'static, FetchResult<HttpResponse>>;
}

/// Production transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> FetchResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout())
            .build()
            .map_err(|e| FetchError::Transport(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn issue(&self, request: RequestDescriptor) -> BoxFuture<'static, FetchResult<HttpResponse>> {
        let client = self.client.clone();
        async move {
            let url = request.to_url()?;
            let request_id = Uuid::new_v4().to_string();

            let mut builder = client
                .request(request.method.clone(), url)
                .headers(request.headers.clone());
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                builder = builder.header(X_REQUEST_ID, value);
            }
            if let Some(body) = &request.body {
                builder = builder.json(body);
            }

            tracing::debug!(
                request_id = %request_id,
                method = %request.method,
                url = %request.url,
                "Issuing request"
            );

            let response = builder.send().await.map_err(|e| {
                metrics::record_request("error");
                if e.is_timeout() {
                    FetchError::Timeout
                } else {
                    FetchError::Transport(e.to_string())
                }
            })?;

            let status = response.status();
            let headers = response.headers().clone();
            let body = response.bytes().await.map_err(|e| {
                metrics::record_request("error");
                FetchError::Transport(format!("Failed to read body: {}", e))
            })?;

            if !(status.is_success() || status.as_u16() == 304) {
                metrics::record_request("status");
                tracing::debug!(
                    request_id = %request_id,
                    status = status.as_u16(),
                    "Request failed with status"
                );
                return Err(FetchError::Status {
                    code: status.as_u16(),
                    message: status
                        .canonical_reason()
                        .map(str::to_string)
                        .unwrap_or_else(|| String::from_utf8_lossy(&body).into_owned()),
                });
            }

            metrics::record_request("success");
            Ok(HttpResponse::new(status.as_u16(), headers, body.to_vec()))
        }
        .boxed()
    }
}
