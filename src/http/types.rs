//! Fetch error definitions.

use thiserror::Error;

/// Errors surfaced by the fetch path.
///
/// Cloneable so a single settled outcome can be handed to every caller that
/// joined a deduplicated request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection or protocol failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Request did not complete within the configured timeout.
    #[error("Request timed out")]
    Timeout,

    /// Server answered with a non-success status.
    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    /// Response body rejected by the parse function.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Circuit breaker is blocking calls.
    #[error("Circuit open: calls are suspended")]
    CircuitOpen,

    /// The owning resource was destroyed before the call settled.
    #[error("Resource destroyed")]
    Destroyed,
}

impl FetchError {
    /// HTTP status code, if the failure came from a response.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            FetchError::Status { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_parse(&self) -> bool {
        matches!(self, FetchError::Parse(_))
    }
}

/// Result type for fetch operations.
pub type FetchResult<T> = Result<T, FetchError>;
