use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP transport operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the target fails or is reset mid-request
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request times out
    #[error("Timeout error after {0} seconds")]
    Timeout(u64),

    /// Error when request is invalid and can never succeed as sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl HttpClientError {
    /// Whether the balancing layer may reissue the request against another instance.
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpClientError::ConnectionError(_) | HttpClientError::Timeout(_) => true,
            HttpClientError::InvalidRequest(_) => false,
        }
    }

    /// Short label used as the failure category in balancer telemetry.
    pub fn category(&self) -> &'static str {
        match self {
            HttpClientError::ConnectionError(_) => "connection error",
            HttpClientError::Timeout(_) => "timeout",
            HttpClientError::InvalidRequest(_) => "invalid request",
        }
    }
}

/// Result type alias for HTTP transport operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for sending one fully resolved
/// request to one concrete instance.
///
/// Implementations own timeouts and connection pooling. They must not retry on
/// their own; retry and failover decisions belong to the balancing layer.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request with an absolute URI
    ///
    /// # Arguments
    /// * `req` - The HTTP request to send, body fully buffered
    ///
    /// # Returns
    /// A future that resolves to the buffered response or a transport error
    async fn send_request(&self, req: Request<Bytes>) -> HttpClientResult<Response<Bytes>>;
}
