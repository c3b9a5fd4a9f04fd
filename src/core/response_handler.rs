//! Response handlers turn the final transport outcome into a caller value.
//!
//! The balancing client consumes retryable failures itself; a handler only
//! sees the outcome of the last attempt.
use std::marker::PhantomData;

use bytes::Bytes;
use http::{Response, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{core::request::Request, ports::http_client::HttpClientError};

/// Converts a response (or transport failure) into the caller's result type
pub trait ResponseHandler: Send + Sync + 'static {
    type Output: Send + 'static;
    type Error: Send + 'static;

    /// Handle a response received from an instance
    fn handle(&self, request: &Request, response: Response<Bytes>) -> Result<Self::Output, Self::Error>;

    /// Map a transport failure into the handler's error type
    fn handle_exception(&self, request: &Request, error: HttpClientError) -> Self::Error;
}

/// Errors produced by the bundled handlers
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ResponseHandlerError {
    #[error("Request failed: {0}")]
    Transport(#[from] HttpClientError),

    #[error("Unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },

    #[error("Cannot decode response body: {0}")]
    Decode(String),
}

/// Returns the status code of whatever response arrives
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusResponseHandler;

impl ResponseHandler for StatusResponseHandler {
    type Output = StatusCode;
    type Error = ResponseHandlerError;

    fn handle(&self, _request: &Request, response: Response<Bytes>) -> Result<StatusCode, ResponseHandlerError> {
        Ok(response.status())
    }

    fn handle_exception(&self, _request: &Request, error: HttpClientError) -> ResponseHandlerError {
        ResponseHandlerError::Transport(error)
    }
}

/// Returns the body as UTF-8 text for 2xx responses
#[derive(Debug, Default, Clone, Copy)]
pub struct StringResponseHandler;

impl ResponseHandler for StringResponseHandler {
    type Output = String;
    type Error = ResponseHandlerError;

    fn handle(&self, _request: &Request, response: Response<Bytes>) -> Result<String, ResponseHandlerError> {
        let status = response.status();
        let body = String::from_utf8_lossy(response.body()).into_owned();
        if !status.is_success() {
            return Err(ResponseHandlerError::UnexpectedStatus { status, body });
        }
        Ok(body)
    }

    fn handle_exception(&self, _request: &Request, error: HttpClientError) -> ResponseHandlerError {
        ResponseHandlerError::Transport(error)
    }
}

/// Decodes a JSON body for 2xx responses
pub struct JsonResponseHandler<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonResponseHandler<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonResponseHandler<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ResponseHandler for JsonResponseHandler<T>
where
    T: DeserializeOwned + Send + 'static,
{
    type Output = T;
    type Error = ResponseHandlerError;

    fn handle(&self, _request: &Request, response: Response<Bytes>) -> Result<T, ResponseHandlerError> {
        let status = response.status();
        if !status.is_success() {
            return Err(ResponseHandlerError::UnexpectedStatus {
                status,
                body: String::from_utf8_lossy(response.body()).into_owned(),
            });
        }
        serde_json::from_slice(response.body())
            .map_err(|e| ResponseHandlerError::Decode(e.to_string()))
    }

    fn handle_exception(&self, _request: &Request, error: HttpClientError) -> ResponseHandlerError {
        ResponseHandlerError::Transport(error)
    }
}
