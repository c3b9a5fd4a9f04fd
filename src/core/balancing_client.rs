//! HTTP client that spreads requests over a balancer's candidates and fails
//! over to another instance on retryable failures.
use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use http::{Response, StatusCode};
use tracing::Instrument;

use crate::{
    config::BalancingClientConfig,
    core::{
        backoff::DecorrelatedJitteredBackoff,
        balancer::{BalancerError, BalancerResult, HttpServiceAttempt, HttpServiceBalancer},
        request::Request,
        response_future::{HttpResponseFuture, InflightSlot, RequestError},
        response_handler::ResponseHandler,
    },
    ports::http_client::{HttpClient, HttpClientResult},
    tracing_setup,
};

/// Statuses an instance returns when another instance may well succeed
pub const RETRYABLE_STATUS_CODES: [u16; 8] = [408, 499, 500, 502, 503, 504, 598, 599];

/// Response header an instance sets to forbid failover for its response
pub const X_RETRY: &str = "x-retry";

/// Whether a response counts as a retryable instance failure
pub fn is_retryable_response(response: &Response<Bytes>) -> bool {
    if !RETRYABLE_STATUS_CODES.contains(&response.status().as_u16()) {
        return false;
    }
    let suppressed = response
        .headers()
        .get(X_RETRY)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.trim().eq_ignore_ascii_case("no"));
    !suppressed
}

fn status_category(status: StatusCode) -> String {
    format!("{} status code", status.as_u16())
}

/// Load-balanced HTTP client for one service type.
///
/// Each call selects an instance through the balancer, sends the request via
/// the transport, and on a retryable failure marks the instance bad, waits a
/// jittered backoff and reissues the request against a not-yet-tried
/// instance, up to `max_retries` extra attempts.
pub struct BalancingHttpClient {
    balancer: Arc<HttpServiceBalancer>,
    http_client: Arc<dyn HttpClient>,
    max_retries: u32,
    backoff: DecorrelatedJitteredBackoff,
}

impl BalancingHttpClient {
    pub fn new(
        balancer: Arc<HttpServiceBalancer>,
        http_client: Arc<dyn HttpClient>,
        config: &BalancingClientConfig,
    ) -> Self {
        Self {
            balancer,
            http_client,
            max_retries: config.max_retries,
            backoff: DecorrelatedJitteredBackoff::new(config.min_backoff, config.max_backoff),
        }
    }

    pub fn balancer(&self) -> &Arc<HttpServiceBalancer> {
        &self.balancer
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Start a balanced request and return a handle to its eventual result.
    ///
    /// Fails synchronously if the request URI is not relative or there are
    /// no candidates; neither is retried. Must be called from within a Tokio
    /// runtime.
    pub fn execute_async<H: ResponseHandler>(
        &self,
        request: Request,
        handler: H,
    ) -> BalancerResult<HttpResponseFuture<H::Output, H::Error>> {
        request.validate_relative()?;
        let attempt = self.balancer.create_attempt()?;

        let span = tracing_setup::create_balanced_request_span(
            self.balancer.description(),
            request.method().as_str(),
            request.uri(),
        );
        let slot = Arc::new(InflightSlot::new());
        let exchange = Exchange {
            request,
            handler,
            http_client: Arc::clone(&self.http_client),
            backoff: self.backoff,
            slot: Arc::clone(&slot),
        };
        let driver = tokio::spawn(exchange.run(attempt, self.max_retries).instrument(span));

        Ok(HttpResponseFuture::new(driver, slot))
    }

    /// Send a balanced request and wait for the handler's result
    pub async fn execute<H: ResponseHandler>(
        &self,
        request: Request,
        handler: H,
    ) -> Result<H::Output, RequestError<H::Error>> {
        self.execute_async(request, handler)?.await
    }
}

impl std::fmt::Debug for BalancingHttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BalancingHttpClient")
            .field("balancer", &self.balancer)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .finish()
    }
}

/// Everything the driver task needs for one logical request
struct Exchange<H> {
    request: Request,
    handler: H,
    http_client: Arc<dyn HttpClient>,
    backoff: DecorrelatedJitteredBackoff,
    slot: Arc<InflightSlot>,
}

impl<H: ResponseHandler> Exchange<H> {
    async fn run(
        self,
        mut attempt: HttpServiceAttempt,
        max_retries: u32,
    ) -> Result<H::Output, RequestError<H::Error>> {
        let mut retries_left = max_retries;
        let mut previous_backoff = Duration::ZERO;
        let mut retried = false;

        loop {
            let outcome = match self.send(&mut attempt, retried).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.slot.complete();
                    return Err(e);
                }
            };

            let failure = match &outcome {
                Ok(response) if is_retryable_response(response) => {
                    Some(status_category(response.status()))
                }
                Ok(_) => None,
                Err(e) if e.is_retryable() => Some(e.category().to_string()),
                Err(_) => None,
            };

            let Some(category) = failure.filter(|_| retries_left > 0) else {
                return self.finish(attempt, outcome);
            };

            retries_left -= 1;
            attempt.mark_bad(&category);
            tracing::warn!(
                uri = %attempt.uri(),
                failure = %category,
                retries_left,
                "Retrying request on another instance"
            );

            let delay = self.backoff.backoff(previous_backoff);
            previous_backoff = delay;
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            attempt = match attempt.try_next() {
                Ok(next) => next,
                Err(e) => {
                    self.slot.complete();
                    return Err(RequestError::Balancer(e));
                }
            };
            retried = true;
        }
    }

    /// Launch one sub-request against the attempt's URI and wait for it
    async fn send(
        &self,
        attempt: &mut HttpServiceAttempt,
        retried: bool,
    ) -> Result<HttpClientResult<Response<Bytes>>, RequestError<H::Error>> {
        let sub_request = match self.request.to_http(attempt.uri()) {
            Ok(sub_request) => sub_request,
            Err(e) => {
                attempt.mark_bad("invalid request");
                return Err(RequestError::Balancer(e));
            }
        };

        tracing::debug!(uri = %sub_request.uri(), %attempt, "Sending request");
        let http_client = Arc::clone(&self.http_client);
        let sub = tokio::spawn(
            async move { http_client.send_request(sub_request).await }
                .instrument(tracing::Span::current()),
        );

        if !self.slot.install(
            sub.abort_handle(),
            attempt.to_string(),
            attempt.uri().clone(),
            retried,
        ) {
            return Err(RequestError::Cancelled);
        }

        match sub.await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_cancelled() => Err(RequestError::Cancelled),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }

    /// Hand the last outcome to the handler and record the attempt's verdict
    fn finish(
        self,
        mut attempt: HttpServiceAttempt,
        outcome: HttpClientResult<Response<Bytes>>,
    ) -> Result<H::Output, RequestError<H::Error>> {
        let result = match outcome {
            Ok(response) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());
                if is_retryable_response(&response) {
                    attempt.mark_bad(&status_category(response.status()));
                } else {
                    attempt.mark_good();
                }
                self.handler
                    .handle(&self.request, response)
                    .map_err(RequestError::Handler)
            }
            Err(e) => {
                attempt.mark_bad(e.category());
                tracing::debug!(uri = %attempt.uri(), error = %e, "Request failed");
                Err(RequestError::Handler(
                    self.handler.handle_exception(&self.request, e),
                ))
            }
        };

        if !self.slot.complete() {
            return Err(RequestError::Cancelled);
        }
        result
    }
}

impl<E> From<BalancerError> for RequestError<E> {
    fn from(e: BalancerError) -> Self {
        RequestError::Balancer(e)
    }
}
