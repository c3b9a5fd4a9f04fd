//! The caller-facing handle for an in-flight balanced request.
//!
//! The driver task for a logical request publishes each sub-request it
//! launches into an [`InflightSlot`]. Cancellation and completion both go
//! through the slot's lock, so a cancel either wins (the current sub-request
//! is aborted and nothing further is launched) or observes a finished request
//! and does nothing.
use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, MutexGuard},
    task::{Context, Poll},
    time::Duration,
};

use thiserror::Error;
use tokio::task::{AbortHandle, JoinHandle};
use url::Url;

use crate::core::balancer::BalancerError;

/// Errors surfaced when awaiting a balanced request
#[derive(Error, Debug)]
pub enum RequestError<E> {
    /// The response handler failed, or mapped a transport failure
    #[error("Request failed: {0}")]
    Handler(E),

    /// Selection failed while failing over to another instance
    #[error(transparent)]
    Balancer(BalancerError),

    /// The request was cancelled before it completed
    #[error("Request was cancelled")]
    Cancelled,

    /// The caller's deadline elapsed first
    #[error("Request timed out after {0:?}")]
    TimedOut(Duration),
}

impl<E> RequestError<E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RequestError::Cancelled)
    }

    /// The handler error, if that is what this is
    pub fn into_handler_error(self) -> Option<E> {
        match self {
            RequestError::Handler(e) => Some(e),
            _ => None,
        }
    }
}

/// Progress of the current sub-request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    SendingRequest,
    Done,
    Cancelled,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::SendingRequest => "SENDING_REQUEST",
            RequestState::Done => "DONE",
            RequestState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Completed,
    Cancelled,
}

struct Inflight {
    phase: Phase,
    current: Option<AbortHandle>,
    attempt: String,
    uri: Option<Url>,
    retried: bool,
}

/// Shared record of the sub-request currently in flight for one logical request
pub(crate) struct InflightSlot {
    inner: Mutex<Inflight>,
}

impl InflightSlot {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inflight {
                phase: Phase::Running,
                current: None,
                attempt: String::new(),
                uri: None,
                retried: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inflight> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Publish a newly launched sub-request. If the request was already
    /// cancelled the sub-request is aborted and `false` is returned.
    pub(crate) fn install(
        &self,
        handle: AbortHandle,
        attempt: String,
        uri: Url,
        retried: bool,
    ) -> bool {
        let mut inflight = self.lock();
        if inflight.phase != Phase::Running {
            handle.abort();
            return false;
        }
        inflight.current = Some(handle);
        inflight.attempt = attempt;
        inflight.uri = Some(uri);
        inflight.retried = retried;
        true
    }

    /// Mark the logical request finished. Returns `false` if a cancel got
    /// there first.
    pub(crate) fn complete(&self) -> bool {
        let mut inflight = self.lock();
        if inflight.phase == Phase::Cancelled {
            return false;
        }
        inflight.phase = Phase::Completed;
        true
    }

    /// Cancel the logical request and abort the current sub-request.
    /// Returns `false` if the request had already completed or been cancelled.
    pub(crate) fn cancel(&self) -> bool {
        let mut inflight = self.lock();
        if inflight.phase != Phase::Running {
            return false;
        }
        inflight.phase = Phase::Cancelled;
        if let Some(handle) = inflight.current.as_ref() {
            handle.abort();
        }
        true
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.lock().phase == Phase::Cancelled
    }

    pub(crate) fn sub_state(&self) -> RequestState {
        let inflight = self.lock();
        Self::sub_state_of(&inflight)
    }

    fn sub_state_of(inflight: &Inflight) -> RequestState {
        match inflight.phase {
            Phase::Cancelled => RequestState::Cancelled,
            Phase::Completed => RequestState::Done,
            Phase::Running => match inflight.current.as_ref() {
                Some(handle) if handle.is_finished() => RequestState::Done,
                _ => RequestState::SendingRequest,
            },
        }
    }

    /// Human readable progress. Before any retry this names the attempt and
    /// target; once a retry happened only the sub-request state is shown.
    pub(crate) fn describe(&self) -> String {
        let inflight = self.lock();
        let state = Self::sub_state_of(&inflight);
        match (&inflight.uri, inflight.retried) {
            (Some(uri), false) => format!("{} to {uri}: {state}", inflight.attempt),
            _ => state.to_string(),
        }
    }
}

/// Future resolving to the handler's output for a balanced request.
///
/// Dropping the future detaches it; the request keeps running to completion
/// unless [`cancel`](Self::cancel) is called.
pub struct HttpResponseFuture<T, E> {
    driver: JoinHandle<Result<T, RequestError<E>>>,
    slot: Arc<InflightSlot>,
}

impl<T, E> HttpResponseFuture<T, E> {
    pub(crate) fn new(driver: JoinHandle<Result<T, RequestError<E>>>, slot: Arc<InflightSlot>) -> Self {
        Self { driver, slot }
    }

    /// Cancel the request, aborting the sub-request in flight.
    ///
    /// Returns `true` if this call cancelled it, `false` if it had already
    /// completed or been cancelled.
    pub fn cancel(&self) -> bool {
        if !self.slot.cancel() {
            return false;
        }
        self.driver.abort();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    pub fn is_done(&self) -> bool {
        self.driver.is_finished()
    }

    /// State of the current sub-request
    pub fn request_state(&self) -> RequestState {
        self.slot.sub_state()
    }

    /// Progress description, e.g. `attempt #1 of type=[storage] to http://a:8080/: SENDING_REQUEST`
    pub fn state(&self) -> String {
        self.slot.describe()
    }

    /// Wait for the result
    pub async fn checked_get(self) -> Result<T, RequestError<E>> {
        self.await
    }

    /// Wait for the result for at most `timeout`.
    ///
    /// On timeout the request keeps running; call [`cancel`](Self::cancel) to
    /// stop it.
    pub async fn checked_get_timeout(&mut self, timeout: Duration) -> Result<T, RequestError<E>> {
        match tokio::time::timeout(timeout, &mut *self).await {
            Ok(result) => result,
            Err(_) => Err(RequestError::TimedOut(timeout)),
        }
    }
}

impl<T, E> Future for HttpResponseFuture<T, E> {
    type Output = Result<T, RequestError<E>>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.driver).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) if e.is_cancelled() => Poll::Ready(Err(RequestError::Cancelled)),
            Poll::Ready(Err(e)) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl<T, E> fmt::Debug for HttpResponseFuture<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponseFuture")
            .field("state", &self.state())
            .finish()
    }
}
