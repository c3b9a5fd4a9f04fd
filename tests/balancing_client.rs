use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use http::{Response, StatusCode};
use lodestar::{
    BalancerError, BalancingHttpClient, HttpClient, HttpClientError, HttpServiceBalancer,
    Request, RequestError, StatusResponseHandler,
    config::BalancingClientConfig,
    core::{RequestState, ResponseHandlerError},
    ports::{AttemptStatus, BalancerStats, HttpClientResult},
};
use tokio::sync::{Notify, oneshot};
use url::Url;

#[derive(Clone)]
enum Reply {
    Status(u16),
    StatusNoRetry(u16),
    Fail(HttpClientError),
    Hang,
}

/// In-memory transport answering per host, optionally overridden by a script
/// consumed one reply per call.
#[derive(Default)]
struct ScriptedTransport {
    per_host: HashMap<String, Reply>,
    script: Mutex<Vec<Reply>>,
    calls: Mutex<Vec<String>>,
    called: Notify,
    hang_dropped: Mutex<Option<oneshot::Sender<()>>>,
}

impl ScriptedTransport {
    fn with_hosts(replies: &[(&str, Reply)]) -> Self {
        Self {
            per_host: replies
                .iter()
                .map(|(host, reply)| (host.to_string(), reply.clone()))
                .collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn wait_for_calls(&self, count: usize) {
        loop {
            let notified = self.called.notified();
            if self.calls.lock().unwrap().len() >= count {
                return;
            }
            notified.await;
        }
    }
}

struct DropSignal(Option<oneshot::Sender<()>>);

impl Drop for DropSignal {
    fn drop(&mut self) {
        if let Some(tx) = self.0.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl HttpClient for ScriptedTransport {
    async fn send_request(&self, req: http::Request<Bytes>) -> HttpClientResult<Response<Bytes>> {
        let uri = req.uri().to_string();
        let host = req.uri().host().unwrap_or_default().to_string();

        let reply = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                self.per_host
                    .get(&host)
                    .cloned()
                    .unwrap_or(Reply::Status(200))
            } else {
                script.remove(0)
            }
        };
        self.calls.lock().unwrap().push(uri);
        self.called.notify_waiters();

        match reply {
            Reply::Status(status) => Ok(Response::builder()
                .status(status)
                .body(Bytes::from(host))
                .unwrap()),
            Reply::StatusNoRetry(status) => Ok(Response::builder()
                .status(status)
                .header("X-Retry", "no")
                .body(Bytes::new())
                .unwrap()),
            Reply::Fail(e) => Err(e),
            Reply::Hang => {
                let _guard = DropSignal(self.hang_dropped.lock().unwrap().take());
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }
}

#[derive(Default)]
struct RecordingStats {
    events: Mutex<Vec<(String, AttemptStatus)>>,
    failures: Mutex<Vec<(String, String)>>,
}

impl RecordingStats {
    fn count(&self, status: AttemptStatus) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| *s == status)
            .count()
    }
}

impl BalancerStats for RecordingStats {
    fn request_time(&self, target: &Url, status: AttemptStatus, _elapsed: Duration) {
        self.events
            .lock()
            .unwrap()
            .push((target.to_string(), status));
    }

    fn failure(&self, target: &Url, category: &str) {
        self.failures
            .lock()
            .unwrap()
            .push((target.to_string(), category.to_string()));
    }
}

fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

fn config(max_retries: u32) -> BalancingClientConfig {
    BalancingClientConfig {
        max_retries,
        min_backoff: Duration::ZERO,
        max_backoff: Duration::ZERO,
        request_timeout: Duration::from_secs(1),
    }
}

fn setup(
    uris: &[&str],
    transport: ScriptedTransport,
    max_retries: u32,
) -> (BalancingHttpClient, Arc<ScriptedTransport>, Arc<RecordingStats>) {
    let stats = Arc::new(RecordingStats::default());
    let balancer = Arc::new(HttpServiceBalancer::new("type=[storage]", stats.clone()));
    balancer.update_http_uris(uris.iter().map(|uri| url(uri)));
    let transport = Arc::new(transport);
    let client = BalancingHttpClient::new(balancer, transport.clone(), &config(max_retries));
    (client, transport, stats)
}

#[tokio::test]
async fn failover_to_second_instance_reports_one_bad_one_good() {
    for _ in 0..20 {
        let transport = ScriptedTransport::default();
        transport
            .script
            .lock()
            .unwrap()
            .extend([Reply::Status(503), Reply::Status(200)]);
        let (client, transport, stats) = setup(&["http://a:1", "http://b:1"], transport, 1);

        let status = client
            .execute(Request::get("v1/items"), StatusResponseHandler)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);

        assert_eq!(stats.count(AttemptStatus::Failure), 1);
        assert_eq!(stats.count(AttemptStatus::Success), 1);
        assert_eq!(stats.failures.lock().unwrap()[0].1, "503 status code");

        let calls = transport.calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0], calls[1], "retry must go to the untried instance");
    }
}

#[tokio::test]
async fn connection_failure_on_a_fails_over_to_b() {
    let transport = ScriptedTransport::with_hosts(&[
        ("a", Reply::Fail(HttpClientError::ConnectionError("refused".into()))),
        ("b", Reply::Status(200)),
    ]);
    let (client, transport, stats) = setup(&["http://a:1", "http://b:1"], transport, 1);

    for _ in 0..20 {
        let status = client
            .execute(Request::get("v1/items"), StatusResponseHandler)
            .await
            .unwrap();
        assert_eq!(status, StatusCode::OK);
    }

    // Every request succeeds on b; a is only ever marked bad
    for (target, status) in stats.events.lock().unwrap().iter() {
        match status {
            AttemptStatus::Success => assert_eq!(target, "http://b:1/"),
            AttemptStatus::Failure => assert_eq!(target, "http://a:1/"),
        }
    }
    assert!(
        stats
            .failures
            .lock()
            .unwrap()
            .iter()
            .all(|(_, category)| category == "connection error")
    );
    assert!(transport.calls().iter().all(|uri| uri.ends_with("/v1/items")));
}

#[tokio::test]
async fn no_retry_budget_surfaces_first_failure() {
    let transport = ScriptedTransport::with_hosts(&[(
        "a",
        Reply::Fail(HttpClientError::ConnectionError("refused".into())),
    )]);
    let (client, transport, stats) = setup(&["http://a:1", "http://b:1"], transport, 0);
    transport
        .script
        .lock()
        .unwrap()
        .push(Reply::Fail(HttpClientError::Timeout(1)));

    let err = client
        .execute(Request::get("v1/items"), StatusResponseHandler)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RequestError::Handler(ResponseHandlerError::Transport(HttpClientError::Timeout(1)))
    ));
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(stats.count(AttemptStatus::Failure), 1);
    assert_eq!(stats.count(AttemptStatus::Success), 0);
}

#[tokio::test]
async fn exhausted_retries_hand_last_response_to_handler() {
    let transport = ScriptedTransport::with_hosts(&[
        ("a", Reply::Status(503)),
        ("b", Reply::Status(502)),
        ("c", Reply::Status(500)),
    ]);
    let (client, transport, stats) =
        setup(&["http://a:1", "http://b:1", "http://c:1"], transport, 2);

    let status = client
        .execute(Request::get("v1/items"), StatusResponseHandler)
        .await
        .unwrap();
    assert!(status.is_server_error());

    let mut hosts: Vec<String> = transport.calls();
    hosts.sort();
    hosts.dedup();
    assert_eq!(hosts.len(), 3, "each instance tried once before giving up");
    assert_eq!(stats.count(AttemptStatus::Failure), 3);
}

#[tokio::test]
async fn retry_header_no_suppresses_failover() {
    let transport = ScriptedTransport::with_hosts(&[
        ("a", Reply::StatusNoRetry(503)),
        ("b", Reply::StatusNoRetry(503)),
    ]);
    let (client, transport, stats) = setup(&["http://a:1", "http://b:1"], transport, 2);

    let status = client
        .execute(Request::get("v1/items"), StatusResponseHandler)
        .await
        .unwrap();
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(transport.calls().len(), 1);
    assert_eq!(stats.count(AttemptStatus::Success), 1);
}

#[tokio::test]
async fn non_retryable_failure_is_not_retried() {
    let transport = ScriptedTransport::default();
    transport
        .script
        .lock()
        .unwrap()
        .push(Reply::Fail(HttpClientError::InvalidRequest("bad header".into())));
    let (client, transport, _stats) = setup(&["http://a:1", "http://b:1"], transport, 2);

    let err = client
        .execute(Request::get("v1/items"), StatusResponseHandler)
        .await
        .unwrap_err();
    assert!(matches!(
        err.into_handler_error(),
        Some(ResponseHandlerError::Transport(HttpClientError::InvalidRequest(_)))
    ));
    assert_eq!(transport.calls().len(), 1);
}

#[tokio::test]
async fn leading_slash_fails_before_any_network_call() {
    let (client, transport, _stats) =
        setup(&["http://a:1"], ScriptedTransport::default(), 2);

    for uri in ["/v1/items", "http://a:1/v1/items", "//a:1/v1/items"] {
        let err = client
            .execute_async(Request::get(uri), StatusResponseHandler)
            .unwrap_err();
        assert!(matches!(err, BalancerError::InvalidRequestUri(_)), "{uri}");
    }
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn empty_balancer_fails_synchronously() {
    let (client, transport, _stats) = setup(&[], ScriptedTransport::default(), 2);

    let err = client
        .execute_async(Request::get("v1/items"), StatusResponseHandler)
        .unwrap_err();
    assert_eq!(
        err,
        BalancerError::NoServicesAvailable("type=[storage]".to_string())
    );
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn cancel_during_retry_aborts_live_sub_request() {
    let transport = ScriptedTransport::default();
    transport
        .script
        .lock()
        .unwrap()
        .extend([Reply::Status(503), Reply::Hang]);
    let (dropped_tx, dropped_rx) = oneshot::channel();
    *transport.hang_dropped.lock().unwrap() = Some(dropped_tx);
    let (client, transport, stats) = setup(&["http://a:1", "http://b:1"], transport, 1);

    let future = client
        .execute_async(Request::get("v1/items"), StatusResponseHandler)
        .unwrap();
    transport.wait_for_calls(2).await;

    // After a retry only the sub-request state is reported
    assert_eq!(future.state(), "SENDING_REQUEST");
    assert_eq!(future.request_state(), RequestState::SendingRequest);

    assert!(future.cancel());
    assert!(!future.cancel());
    assert!(future.is_cancelled());
    assert_eq!(future.state(), "CANCELLED");

    let err = future.await.unwrap_err();
    assert!(err.is_cancelled());

    // The hanging sub-request was dropped, not left running
    tokio::time::timeout(Duration::from_secs(1), dropped_rx)
        .await
        .expect("sub-request was not aborted")
        .unwrap();

    assert_eq!(transport.calls().len(), 2);
    assert_eq!(stats.count(AttemptStatus::Failure), 1);
    assert_eq!(stats.count(AttemptStatus::Success), 0);
}

#[tokio::test]
async fn state_names_first_attempt_before_any_retry() {
    let transport = ScriptedTransport::with_hosts(&[("a", Reply::Hang)]);
    let (client, transport, _stats) = setup(&["http://a:1"], transport, 1);

    let future = client
        .execute_async(Request::get("v1/items"), StatusResponseHandler)
        .unwrap();
    transport.wait_for_calls(1).await;

    // The slot is filled before the sub-request first runs
    let state = future.state();
    assert_eq!(state, "attempt #1 of type=[storage] to http://a:1/: SENDING_REQUEST");

    assert!(future.cancel());
}

#[tokio::test]
async fn checked_get_timeout_reports_timeout() {
    let transport = ScriptedTransport::with_hosts(&[("a", Reply::Hang)]);
    let (client, _transport, _stats) = setup(&["http://a:1"], transport, 0);

    let mut future = client
        .execute_async(Request::get("v1/items"), StatusResponseHandler)
        .unwrap();
    let err = future
        .checked_get_timeout(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(err, RequestError::TimedOut(_)));
    assert!(!future.is_done());
    assert!(future.cancel());
}
