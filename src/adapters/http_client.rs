use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use eyre::Result;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, Version, header};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

const USER_AGENT: &str = concat!("lodestar/", env!("CARGO_PKG_VERSION"));

/// HTTP transport using Hyper with Rustls (HTTP/1.1, ALPN may negotiate h2).
///
/// Sends one fully buffered request to one instance and buffers the response.
/// The whole exchange, body included, is bounded by the configured timeout.
/// It never retries; that is the balancing client's job.
#[derive(Clone)]
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, Full<Bytes>>,
    request_timeout: Duration,
}

impl HttpClientAdapter {
    /// Create a transport whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        // Install default crypto provider for rustls if not already set
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        for cert in native_certs.certs {
            if root_cert_store.add(cert).is_err() {
                tracing::warn!("Failed to add native certificate to rustls RootCertStore");
            }
        }
        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }
        tracing::debug!("Loaded {} native root certificates", root_cert_store.len());

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new()).build::<_, Full<Bytes>>(https_connector);

        Ok(Self {
            client,
            request_timeout,
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    fn add_common_headers(req: &mut Request<Full<Bytes>>) {
        let headers = req.headers_mut();
        if !headers.contains_key(header::USER_AGENT) {
            headers.insert(
                header::USER_AGENT,
                header::HeaderValue::from_static(USER_AGENT),
            );
        }
    }

    async fn exchange(&self, req: Request<Full<Bytes>>) -> HttpClientResult<Response<Bytes>> {
        let method = req.method().clone();
        let uri = req.uri().clone();

        let response = self.client.request(req).await.map_err(|e| {
            tracing::debug!("Request {} {} failed: {}", method, uri, e);
            HttpClientError::ConnectionError(format!("Request to {method} {uri} failed: {e}"))
        })?;

        let (parts, body) = response.into_parts();
        let body = body
            .collect()
            .await
            .map_err(|e| {
                HttpClientError::ConnectionError(format!(
                    "Reading response from {method} {uri} failed: {e}"
                ))
            })?
            .to_bytes();

        Ok(Response::from_parts(parts, body))
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(&self, req: Request<Bytes>) -> HttpClientResult<Response<Bytes>> {
        if req.uri().host().is_none() {
            return Err(HttpClientError::InvalidRequest(format!(
                "Outgoing URI has no host: {}",
                req.uri()
            )));
        }

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;
        let mut outgoing = Request::from_parts(parts, Full::new(body));
        Self::add_common_headers(&mut outgoing);

        tracing::debug!("Sending request: {} {}", outgoing.method(), outgoing.uri());

        match timeout(self.request_timeout, self.exchange(outgoing)).await {
            Ok(result) => {
                if let Ok(response) = &result {
                    tracing::debug!(status = response.status().as_u16(), "Received response");
                }
                result
            }
            Err(_) => Err(HttpClientError::Timeout(self.request_timeout.as_secs())),
        }
    }
}

impl std::fmt::Debug for HttpClientAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientAdapter")
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}
