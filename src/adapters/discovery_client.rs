use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    core::descriptor::{ServiceDescriptor, ServiceDescriptors},
    ports::discovery_client::{DiscoveryError, DiscoveryLookupClient, DiscoveryResult},
};

/// Wire format of `GET /v1/service/{type}/{pool}`
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ServiceDescriptorList {
    pub environment: String,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
}

/// Discovery lookup over HTTP using reqwest.
///
/// The server's `ETag` becomes the snapshot version and `Cache-Control:
/// max-age` its max age. Refreshes send `If-None-Match` so an unchanged list
/// costs a `304`.
#[derive(Debug, Clone)]
pub struct HttpDiscoveryLookupClient {
    base_uri: Url,
    environment: String,
    client: Client,
}

impl HttpDiscoveryLookupClient {
    /// Create a client for the discovery server at `base_uri` serving `environment`
    pub fn new(
        base_uri: Url,
        environment: impl Into<String>,
        request_timeout: Duration,
    ) -> DiscoveryResult<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("lodestar/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DiscoveryError::Connection(format!("Cannot build HTTP client: {e}")))?;

        Ok(Self::with_client(base_uri, environment, client))
    }

    /// Use an already configured reqwest client
    pub fn with_client(base_uri: Url, environment: impl Into<String>, client: Client) -> Self {
        Self {
            base_uri,
            environment: environment.into(),
            client,
        }
    }

    pub fn base_uri(&self) -> &Url {
        &self.base_uri
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    fn lookup_url(&self, service_type: &str, pool: &str) -> DiscoveryResult<Url> {
        let mut url = self.base_uri.clone();
        url.path_segments_mut()
            .map_err(|_| {
                DiscoveryError::Connection(format!(
                    "Discovery URI {} cannot be a base",
                    self.base_uri
                ))
            })?
            .pop_if_empty()
            .extend(["v1", "service", service_type, pool]);
        Ok(url)
    }

    async fn lookup(
        &self,
        service_type: &str,
        pool: &str,
        previous: Option<&ServiceDescriptors>,
    ) -> DiscoveryResult<ServiceDescriptors> {
        let url = self.lookup_url(service_type, pool)?;

        let mut request = self
            .client
            .get(url.clone())
            .header(header::ACCEPT, "application/json");
        if let Some(version) = previous.and_then(|p| p.version()) {
            request = request.header(header::IF_NONE_MATCH, version);
        }

        let response = request
            .send()
            .await
            .map_err(|e| DiscoveryError::Connection(format!("Lookup of {service_type} failed: {e}")))?;

        let status = response.status();
        if let (StatusCode::NOT_MODIFIED, Some(previous)) = (status, previous) {
            tracing::trace!(%url, "Service list not modified");
            return Ok(previous
                .clone()
                .with_max_age(max_age(response.headers())));
        }
        if status != StatusCode::OK {
            return Err(DiscoveryError::Status {
                url: url.to_string(),
                status,
            });
        }

        let version = response
            .headers()
            .get(header::ETAG)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let max_age = max_age(response.headers());

        let list: ServiceDescriptorList = response
            .json()
            .await
            .map_err(|e| DiscoveryError::Decode(format!("{url}: {e}")))?;

        if list.environment != self.environment {
            return Err(DiscoveryError::EnvironmentMismatch {
                expected: self.environment.clone(),
                actual: list.environment,
            });
        }

        Ok(ServiceDescriptors::new(service_type, pool, list.services)
            .with_version(version)
            .with_max_age(max_age))
    }
}

/// `max-age` directive of a `Cache-Control` header, if any
fn max_age(headers: &header::HeaderMap) -> Option<Duration> {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .find_map(|directive| {
            let (name, seconds) = directive.trim().split_once('=')?;
            if !name.trim().eq_ignore_ascii_case("max-age") {
                return None;
            }
            seconds.trim().trim_matches('"').parse::<u64>().ok()
        })
        .map(Duration::from_secs)
}

#[async_trait]
impl DiscoveryLookupClient for HttpDiscoveryLookupClient {
    async fn get_services(
        &self,
        service_type: &str,
        pool: &str,
    ) -> DiscoveryResult<ServiceDescriptors> {
        self.lookup(service_type, pool, None).await
    }

    async fn refresh_services(
        &self,
        previous: &ServiceDescriptors,
    ) -> DiscoveryResult<ServiceDescriptors> {
        self.lookup(previous.service_type(), previous.pool(), Some(previous))
            .await
    }
}

#[cfg(test)]
mod tests {
    use header::{HeaderMap, HeaderValue};

    use super::*;

    fn client(base: &str) -> HttpDiscoveryLookupClient {
        HttpDiscoveryLookupClient::new(Url::parse(base).unwrap(), "test", Duration::from_secs(1))
            .unwrap()
    }

    #[test]
    fn test_lookup_url() {
        assert_eq!(
            client("http://disc:4111")
                .lookup_url("storage", "general")
                .unwrap()
                .as_str(),
            "http://disc:4111/v1/service/storage/general"
        );
        assert_eq!(
            client("http://disc:4111/prefix/")
                .lookup_url("storage", "general")
                .unwrap()
                .as_str(),
            "http://disc:4111/prefix/v1/service/storage/general"
        );
    }

    #[test]
    fn test_max_age_parsing() {
        let mut headers = HeaderMap::new();
        assert_eq!(max_age(&headers), None);

        headers.insert(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-transform, max-age=30"),
        );
        assert_eq!(max_age(&headers), Some(Duration::from_secs(30)));

        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=soon"));
        assert_eq!(max_age(&headers), None);
    }
}
