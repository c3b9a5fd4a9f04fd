//! Configuration data structures for lodestar.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files and
//! carry defaults so a minimal config only names the discovery server and the
//! services it uses. Durations are written as humantime strings (`"10s"`,
//! `"250ms"`).
use std::{collections::BTreeMap, time::Duration};

use serde::{Deserialize, Serialize};

use crate::core::descriptor::DEFAULT_POOL;

/// Serde adapter for humantime duration strings
pub mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(D::Error::custom)
    }
}

fn default_pool() -> String {
    DEFAULT_POOL.to_string()
}

/// Top-level client configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ClientConfig {
    /// Discovery server settings; required when any service is discovered
    #[serde(default)]
    pub discovery: Option<DiscoveryConfig>,

    /// Retry and transport settings shared by every balancing client
    #[serde(default)]
    pub http_client: BalancingClientConfig,

    /// Per service type settings, keyed by service type
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl ClientConfig {
    /// Pool a service type is looked up in
    pub fn pool_for(&self, service_type: &str) -> String {
        self.services
            .get(service_type)
            .and_then(|service| service.pool.clone())
            .or_else(|| self.discovery.as_ref().map(|d| d.pool.clone()))
            .unwrap_or_else(default_pool)
    }
}

/// Where and how often to query the discovery server
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DiscoveryConfig {
    /// Base URI of the discovery server
    pub uri: String,

    /// Environment the discovery server must report
    pub environment: String,

    /// Pool used for services that do not name one
    #[serde(default = "default_pool")]
    pub pool: String,

    /// Fixed refresh cadence, also used after a failed poll
    #[serde(default = "DiscoveryConfig::default_poll_interval", with = "duration_str")]
    pub poll_interval: Duration,

    /// How long `start()` waits for the first poll
    #[serde(default = "DiscoveryConfig::default_initial_wait", with = "duration_str")]
    pub initial_wait: Duration,

    /// Timeout for a single discovery request
    #[serde(default = "DiscoveryConfig::default_request_timeout", with = "duration_str")]
    pub request_timeout: Duration,
}

impl DiscoveryConfig {
    fn default_poll_interval() -> Duration {
        Duration::from_secs(10)
    }

    fn default_initial_wait() -> Duration {
        Duration::from_secs(1)
    }

    fn default_request_timeout() -> Duration {
        Duration::from_secs(5)
    }

    pub fn new(uri: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            environment: environment.into(),
            pool: default_pool(),
            poll_interval: Self::default_poll_interval(),
            initial_wait: Self::default_initial_wait(),
            request_timeout: Self::default_request_timeout(),
        }
    }
}

/// Retry budget, backoff bounds and transport timeout for balanced requests
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BalancingClientConfig {
    /// Extra attempts after the first one
    pub max_retries: u32,

    #[serde(with = "duration_str")]
    pub min_backoff: Duration,

    #[serde(with = "duration_str")]
    pub max_backoff: Duration,

    /// Timeout for one sub-request, enforced by the transport
    #[serde(with = "duration_str")]
    pub request_timeout: Duration,
}

impl Default for BalancingClientConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            min_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings for one service type
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Pool to look the service up in; falls back to `discovery.pool`
    #[serde(default)]
    pub pool: Option<String>,

    /// Fixed instance URIs; when set the service is not discovered
    #[serde(default)]
    pub uris: Option<Vec<String>>,
}

impl ServiceConfig {
    pub fn is_static(&self) -> bool {
        self.uris.is_some()
    }
}
