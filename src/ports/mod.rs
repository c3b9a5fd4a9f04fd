pub mod balancer_stats;
pub mod discovery_client;
pub mod http_client;

pub use balancer_stats::{AttemptStatus, BalancerStats, NoopBalancerStats};
pub use discovery_client::{DiscoveryError, DiscoveryLookupClient, DiscoveryResult};
pub use http_client::{HttpClient, HttpClientError, HttpClientResult};
