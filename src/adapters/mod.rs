pub mod discovery_client;
pub mod http_client;
pub mod metrics_stats;

/// Re-export commonly used types from adapters
pub use discovery_client::{HttpDiscoveryLookupClient, ServiceDescriptorList};
pub use http_client::HttpClientAdapter;
pub use metrics_stats::{MetricsBalancerStats, TargetStats};
