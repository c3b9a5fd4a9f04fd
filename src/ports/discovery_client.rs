use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

use crate::core::descriptor::ServiceDescriptors;

/// Errors reported by a discovery lookup
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DiscoveryError {
    /// The discovery server could not be reached
    #[error("Cannot connect to discovery server: {0}")]
    Connection(String),

    /// The discovery server answered with an unexpected status
    #[error("Discovery server returned status {status} for {url}")]
    Status {
        /// The lookup URL
        url: String,
        /// The status code returned
        status: StatusCode,
    },

    /// The response body could not be decoded
    #[error("Invalid discovery response: {0}")]
    Decode(String),

    /// The discovery server serves a different environment than expected
    #[error("Expected environment to be {expected}, but was {actual}")]
    EnvironmentMismatch {
        /// Environment this client was configured for
        expected: String,
        /// Environment reported by the server
        actual: String,
    },
}

/// Result type for discovery lookups
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Port for querying a discovery server for the instances of one (type, pool).
#[async_trait]
pub trait DiscoveryLookupClient: Send + Sync + 'static {
    /// Fetch the current snapshot of descriptors for a service type and pool
    async fn get_services(&self, service_type: &str, pool: &str)
    -> DiscoveryResult<ServiceDescriptors>;

    /// Refresh a previously fetched snapshot.
    ///
    /// Implementations may use the snapshot's version to avoid re-sending an
    /// unchanged list; the default simply re-fetches.
    async fn refresh_services(
        &self,
        previous: &ServiceDescriptors,
    ) -> DiscoveryResult<ServiceDescriptors> {
        self.get_services(previous.service_type(), previous.pool())
            .await
    }
}
