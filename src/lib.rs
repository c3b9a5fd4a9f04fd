//! lodestar - client-side service discovery and load-balanced HTTP calls.
//!
//! lodestar keeps a live, weighted set of instance URIs per service type by
//! polling a discovery server, and sends HTTP requests through a balancing
//! client that picks an instance per request and fails over to untried
//! instances on retryable failures.
//!
//! # Pieces
//! - [`ServiceDescriptorsUpdater`] polls a [`DiscoveryLookupClient`] for one
//!   (type, pool) and pushes changed descriptor sets to a listener
//! - [`HttpServiceBalancerListenerAdapter`] turns descriptors into a weighted
//!   URI multiset for an [`HttpServiceBalancer`]
//! - [`HttpServiceBalancer`] holds the candidates and hands out per-request
//!   [`HttpServiceAttempt`] leases
//! - [`BalancingHttpClient`] drives retries across attempts and returns an
//!   [`HttpResponseFuture`] that can be awaited, polled for state, or cancelled
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use lodestar::{
//!     BalancingHttpClient, HttpClientAdapter, HttpDiscoveryLookupClient,
//!     HttpServiceBalancerFactory, Request, StringResponseHandler,
//!     config::{ServiceConfig, loader::load_config},
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = load_config("lodestar.toml").await?;
//! let discovery = config.discovery.clone().ok_or_else(|| eyre::eyre!("no discovery"))?;
//! let lookup = HttpDiscoveryLookupClient::new(
//!     discovery.uri.parse()?,
//!     discovery.environment.clone(),
//!     discovery.request_timeout,
//! )?;
//!
//! let factory = HttpServiceBalancerFactory::from_config(Arc::new(lookup), &discovery);
//! let balancer = factory
//!     .create_http_service_balancer("storage", &ServiceConfig::default())
//!     .await;
//!
//! let transport = Arc::new(HttpClientAdapter::new(config.http_client.request_timeout)?);
//! let client = BalancingHttpClient::new(balancer, transport, &config.http_client);
//! let body = client
//!     .execute(Request::get("v1/status"), StringResponseHandler)
//!     .await?;
//! println!("{body}");
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! and keeps selection, retry and polling logic inside `core`.
//!
//! # Error Handling
//! Library APIs return domain error types ([`BalancerError`],
//! [`DiscoveryError`], [`HttpClientError`], [`RequestError`]); the binary and
//! the config loader use `eyre::Result` with context attached.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HttpClientAdapter, HttpDiscoveryLookupClient, MetricsBalancerStats},
    core::{
        BalancerError, BalancingHttpClient, CandidateSet, HttpResponseFuture,
        HttpServiceAttempt, HttpServiceBalancer, HttpServiceBalancerFactory,
        HttpServiceBalancerListenerAdapter, JsonResponseHandler, Request, RequestError,
        RequestState, ResponseHandler, ServiceDescriptor, ServiceDescriptors,
        ServiceDescriptorsListener, ServiceDescriptorsUpdater, StaticHttpServiceBalancerFactory,
        StatusResponseHandler, StringResponseHandler,
    },
    ports::{
        BalancerStats, DiscoveryError, DiscoveryLookupClient, HttpClient, HttpClientError,
    },
};
