use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use url::Url;

use crate::{
    config::{DiscoveryConfig, ServiceConfig},
    core::{
        balancer::HttpServiceBalancer,
        listener::HttpServiceBalancerListenerAdapter,
        updater::{DEFAULT_POLL_INTERVAL, ServiceDescriptorsUpdater},
    },
    ports::{
        balancer_stats::{BalancerStats, NoopBalancerStats},
        discovery_client::DiscoveryLookupClient,
    },
};

/// Builds the stats sink for a service type
pub type StatsFactory = Arc<dyn Fn(&str) -> Arc<dyn BalancerStats> + Send + Sync>;

fn noop_stats() -> StatsFactory {
    Arc::new(|_: &str| Arc::new(NoopBalancerStats) as Arc<dyn BalancerStats>)
}

/// Creates balancers kept up to date from discovery.
///
/// Every balancer gets its own [`ServiceDescriptorsUpdater`]; the updaters
/// live as long as the factory and stop when it is dropped or
/// [`stop`](Self::stop) is called.
pub struct HttpServiceBalancerFactory {
    discovery_client: Arc<dyn DiscoveryLookupClient>,
    default_pool: String,
    poll_interval: Duration,
    initial_wait: Duration,
    stats_factory: StatsFactory,
    updaters: Mutex<Vec<Arc<ServiceDescriptorsUpdater>>>,
}

impl HttpServiceBalancerFactory {
    pub fn new(discovery_client: Arc<dyn DiscoveryLookupClient>, default_pool: impl Into<String>) -> Self {
        Self {
            discovery_client,
            default_pool: default_pool.into(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_wait: Duration::from_secs(1),
            stats_factory: noop_stats(),
            updaters: Mutex::new(Vec::new()),
        }
    }

    /// Factory using the pool and timings of a discovery config section
    pub fn from_config(discovery_client: Arc<dyn DiscoveryLookupClient>, config: &DiscoveryConfig) -> Self {
        Self::new(discovery_client, config.pool.clone())
            .with_poll_interval(config.poll_interval)
            .with_initial_wait(config.initial_wait)
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    /// Attach a stats sink to every balancer this factory creates
    pub fn with_stats_factory(mut self, stats_factory: StatsFactory) -> Self {
        self.stats_factory = stats_factory;
        self
    }

    /// Create a balancer for `service_type` fed by discovery, and start its
    /// updater. Returns once the first poll finished or the initial wait ran
    /// out; the balancer may still be empty.
    pub async fn create_http_service_balancer(
        &self,
        service_type: &str,
        selector: &ServiceConfig,
    ) -> Arc<HttpServiceBalancer> {
        let stats = (self.stats_factory)(service_type);
        self.create_http_service_balancer_with_stats(service_type, selector, stats)
            .await
    }

    /// Same as [`Self::create_http_service_balancer`] with an explicit stats sink
    pub async fn create_http_service_balancer_with_stats(
        &self,
        service_type: &str,
        selector: &ServiceConfig,
        stats: Arc<dyn BalancerStats>,
    ) -> Arc<HttpServiceBalancer> {
        let pool = selector
            .pool
            .clone()
            .unwrap_or_else(|| self.default_pool.clone());

        let balancer = Arc::new(HttpServiceBalancer::new(
            format!("type=[{service_type}], pool=[{pool}]"),
            stats,
        ));
        let listener = Arc::new(HttpServiceBalancerListenerAdapter::new(Arc::clone(&balancer)));
        let updater = Arc::new(
            ServiceDescriptorsUpdater::new(
                listener,
                service_type,
                pool,
                Arc::clone(&self.discovery_client),
            )
            .with_poll_interval(self.poll_interval)
            .with_initial_wait(self.initial_wait),
        );

        match self.updaters.lock() {
            Ok(mut updaters) => updaters.push(Arc::clone(&updater)),
            Err(_) => tracing::error!("Failed to acquire lock for balancer updaters"),
        }
        updater.start().await;

        balancer
    }

    /// Stop every updater started by this factory
    pub fn stop(&self) {
        if let Ok(updaters) = self.updaters.lock() {
            for updater in updaters.iter() {
                updater.stop();
            }
        }
    }
}

/// Creates balancers over a fixed URI multiset, with no discovery
pub struct StaticHttpServiceBalancerFactory {
    stats_factory: StatsFactory,
}

impl StaticHttpServiceBalancerFactory {
    pub fn new() -> Self {
        Self {
            stats_factory: noop_stats(),
        }
    }

    pub fn with_stats_factory(mut self, stats_factory: StatsFactory) -> Self {
        self.stats_factory = stats_factory;
        self
    }

    pub fn create_http_service_balancer(
        &self,
        service_type: &str,
        uris: impl IntoIterator<Item = Url>,
    ) -> Arc<HttpServiceBalancer> {
        let balancer = Arc::new(HttpServiceBalancer::new(
            format!("type=[{service_type}]"),
            (self.stats_factory)(service_type),
        ));
        balancer.update_http_uris(uris);
        balancer
    }
}

impl Default for StaticHttpServiceBalancerFactory {
    fn default() -> Self {
        Self::new()
    }
}
