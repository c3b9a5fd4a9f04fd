//! Periodic discovery poller.
//!
//! [`ServiceDescriptorsUpdater`] asks a [`DiscoveryLookupClient`] for the
//! instances of one `(type, pool)` on a fixed cadence and forwards changed
//! results to a [`ServiceDescriptorsListener`]. Lookup failures are logged and
//! absorbed; polling never stops because of them.
use std::{
    collections::BTreeSet,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::{sync::oneshot, task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::{
    core::{
        descriptor::{ServiceDescriptor, ServiceDescriptors},
        listener::ServiceDescriptorsListener,
    },
    metrics,
    ports::discovery_client::DiscoveryLookupClient,
    tracing_setup,
};

/// Default refresh cadence when the discovery server gives no max age
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Keeps a listener's view of one (type, pool) fresh
pub struct ServiceDescriptorsUpdater {
    target: Arc<dyn ServiceDescriptorsListener>,
    service_type: String,
    pool: String,
    discovery_client: Arc<dyn DiscoveryLookupClient>,
    poll_interval: Duration,
    initial_wait: Duration,
    started: AtomicBool,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ServiceDescriptorsUpdater {
    pub fn new(
        target: Arc<dyn ServiceDescriptorsListener>,
        service_type: impl Into<String>,
        pool: impl Into<String>,
        discovery_client: Arc<dyn DiscoveryLookupClient>,
    ) -> Self {
        Self {
            target,
            service_type: service_type.into(),
            pool: pool.into(),
            discovery_client,
            poll_interval: DEFAULT_POLL_INTERVAL,
            initial_wait: Duration::from_secs(1),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Fixed delay between polls when the server gives no max age, and after failures
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// How long [`Self::start`] waits for the first poll to finish
    pub fn with_initial_wait(mut self, initial_wait: Duration) -> Self {
        self.initial_wait = initial_wait;
        self
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    pub fn pool(&self) -> &str {
        &self.pool
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Start polling. Only the first call starts a loop; later or concurrent
    /// calls return immediately.
    ///
    /// Waits up to the configured initial wait for the first poll so a fresh
    /// balancer is usually populated on return. Never fails: discovery errors
    /// are handled inside the loop.
    pub async fn start(&self) {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(
                service_type = %self.service_type,
                pool = %self.pool,
                "Updater already started"
            );
            return;
        }

        let (first_poll_tx, first_poll_rx) = oneshot::channel();
        let poller = Poller::new(self);
        let span = tracing_setup::create_updater_span(&self.service_type, &self.pool);
        let handle = tokio::spawn(poller.run(first_poll_tx).instrument(span));

        match self.task.lock() {
            Ok(mut task) => *task = Some(handle),
            Err(_) => tracing::error!("Failed to acquire lock for updater task handle"),
        }

        if timeout(self.initial_wait, first_poll_rx).await.is_err() {
            tracing::info!(
                service_type = %self.service_type,
                pool = %self.pool,
                "Initial discovery poll still pending after {:?}",
                self.initial_wait
            );
        }
    }

    /// Stop polling; the current poll, if any, is abandoned
    pub fn stop(&self) {
        self.shutdown.cancel();
        if let Ok(mut task) = self.task.lock() {
            if let Some(handle) = task.take() {
                handle.abort();
            }
        }
    }
}

impl Drop for ServiceDescriptorsUpdater {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Polling loop state, owned by the spawned task.
///
/// Holds its own handles rather than the updater so dropping the updater
/// cancels the loop.
struct Poller {
    target: Arc<dyn ServiceDescriptorsListener>,
    discovery_client: Arc<dyn DiscoveryLookupClient>,
    service_type: String,
    pool: String,
    poll_interval: Duration,
    shutdown: CancellationToken,
    latest: Option<ServiceDescriptors>,
    applied: Option<BTreeSet<ServiceDescriptor>>,
    failing: bool,
}

impl Poller {
    fn new(updater: &ServiceDescriptorsUpdater) -> Self {
        Self {
            target: Arc::clone(&updater.target),
            discovery_client: Arc::clone(&updater.discovery_client),
            service_type: updater.service_type.clone(),
            pool: updater.pool.clone(),
            poll_interval: updater.poll_interval,
            shutdown: updater.shutdown.clone(),
            latest: None,
            applied: None,
            failing: false,
        }
    }

    async fn run(mut self, first_poll: oneshot::Sender<()>) {
        let shutdown = self.shutdown.clone();

        let mut delay = self.poll_once().await;
        let _ = first_poll.send(());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::debug!("Discovery updater stopped");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
            delay = self.poll_once().await;
        }
    }

    /// One poll cycle; returns the delay before the next one
    async fn poll_once(&mut self) -> Duration {
        let result = match &self.latest {
            None => {
                self.discovery_client
                    .get_services(&self.service_type, &self.pool)
                    .await
            }
            Some(previous) => self.discovery_client.refresh_services(previous).await,
        };

        match result {
            Ok(descriptors) => {
                metrics::increment_discovery_refresh(&self.service_type, &self.pool, true);
                if self.failing {
                    self.failing = false;
                    tracing::info!("Discovery server connect succeeded for refresh");
                }

                // max-age=0 means "do not cache", not "poll again immediately"
                let delay = descriptors
                    .max_age()
                    .filter(|max_age| !max_age.is_zero())
                    .unwrap_or(self.poll_interval);
                self.apply(&descriptors);
                self.latest = Some(descriptors);
                delay
            }
            Err(e) => {
                metrics::increment_discovery_refresh(&self.service_type, &self.pool, false);
                if self.failing {
                    tracing::debug!("Discovery refresh still failing: {}", e);
                } else {
                    self.failing = true;
                    tracing::warn!("Cannot connect to discovery server for refresh: {}", e);
                }
                self.poll_interval
            }
        }
    }

    fn apply(&mut self, descriptors: &ServiceDescriptors) {
        let current: BTreeSet<ServiceDescriptor> =
            descriptors.descriptors().iter().cloned().collect();

        match &self.applied {
            Some(previous) if *previous == current => {
                tracing::trace!("Service descriptors unchanged");
                return;
            }
            Some(previous) if current.is_empty() => {
                tracing::warn!(
                    retained = previous.len(),
                    "Discovery returned no instances; keeping previous descriptors"
                );
                return;
            }
            _ => {}
        }

        tracing::info!(
            instances = current.len(),
            version = descriptors.version().unwrap_or("-"),
            "Applying updated service descriptors"
        );
        self.target
            .update_service_descriptors(descriptors.descriptors());
        self.applied = Some(current);
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::atomic::AtomicUsize};

    use async_trait::async_trait;

    use super::*;
    use crate::ports::discovery_client::{DiscoveryError, DiscoveryResult};

    #[derive(Default)]
    struct RecordingListener {
        updates: Mutex<Vec<usize>>,
    }

    impl ServiceDescriptorsListener for RecordingListener {
        fn update_service_descriptors(&self, descriptors: &[ServiceDescriptor]) {
            self.updates.lock().unwrap().push(descriptors.len());
        }
    }

    /// Serves scripted responses; repeats the last one when the script runs out
    struct ScriptedDiscovery {
        script: Mutex<VecDeque<DiscoveryResult<Vec<ServiceDescriptor>>>>,
        calls: AtomicUsize,
    }

    impl ScriptedDiscovery {
        fn new(script: Vec<DiscoveryResult<Vec<ServiceDescriptor>>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DiscoveryLookupClient for ScriptedDiscovery {
        async fn get_services(
            &self,
            service_type: &str,
            pool: &str,
        ) -> DiscoveryResult<ServiceDescriptors> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().map(|r| match r {
                    Ok(d) => Ok(d.clone()),
                    Err(e) => Err(DiscoveryError::Connection(e.to_string())),
                })
            };
            match next {
                Some(Ok(descriptors)) => Ok(ServiceDescriptors::new(service_type, pool, descriptors)),
                Some(Err(e)) => Err(e),
                None => Err(DiscoveryError::Connection("script exhausted".to_string())),
            }
        }
    }

    fn instance(host: &str) -> ServiceDescriptor {
        ServiceDescriptor::builder("storage")
            .property("http", format!("http://{host}:8080"))
            .build()
    }

    fn poller(
        listener: Arc<RecordingListener>,
        discovery: Arc<ScriptedDiscovery>,
    ) -> Poller {
        let updater = ServiceDescriptorsUpdater::new(listener, "storage", "general", discovery)
            .with_poll_interval(Duration::from_secs(10));
        Poller::new(&updater)
    }

    #[tokio::test]
    async fn test_first_poll_applies_even_when_empty() {
        let listener = Arc::new(RecordingListener::default());
        let discovery = Arc::new(ScriptedDiscovery::new(vec![Ok(vec![])]));
        let mut poller = poller(listener.clone(), discovery);

        let delay = poller.poll_once().await;
        assert_eq!(delay, Duration::from_secs(10));
        assert_eq!(*listener.updates.lock().unwrap(), vec![0]);
    }

    #[tokio::test]
    async fn test_unchanged_and_empty_results_are_skipped() {
        let a = instance("a");
        let b = instance("b");
        let listener = Arc::new(RecordingListener::default());
        let discovery = Arc::new(ScriptedDiscovery::new(vec![
            Ok(vec![a.clone()]),
            Ok(vec![a.clone()]),
            Ok(vec![]),
            Ok(vec![a.clone(), b.clone()]),
        ]));
        let mut poller = poller(listener.clone(), discovery);

        for _ in 0..4 {
            poller.poll_once().await;
        }
        assert_eq!(*listener.updates.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_failure_keeps_state_and_uses_fixed_interval() {
        let a = instance("a");
        let listener = Arc::new(RecordingListener::default());
        let discovery = Arc::new(ScriptedDiscovery::new(vec![
            Ok(vec![a.clone()]),
            Err(DiscoveryError::Connection("refused".to_string())),
            Err(DiscoveryError::Connection("refused".to_string())),
            Ok(vec![a]),
        ]));
        let mut poller = poller(listener.clone(), discovery);

        poller.poll_once().await;
        assert_eq!(poller.poll_once().await, Duration::from_secs(10));
        assert!(poller.failing);
        assert_eq!(poller.poll_once().await, Duration::from_secs(10));
        poller.poll_once().await;
        assert!(!poller.failing);

        // Recovery with the same instance does not re-notify
        assert_eq!(*listener.updates.lock().unwrap(), vec![1]);
    }

    struct MaxAgeDiscovery(Duration);

    #[async_trait]
    impl DiscoveryLookupClient for MaxAgeDiscovery {
        async fn get_services(
            &self,
            service_type: &str,
            pool: &str,
        ) -> DiscoveryResult<ServiceDescriptors> {
            Ok(ServiceDescriptors::new(service_type, pool, vec![]).with_max_age(Some(self.0)))
        }
    }

    fn max_age_poller(max_age: Duration) -> Poller {
        let updater = ServiceDescriptorsUpdater::new(
            Arc::new(RecordingListener::default()),
            "storage",
            "general",
            Arc::new(MaxAgeDiscovery(max_age)),
        )
        .with_poll_interval(Duration::from_secs(10));
        Poller::new(&updater)
    }

    #[tokio::test]
    async fn test_max_age_drives_next_delay() {
        let mut poller = max_age_poller(Duration::from_secs(3));
        assert_eq!(poller.poll_once().await, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_zero_max_age_uses_poll_interval() {
        let mut poller = max_age_poller(Duration::ZERO);
        assert_eq!(poller.poll_once().await, Duration::from_secs(10));
        assert_eq!(poller.poll_once().await, Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_max_age_does_not_spin() {
        struct CountingDiscovery(AtomicUsize);

        #[async_trait]
        impl DiscoveryLookupClient for CountingDiscovery {
            async fn get_services(
                &self,
                service_type: &str,
                pool: &str,
            ) -> DiscoveryResult<ServiceDescriptors> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(ServiceDescriptors::new(service_type, pool, vec![])
                    .with_max_age(Some(Duration::ZERO)))
            }
        }

        let discovery = Arc::new(CountingDiscovery(AtomicUsize::new(0)));
        let updater = ServiceDescriptorsUpdater::new(
            Arc::new(RecordingListener::default()),
            "storage",
            "general",
            discovery.clone(),
        )
        .with_poll_interval(Duration::from_secs(10));

        updater.start().await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(discovery.0.load(Ordering::SeqCst), 3);
        updater.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent_and_keeps_polling() {
        let listener = Arc::new(RecordingListener::default());
        let discovery = Arc::new(ScriptedDiscovery::new(vec![
            Err(DiscoveryError::Connection("refused".to_string())),
            Ok(vec![instance("a")]),
        ]));
        let updater = Arc::new(
            ServiceDescriptorsUpdater::new(listener.clone(), "storage", "general", discovery.clone())
                .with_poll_interval(Duration::from_secs(10)),
        );

        tokio::join!(updater.start(), updater.start());
        assert!(updater.is_started());
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 1);
        assert!(listener.updates.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
        assert_eq!(*listener.updates.lock().unwrap(), vec![1]);

        updater.stop();
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(discovery.calls.load(Ordering::SeqCst), 2);
    }
}
