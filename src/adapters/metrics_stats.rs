use std::{
    collections::{BTreeMap, HashMap},
    sync::Mutex,
    time::Duration,
};

use url::Url;

use crate::{
    metrics,
    ports::balancer_stats::{AttemptStatus, BalancerStats},
};

/// Per-target counters kept alongside the exported metrics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetStats {
    pub successes: u64,
    pub failures: u64,
    pub total_time: Duration,
    pub failure_categories: BTreeMap<String, u64>,
}

impl TargetStats {
    pub fn attempts(&self) -> u64 {
        self.successes + self.failures
    }
}

/// [`BalancerStats`] that feeds the `metrics` facade, labelled by service
/// type and target, and keeps a per-target snapshot for local reporting.
#[derive(Debug)]
pub struct MetricsBalancerStats {
    service_type: String,
    targets: Mutex<HashMap<Url, TargetStats>>,
}

impl MetricsBalancerStats {
    pub fn new(service_type: impl Into<String>) -> Self {
        Self {
            service_type: service_type.into(),
            targets: Mutex::new(HashMap::new()),
        }
    }

    pub fn service_type(&self) -> &str {
        &self.service_type
    }

    /// Copy of the per-target counters, ordered by target
    pub fn snapshot(&self) -> Vec<(Url, TargetStats)> {
        let mut snapshot: Vec<_> = match self.targets.lock() {
            Ok(targets) => targets
                .iter()
                .map(|(uri, stats)| (uri.clone(), stats.clone()))
                .collect(),
            Err(_) => {
                tracing::error!("Failed to acquire lock for balancer target stats");
                Vec::new()
            }
        };
        snapshot.sort_by(|(a, _), (b, _)| a.cmp(b));
        snapshot
    }

    fn update(&self, target: &Url, apply: impl FnOnce(&mut TargetStats)) {
        match self.targets.lock() {
            Ok(mut targets) => apply(targets.entry(target.clone()).or_default()),
            Err(_) => tracing::error!("Failed to acquire lock for balancer target stats"),
        }
    }
}

impl BalancerStats for MetricsBalancerStats {
    fn request_time(&self, target: &Url, status: AttemptStatus, elapsed: Duration) {
        metrics::increment_balancer_request(&self.service_type, target.as_str(), status.as_str());
        metrics::record_balancer_request_duration(
            &self.service_type,
            target.as_str(),
            status.as_str(),
            elapsed,
        );

        self.update(target, |stats| {
            match status {
                AttemptStatus::Success => stats.successes += 1,
                AttemptStatus::Failure => stats.failures += 1,
            }
            stats.total_time += elapsed;
        });
    }

    fn failure(&self, target: &Url, category: &str) {
        metrics::increment_balancer_failure(&self.service_type, target.as_str(), category);

        self.update(target, |stats| {
            *stats
                .failure_categories
                .entry(category.to_string())
                .or_default() += 1;
        });
    }

    fn candidates(&self, count: usize, targets: &[&Url]) {
        metrics::set_balancer_candidates(&self.service_type, count);

        match self.targets.lock() {
            Ok(mut stats) => stats.retain(|uri, _| targets.contains(&uri)),
            Err(_) => tracing::error!("Failed to acquire lock for balancer target stats"),
        }
    }
}
