//! Lightweight metrics helpers for lodestar.
//!
//! This module exposes a small set of convenience functions wrapping the
//! `metrics` crate macros. No exporter is embedded; the application installs
//! whichever recorder it likes and these calls feed it.
//!
//! Provided metrics (labels vary by family):
//! * `lodestar_balancer_requests_total` (counter: serviceType, targetUri, status)
//! * `lodestar_balancer_request_duration_seconds` (histogram: serviceType, targetUri, status)
//! * `lodestar_balancer_failures_total` (counter: serviceType, targetUri, failureCategory)
//! * `lodestar_balancer_candidates` (gauge: serviceType)
//! * `lodestar_discovery_refresh_total` (counter: serviceType, pool, outcome)
use std::{collections::HashMap, sync::Mutex, time::Duration};

use ::metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const LODESTAR_BALANCER_REQUESTS_TOTAL: &str = "lodestar_balancer_requests_total";
pub const LODESTAR_BALANCER_REQUEST_DURATION_SECONDS: &str =
    "lodestar_balancer_request_duration_seconds";
pub const LODESTAR_BALANCER_FAILURES_TOTAL: &str = "lodestar_balancer_failures_total";
pub const LODESTAR_BALANCER_CANDIDATES: &str = "lodestar_balancer_candidates";
pub const LODESTAR_DISCOVERY_REFRESH_TOTAL: &str = "lodestar_discovery_refresh_total";

/// Last reported candidate count per service type
pub static CANDIDATE_GAUGES: Lazy<Mutex<HashMap<String, f64>>> = Lazy::new(|| {
    describe_counter!(
        LODESTAR_BALANCER_REQUESTS_TOTAL,
        Unit::Count,
        "Finished balanced request attempts, by target and outcome."
    );
    describe_histogram!(
        LODESTAR_BALANCER_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of balanced request attempts, by target and outcome."
    );
    describe_counter!(
        LODESTAR_BALANCER_FAILURES_TOTAL,
        Unit::Count,
        "Failed balanced request attempts, by target and failure category."
    );
    describe_gauge!(
        LODESTAR_BALANCER_CANDIDATES,
        "Number of candidate entries (weight included) a balancer selects from."
    );
    describe_counter!(
        LODESTAR_DISCOVERY_REFRESH_TOTAL,
        Unit::Count,
        "Discovery lookups performed by updaters, by outcome."
    );

    Mutex::new(HashMap::new())
});

/// Count one finished attempt against a target
pub fn increment_balancer_request(service_type: &str, target: &str, status: &str) {
    counter!(
        LODESTAR_BALANCER_REQUESTS_TOTAL,
        "serviceType" => service_type.to_string(),
        "targetUri" => target.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record how long an attempt against a target took
pub fn record_balancer_request_duration(
    service_type: &str,
    target: &str,
    status: &str,
    duration: Duration,
) {
    histogram!(
        LODESTAR_BALANCER_REQUEST_DURATION_SECONDS,
        "serviceType" => service_type.to_string(),
        "targetUri" => target.to_string(),
        "status" => status.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Count a failed attempt under its failure category
pub fn increment_balancer_failure(service_type: &str, target: &str, category: &str) {
    counter!(
        LODESTAR_BALANCER_FAILURES_TOTAL,
        "serviceType" => service_type.to_string(),
        "targetUri" => target.to_string(),
        "failureCategory" => category.to_string()
    )
    .increment(1);
}

/// Set (and remember) the candidate count of a service's balancer
pub fn set_balancer_candidates(service_type: &str, count: usize) {
    let value = count as f64;

    if let Ok(mut gauges) = CANDIDATE_GAUGES.lock() {
        gauges.insert(service_type.to_string(), value);
    } else {
        tracing::error!("Failed to acquire lock for candidate gauges");
        return;
    }

    gauge!(LODESTAR_BALANCER_CANDIDATES, "serviceType" => service_type.to_string()).set(value);
}

/// Count one discovery lookup made by an updater
pub fn increment_discovery_refresh(service_type: &str, pool: &str, success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!(
        LODESTAR_DISCOVERY_REFRESH_TOTAL,
        "serviceType" => service_type.to_string(),
        "pool" => pool.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

/// Initialize metric descriptions (idempotent).
pub fn init_metrics() -> eyre::Result<()> {
    tracing::info!("Initializing lodestar metrics");

    Lazy::force(&CANDIDATE_GAUGES);

    tracing::info!("lodestar metrics initialized");
    Ok(())
}

/// Collect a snapshot of gauge values used for ad-hoc exports.
pub fn get_current_metrics() -> HashMap<String, f64> {
    let mut metrics = HashMap::new();

    if let Ok(gauges) = CANDIDATE_GAUGES.lock() {
        for (service_type, count) in gauges.iter() {
            metrics.insert(format!("candidates_{service_type}"), *count);
        }
    }

    metrics
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_balancer_candidates() {
        set_balancer_candidates("metrics-test-storage", 3);

        if let Ok(gauges) = CANDIDATE_GAUGES.lock() {
            assert_eq!(gauges.get("metrics-test-storage"), Some(&3.0));
        }

        set_balancer_candidates("metrics-test-storage", 0);

        if let Ok(gauges) = CANDIDATE_GAUGES.lock() {
            assert_eq!(gauges.get("metrics-test-storage"), Some(&0.0));
        }
    }

    #[test]
    fn test_counters_without_recorder() {
        increment_balancer_request("storage", "http://a:1/", "success");
        record_balancer_request_duration("storage", "http://a:1/", "success", Duration::from_millis(3));
        increment_balancer_failure("storage", "http://a:1/", "503 status code");
        increment_discovery_refresh("storage", "general", false);
    }

    #[test]
    fn test_init_metrics() {
        assert!(init_metrics().is_ok());
    }

    #[test]
    fn test_get_current_metrics() {
        set_balancer_candidates("metrics-test-billing", 2);
        let metrics = get_current_metrics();
        assert!(metrics.contains_key("candidates_metrics-test-billing"));
    }
}
