use std::{fmt, time::Duration};

use url::Url;

/// Outcome label recorded with each finished attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttemptStatus {
    Success,
    Failure,
}

impl AttemptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttemptStatus::Success => "success",
            AttemptStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for AttemptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Sink for per-target balancer telemetry.
///
/// Marking an attempt good or bad only reports here; it never feeds back into
/// candidate selection.
pub trait BalancerStats: Send + Sync + 'static {
    /// Record how long an attempt against `target` took and how it ended
    fn request_time(&self, target: &Url, status: AttemptStatus, elapsed: Duration);

    /// Count a failed attempt against `target` under a failure category
    fn failure(&self, target: &Url, category: &str);

    /// Report a new candidate set: the number of entries (weight included)
    /// and the distinct targets it holds. Targets not listed have left the set.
    fn candidates(&self, _count: usize, _targets: &[&Url]) {}
}

/// Stats sink that drops everything; used when no reporting is wired in
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopBalancerStats;

impl BalancerStats for NoopBalancerStats {
    fn request_time(&self, _target: &Url, _status: AttemptStatus, _elapsed: Duration) {}

    fn failure(&self, _target: &Url, _category: &str) {}
}
