use std::time::Duration;

use rand::Rng;

/// Decorrelated jittered backoff between retries.
///
/// Each delay is drawn from `[min, min + |3 * previous - min|)` and capped at
/// `max`; the first delay uses `previous = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecorrelatedJitteredBackoff {
    min: Duration,
    max: Duration,
}

impl DecorrelatedJitteredBackoff {
    /// Create a backoff policy. `max` is raised to `min` if it is smaller.
    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max: max.max(min),
        }
    }

    pub fn min(&self) -> Duration {
        self.min
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    /// Next delay given the previous one
    pub fn backoff(&self, previous: Duration) -> Duration {
        self.backoff_with(previous, &mut rand::rng())
    }

    fn backoff_with<R: Rng + ?Sized>(&self, previous: Duration, rng: &mut R) -> Duration {
        let min = self.min.as_nanos();
        let previous = previous.as_nanos();
        let range = previous.saturating_mul(3).abs_diff(min);

        let backoff = if range == 0 {
            min
        } else {
            // Durations beyond u64 nanoseconds are far past any sane cap
            let range = u64::try_from(range).unwrap_or(u64::MAX);
            min + u128::from(rng.random_range(0..range))
        };

        let capped = backoff.min(self.max.as_nanos());
        Duration::from_nanos(u64::try_from(capped).unwrap_or(u64::MAX))
    }
}

impl Default for DecorrelatedJitteredBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(10), Duration::from_secs(10))
    }
}
