//! Candidate bookkeeping and per-request selection.
//!
//! [`HttpServiceBalancer`] holds the current weighted candidate set for one
//! service type behind an [`ArcSwap`], so readers always see either the old or
//! the new set and never a partial update. Each logical request takes an
//! [`HttpServiceAttempt`] lease which remembers the URIs already tried and
//! hands out untried candidates first on failover.
use std::{
    collections::{BTreeMap, HashSet},
    fmt,
    sync::Arc,
    time::Instant,
};

use arc_swap::ArcSwap;
use rand::Rng;
use thiserror::Error;
use url::Url;

use crate::ports::balancer_stats::{AttemptStatus, BalancerStats};

/// Errors surfaced synchronously by the balancing layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum BalancerError {
    /// The outgoing request URI is not a relative reference the balancer can resolve
    #[error("Invalid request URI: {0}")]
    InvalidRequestUri(String),

    /// The candidate set is empty
    #[error("No services available for {0}")]
    NoServicesAvailable(String),
}

/// Result type for balancer operations
pub type BalancerResult<T> = Result<T, BalancerError>;

/// An immutable weighted multiset of candidate URIs.
///
/// Duplicate URIs are folded into a multiplicity, and selection uses a
/// cumulative-weight binary search so the pick frequency of each URI is
/// proportional to its multiplicity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandidateSet {
    entries: Vec<(Url, u32)>,
    cumulative: Vec<u64>,
    total: u64,
}

impl CandidateSet {
    /// Build from a multiset where each occurrence counts as one unit of weight
    pub fn from_uris(uris: impl IntoIterator<Item = Url>) -> Self {
        Self::from_weighted(uris.into_iter().map(|uri| (uri, 1)))
    }

    /// Build from `(uri, weight)` pairs; weights of repeated URIs add up and
    /// zero-weight entries are dropped.
    pub fn from_weighted(weighted: impl IntoIterator<Item = (Url, u32)>) -> Self {
        let mut counts: BTreeMap<Url, u32> = BTreeMap::new();
        for (uri, weight) in weighted {
            if weight == 0 {
                continue;
            }
            let count = counts.entry(uri).or_insert(0);
            *count = count.saturating_add(weight);
        }

        let mut cumulative = Vec::with_capacity(counts.len());
        let mut total = 0u64;
        for weight in counts.values() {
            total += u64::from(*weight);
            cumulative.push(total);
        }

        Self {
            entries: counts.into_iter().collect(),
            cumulative,
            total,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Total number of entries, counting each URI once per unit of weight
    pub fn len(&self) -> usize {
        usize::try_from(self.total).unwrap_or(usize::MAX)
    }

    /// Number of distinct URIs
    pub fn distinct_len(&self) -> usize {
        self.entries.len()
    }

    /// Multiplicity of `uri` in the set (0 if absent)
    pub fn count(&self, uri: &Url) -> u32 {
        self.entries
            .binary_search_by(|(candidate, _)| candidate.cmp(uri))
            .map_or(0, |index| self.entries[index].1)
    }

    /// Iterate distinct URIs with their multiplicity
    pub fn iter(&self) -> impl Iterator<Item = (&Url, u32)> {
        self.entries.iter().map(|(uri, weight)| (uri, *weight))
    }

    /// Weighted random pick over the whole set
    fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<&Url> {
        if self.is_empty() {
            return None;
        }
        let point = rng.random_range(0..self.total);
        let index = self.cumulative.partition_point(|&bound| bound <= point);
        self.entries.get(index).map(|(uri, _)| uri)
    }

    /// Weighted random pick over the URIs not in `excluded`
    fn pick_excluding<R: Rng + ?Sized>(
        &self,
        excluded: &HashSet<Url>,
        rng: &mut R,
    ) -> Option<&Url> {
        if excluded.is_empty() {
            return self.pick(rng);
        }
        let remaining: u64 = self
            .entries
            .iter()
            .filter(|(uri, _)| !excluded.contains(uri))
            .map(|(_, weight)| u64::from(*weight))
            .sum();
        if remaining == 0 {
            return None;
        }

        let mut point = rng.random_range(0..remaining);
        for (uri, weight) in self
            .entries
            .iter()
            .filter(|(uri, _)| !excluded.contains(uri))
        {
            let weight = u64::from(*weight);
            if point < weight {
                return Some(uri);
            }
            point -= weight;
        }
        None
    }
}

/// Thread-safe source of truth for the URIs currently believed healthy for one
/// service type, and factory for per-request [`HttpServiceAttempt`]s.
pub struct HttpServiceBalancer {
    description: String,
    candidates: ArcSwap<CandidateSet>,
    stats: Arc<dyn BalancerStats>,
}

impl HttpServiceBalancer {
    /// Create an empty balancer. `description` names the service in errors and logs.
    pub fn new(description: impl Into<String>, stats: Arc<dyn BalancerStats>) -> Self {
        Self {
            description: description.into(),
            candidates: ArcSwap::from_pointee(CandidateSet::default()),
            stats,
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Snapshot of the current candidate set
    pub fn candidates(&self) -> Arc<CandidateSet> {
        self.candidates.load_full()
    }

    /// Replace the candidate set with the given URI multiset.
    ///
    /// An empty update never evicts a non-empty set, and an update with the
    /// same multiset as the current one is ignored. Returns whether the set
    /// was swapped.
    pub fn update_http_uris(&self, uris: impl IntoIterator<Item = Url>) -> bool {
        self.update_candidates(CandidateSet::from_uris(uris))
    }

    /// Replace the candidate set; same rules as [`Self::update_http_uris`]
    pub fn update_candidates(&self, new_candidates: CandidateSet) -> bool {
        let current = self.candidates.load();

        if new_candidates.is_empty() && !current.is_empty() {
            tracing::warn!(
                balancer = %self.description,
                retained = current.len(),
                "Ignoring empty candidate update; keeping previous candidates"
            );
            return false;
        }

        if **current == new_candidates {
            tracing::debug!(balancer = %self.description, "Candidate set unchanged");
            return false;
        }

        tracing::info!(
            balancer = %self.description,
            previous = current.len(),
            current = new_candidates.len(),
            distinct = new_candidates.distinct_len(),
            "Updating candidate set"
        );
        let targets: Vec<&Url> = new_candidates.iter().map(|(uri, _)| uri).collect();
        self.stats.candidates(new_candidates.len(), &targets);
        self.candidates.store(Arc::new(new_candidates));
        true
    }

    /// Start a new logical request with a weighted random initial pick.
    ///
    /// Fails with [`BalancerError::NoServicesAvailable`] when the candidate
    /// set is empty; callers must not retry that.
    pub fn create_attempt(self: &Arc<Self>) -> BalancerResult<HttpServiceAttempt> {
        HttpServiceAttempt::select(Arc::clone(self), HashSet::new())
    }
}

impl fmt::Debug for HttpServiceBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServiceBalancer")
            .field("description", &self.description)
            .field("candidates", &self.candidates.load().len())
            .finish()
    }
}

/// One selection lease: the URI to try now plus the URIs already tried for the
/// same logical request.
pub struct HttpServiceAttempt {
    balancer: Arc<HttpServiceBalancer>,
    uri: Url,
    tried: HashSet<Url>,
    started: Instant,
    in_progress: bool,
}

impl HttpServiceAttempt {
    fn select(balancer: Arc<HttpServiceBalancer>, tried: HashSet<Url>) -> BalancerResult<Self> {
        let candidates = balancer.candidates.load();
        let mut rng = rand::rng();

        let (uri, tried) = match candidates.pick_excluding(&tried, &mut rng) {
            Some(uri) => (uri.clone(), tried),
            // Every candidate was tried already: start over
            None => match candidates.pick(&mut rng) {
                Some(uri) => (uri.clone(), HashSet::new()),
                None => {
                    return Err(BalancerError::NoServicesAvailable(
                        balancer.description.clone(),
                    ));
                }
            },
        };
        drop(candidates);

        Ok(Self {
            balancer,
            uri,
            tried,
            started: Instant::now(),
            in_progress: true,
        })
    }

    /// The URI selected for this attempt
    pub fn uri(&self) -> &Url {
        &self.uri
    }

    /// URIs tried earlier in the same logical request
    pub fn tried(&self) -> &HashSet<Url> {
        &self.tried
    }

    /// Report this attempt as successful
    pub fn mark_good(&mut self) {
        if !self.finish() {
            return;
        }
        self.balancer.stats.request_time(
            &self.uri,
            AttemptStatus::Success,
            self.started.elapsed(),
        );
    }

    /// Report this attempt as failed under `category` (e.g. "503 status code")
    pub fn mark_bad(&mut self, category: &str) {
        if !self.finish() {
            return;
        }
        self.balancer.stats.request_time(
            &self.uri,
            AttemptStatus::Failure,
            self.started.elapsed(),
        );
        self.balancer.stats.failure(&self.uri, category);
    }

    fn finish(&mut self) -> bool {
        if !self.in_progress {
            tracing::debug!(uri = %self.uri, "Attempt already marked");
            return false;
        }
        self.in_progress = false;
        true
    }

    /// Lease the next candidate for the same logical request, preferring URIs
    /// not yet tried and wrapping around once all have been.
    pub fn try_next(&self) -> BalancerResult<HttpServiceAttempt> {
        let mut tried = self.tried.clone();
        tried.insert(self.uri.clone());
        Self::select(Arc::clone(&self.balancer), tried)
    }
}

impl fmt::Display for HttpServiceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "attempt #{} of {}",
            self.tried.len() + 1,
            self.balancer.description
        )
    }
}

impl fmt::Debug for HttpServiceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpServiceAttempt")
            .field("uri", &self.uri.as_str())
            .field("tried", &self.tried.len())
            .field("in_progress", &self.in_progress)
            .finish()
    }
}
