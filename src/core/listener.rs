use std::sync::Arc;

use url::Url;

use crate::core::{
    balancer::{CandidateSet, HttpServiceBalancer},
    descriptor::{ServiceDescriptor, ServiceState},
};

/// Receives descriptor sets produced by a [`ServiceDescriptorsUpdater`](crate::core::updater::ServiceDescriptorsUpdater)
pub trait ServiceDescriptorsListener: Send + Sync + 'static {
    fn update_service_descriptors(&self, descriptors: &[ServiceDescriptor]);
}

/// Translates descriptors into a weighted URI multiset and feeds a balancer.
///
/// The `https` property wins over `http`. `weight` is rounded to the nearest
/// integer; negative or unparsable weights count as 1 and a weight rounding to
/// 0 removes the instance. Stopped instances and instances without a usable URI
/// are skipped.
pub struct HttpServiceBalancerListenerAdapter {
    balancer: Arc<HttpServiceBalancer>,
}

impl HttpServiceBalancerListenerAdapter {
    pub fn new(balancer: Arc<HttpServiceBalancer>) -> Self {
        Self { balancer }
    }

    pub fn balancer(&self) -> &Arc<HttpServiceBalancer> {
        &self.balancer
    }

    /// Build the weighted candidate set for a list of descriptors
    pub fn candidates_from(descriptors: &[ServiceDescriptor]) -> CandidateSet {
        CandidateSet::from_weighted(descriptors.iter().filter_map(|descriptor| {
            if descriptor.state() == Some(ServiceState::Stopped) {
                return None;
            }
            let uri = endpoint_uri(descriptor)?;
            Some((uri, descriptor_weight(descriptor)))
        }))
    }
}

impl ServiceDescriptorsListener for HttpServiceBalancerListenerAdapter {
    fn update_service_descriptors(&self, descriptors: &[ServiceDescriptor]) {
        self.balancer
            .update_candidates(Self::candidates_from(descriptors));
    }
}

fn endpoint_uri(descriptor: &ServiceDescriptor) -> Option<Url> {
    ["https", "http"].into_iter().find_map(|scheme| {
        let raw = descriptor.property(scheme)?;
        match Url::parse(raw) {
            Ok(uri) => Some(uri),
            Err(e) => {
                tracing::debug!(
                    descriptor = %descriptor.id(),
                    property = scheme,
                    value = raw,
                    "Skipping unparsable endpoint: {}",
                    e
                );
                None
            }
        }
    })
}

fn descriptor_weight(descriptor: &ServiceDescriptor) -> u32 {
    let Some(raw) = descriptor.property("weight") else {
        return 1;
    };
    match raw.trim().parse::<f64>() {
        Ok(weight) if weight.is_finite() && weight >= 0.0 => {
            // Saturating float-to-int conversion
            weight.round() as u32
        }
        // Any negative weight, even one that would round to 0, counts as 1 rather
        // than excluding the instance
        _ => 1,
    }
}
