pub mod backoff;
pub mod balancer;
pub mod balancing_client;
pub mod descriptor;
pub mod factory;
pub mod listener;
pub mod request;
pub mod response_future;
pub mod response_handler;
pub mod updater;

pub use backoff::DecorrelatedJitteredBackoff;
pub use balancer::{BalancerError, BalancerResult, CandidateSet, HttpServiceAttempt, HttpServiceBalancer};
pub use balancing_client::BalancingHttpClient;
pub use descriptor::{ServiceDescriptor, ServiceDescriptors, ServiceState};
pub use factory::{HttpServiceBalancerFactory, StaticHttpServiceBalancerFactory};
pub use listener::{HttpServiceBalancerListenerAdapter, ServiceDescriptorsListener};
pub use request::Request;
pub use response_future::{HttpResponseFuture, RequestError, RequestState};
pub use response_handler::{
    JsonResponseHandler, ResponseHandler, ResponseHandlerError, StatusResponseHandler,
    StringResponseHandler,
};
pub use updater::ServiceDescriptorsUpdater;
