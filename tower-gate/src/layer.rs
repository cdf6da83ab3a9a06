use std::sync::Arc;

use gate_limit::Strategy;
use tower::Layer;

use crate::service::RateLimitService;

/// Applies per-client admission control to requests.
///
/// The strategy and the resolver are shared by every service the layer produces, so all of
/// them draw on the same per-client capacity.
#[derive(Debug)]
pub struct RateLimitLayer<L, F>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    resolver: Arc<F>,
}

impl<L, F> Clone for RateLimitLayer<L, F>
where
    L: ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            resolver: Arc::clone(&self.resolver),
        }
    }
}

impl<L, F> RateLimitLayer<L, F>
where
    L: Strategy + ?Sized,
{
    /// Create a RateLimitLayer
    ///
    /// `resolver` maps a request to the identifier of the client it is accounted against.
    pub fn new(limiter: Arc<L>, resolver: F) -> Self {
        RateLimitLayer {
            limiter,
            resolver: Arc::new(resolver),
        }
    }
}

impl<L, F, S> Layer<S> for RateLimitLayer<L, F>
where
    L: ?Sized,
{
    type Service = RateLimitService<L, S, F>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService::with_shared_resolver(
            service,
            Arc::clone(&self.limiter),
            Arc::clone(&self.resolver),
        )
    }
}
