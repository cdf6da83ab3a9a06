use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::KeyValue;
use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;
use tracing::debug;

use gate_limit::Reason;
use gate_limit::Strategy;

use crate::error::GateError;

#[derive(Clone, Debug)]
struct RateLimitServiceMetrics {
    rejected: Counter<u64>,
}

/// Admits or rejects each request according to the strategy's decision for its client.
pub struct RateLimitService<L, S, F>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    resolver: Arc<F>,
    instruments: RateLimitServiceMetrics,
}

pin_project! {
    /// Either the inner service's future or an immediate rejection.
    pub struct ResponseFuture<F> {
        #[pin]
        state: State<F>,
    }
}

pin_project! {
    #[project = StateProj]
    enum State<F> {
        Admitted {
            #[pin]
            inner: F,
        },
        Rejected {
            error: GateError,
        },
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: Into<BoxError>,
{
    type Output = Result<T, BoxError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project().state.project() {
            StateProj::Admitted { inner } => inner.poll(cx).map_err(Into::into),
            StateProj::Rejected { error } => Poll::Ready(Err(BoxError::from(error.clone()))),
        }
    }
}

// Manually implement Clone so that neither the strategy nor the resolver need to be Clone
impl<L, S, F> Clone for RateLimitService<L, S, F>
where
    L: ?Sized,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            resolver: Arc::clone(&self.resolver),
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, S, F, Req> Service<Req> for RateLimitService<L, S, F>
where
    L: Strategy + ?Sized,
    S: Service<Req>,
    S::Error: Into<BoxError>,
    F: Fn(&Req) -> String,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let client = (self.resolver)(&req);

        let state = match self.limiter.process(&client) {
            ControlFlow::Continue(_) => State::Admitted {
                inner: self.inner.call(req),
            },
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                debug!(
                    client = %client,
                    strategy = self.limiter.name(),
                    ?retry_after,
                    "request rejected"
                );
                self.instruments
                    .rejected
                    .add(1, &[KeyValue::new("strategy", self.limiter.name())]);
                State::Rejected {
                    error: GateError::RateLimited { retry_after },
                }
            }
        };

        ResponseFuture { state }
    }
}

impl<L, S, F> RateLimitService<L, S, F>
where
    L: ?Sized,
{
    /// Wraps `inner`, resolving each request's client identifier with `resolver`.
    pub fn new(inner: S, limiter: Arc<L>, resolver: F) -> Self {
        Self::with_shared_resolver(inner, limiter, Arc::new(resolver))
    }

    pub(crate) fn with_shared_resolver(inner: S, limiter: Arc<L>, resolver: Arc<F>) -> Self {
        let meter = global::meter("rate_limit_service");
        let instruments = RateLimitServiceMetrics {
            rejected: meter.u64_counter("rejected").build(),
        };

        Self {
            inner,
            limiter,
            resolver,
            instruments,
        }
    }
}
