use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tower_layer::Layer;
use tower_service::Service;
use tracing::debug;

use crate::rate_limit::{Decision, RateLimitError, RateLimiter};

/// A layer that enforces rate limits using a [`RateLimiter`].
#[derive(Debug)]
pub struct RateLimitLayer<L> {
    limiter: Arc<L>,
    permits: i64,
}

impl<L> Clone for RateLimitLayer<L> {
    fn clone(&self) -> Self {
        Self { limiter: self.limiter.clone(), permits: self.permits }
    }
}

impl<L> RateLimitLayer<L> {
    /// Every request costs one permit.
    pub fn new(limiter: L) -> Self {
        Self::shared(Arc::new(limiter))
    }

    /// Share one limiter between several layers.
    pub fn shared(limiter: Arc<L>) -> Self {
        Self { limiter, permits: 1 }
    }

    /// Permits taken per request.
    pub fn permits(mut self, permits: i64) -> Self {
        self.permits = permits;
        self
    }
}

impl<S, L> Layer<S> for RateLimitLayer<L>
where
    L: RateLimiter + 'static,
{
    type Service = RateLimitService<S, L>;

    fn layer(&self, service: S) -> Self::Service {
        RateLimitService { inner: service, limiter: self.limiter.clone(), permits: self.permits }
    }
}

/// Middleware service that enforces rate limits.
#[derive(Debug)]
pub struct RateLimitService<S, L> {
    inner: S,
    limiter: Arc<L>,
    permits: i64,
}

impl<S: Clone, L> Clone for RateLimitService<S, L> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), limiter: self.limiter.clone(), permits: self.permits }
    }
}

impl<S, L, Req> Service<Req> for RateLimitService<S, L>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
    L: RateLimiter + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = RateLimitError<S::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(RateLimitError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let limiter = self.limiter.clone();
        let permits = self.permits;
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            match limiter.acquire(permits).await.map_err(RateLimitError::Execution)? {
                Decision::Allowed { .. } => inner.call(req).await.map_err(RateLimitError::Inner),
                Decision::Denied { wait } => {
                    debug!(permits, ?wait, "request rejected by rate limiter");
                    Err(RateLimitError::Denied { wait })
                }
            }
        })
    }
}
