//! Rate limiting for `tower` services.
//!
//! - [`RateLimiter`]: anything that can hand out permits. Implemented for local buckets and
//!   for [`BucketProxy`].
//! - [`RateLimitLayer`]: middleware that asks a limiter before calling the inner service.
//! - [`Decision`]: the answer of a limiter.

use std::time::Duration;

use async_trait::async_trait;

use crate::clock::nanos_to_duration;
use crate::command::ConsumptionProbe;
use crate::distributed::BucketProxy;
use crate::error::ExecutionError;
use crate::local::{LocalBucket, StateHolder};

pub mod middleware;
pub use middleware::{RateLimitLayer, RateLimitService};

/// The decision returned by a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// The request may proceed.
    Allowed {
        /// Permits left after this acquisition, for `X-RateLimit-Remaining` style headers.
        remaining: i64,
    },
    /// The request is denied.
    Denied {
        /// How long until the same request could succeed, for `Retry-After` style headers.
        wait: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

impl From<ConsumptionProbe> for Decision {
    fn from(probe: ConsumptionProbe) -> Self {
        if probe.consumed {
            Decision::Allowed { remaining: probe.remaining_tokens }
        } else {
            Decision::Denied { wait: nanos_to_duration(probe.nanos_to_wait_for_refill) }
        }
    }
}

/// Error of a rate-limited service.
#[derive(thiserror::Error, Debug)]
pub enum RateLimitError<E> {
    /// Not enough tokens.
    #[error("rate limited, retry in {wait:?}")]
    Denied {
        /// How long until the request could succeed.
        wait: Duration,
    },
    /// The limiter itself failed, e.g. storage is unreachable.
    #[error("rate limiter failed: {0}")]
    Execution(#[source] ExecutionError),
    /// The wrapped service failed.
    #[error(transparent)]
    Inner(E),
}

impl<E> RateLimitError<E> {
    pub fn is_denied(&self) -> bool {
        matches!(self, RateLimitError::Denied { .. })
    }
}

/// Core interface for rate limiting logic.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Attempt to take `permits` tokens.
    async fn acquire(&self, permits: i64) -> Result<Decision, ExecutionError>;
}

#[async_trait]
impl<S: StateHolder> RateLimiter for LocalBucket<S> {
    async fn acquire(&self, permits: i64) -> Result<Decision, ExecutionError> {
        Ok(self.try_consume_and_return_remaining(permits)?.into())
    }
}

#[async_trait]
impl RateLimiter for BucketProxy {
    async fn acquire(&self, permits: i64) -> Result<Decision, ExecutionError> {
        Ok(self.try_consume_and_return_remaining(permits).await?.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::Bandwidth;
    use crate::clock::ManualClock;
    use crate::config::BucketConfiguration;

    #[tokio::test]
    async fn local_bucket_allows_then_reports_wait() {
        let clock = ManualClock::new(0);
        let config = BucketConfiguration::single(Bandwidth::simple(10, Duration::from_secs(10)).unwrap());
        let bucket = LocalBucket::builder(config).clock(clock.clone()).lock_free().unwrap();

        assert_eq!(bucket.acquire(10).await.unwrap(), Decision::Allowed { remaining: 0 });
        assert_eq!(bucket.acquire(3).await.unwrap(), Decision::Denied { wait: Duration::from_secs(3) });

        clock.advance(Duration::from_secs(3));
        assert!(bucket.acquire(3).await.unwrap().is_allowed());
        assert!(matches!(bucket.acquire(0).await, Err(ExecutionError::Bucket(_))));
    }
}
