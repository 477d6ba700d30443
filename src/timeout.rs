//! Per round-trip timeout for remote bucket operations.

use std::future::Future;
use std::time::{Duration, Instant};

use crate::error::{ConfigurationError, ExecutionError};

/// Bounds a single remote round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestTimeout {
    duration: Duration,
}

impl RequestTimeout {
    /// Create a timeout. Zero and `Duration::MAX` are rejected.
    pub fn new(duration: Duration) -> Result<Self, ConfigurationError> {
        if duration == Duration::ZERO || duration == Duration::MAX {
            return Err(ConfigurationError::InvalidTimeout(duration));
        }
        Ok(Self { duration })
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Run `operation`, converting an expired deadline into [`ExecutionError::Timeout`].
    ///
    /// The operation's future is dropped on expiry, so nothing it would have produced is
    /// observed by the caller.
    pub async fn execute<T, Fut>(&self, operation: Fut) -> Result<T, ExecutionError>
    where
        Fut: Future<Output = Result<T, ExecutionError>>,
    {
        let start = Instant::now();
        match tokio::time::timeout(self.duration, operation).await {
            Ok(result) => result,
            Err(_) => Err(ExecutionError::Timeout { elapsed: start.elapsed(), timeout: self.duration }),
        }
    }
}

/// Apply an optional timeout.
pub(crate) async fn with_timeout<T, Fut>(timeout: Option<RequestTimeout>, operation: Fut) -> Result<T, ExecutionError>
where
    Fut: Future<Output = Result<T, ExecutionError>>,
{
    match timeout {
        Some(timeout) => timeout.execute(operation).await,
        None => operation.await,
    }
}
