//! Request-reducing decorators for distributed buckets.
//!
//! An [`Optimization`] wraps the executor a [`BucketProxy`](crate::distributed::BucketProxy)
//! talks to:
//!
//! - **Batching**: concurrent commands are merged into one `Multi` request.
//! - **Delaying**: commands run against a local copy until too many tokens or too much time
//!   went unsynchronized.
//! - **Manual**: like delaying, but synchronization happens only when asked for through the
//!   [`OptimizationController`].
//! - **Predicting**: delaying, plus the local copy is charged with the consumption other
//!   nodes are predicted to make.
//!
//! ```
//! use std::time::Duration;
//! use tokenwell::optimization::{DelayParameters, Optimization};
//!
//! let delay = DelayParameters::new(20, Duration::from_millis(100)).unwrap();
//! let optimization = Optimization::Delaying(delay);
//! assert!(matches!(optimization, Optimization::Delaying(_)));
//! ```

mod batching;
mod delay;
mod manual;
mod predictive;
mod synced;

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{duration_to_nanos, Clock};
use crate::command::RemoteCommand;
use crate::distributed::CommandExecutor;
use crate::error::{ConfigurationError, ExecutionError};
use crate::listener::SharedSink;

pub(crate) use batching::BatchingExecutor;
pub use predictive::Sampling;
pub(crate) use synced::SyncingExecutor;

use delay::DelayPolicy;
use manual::ManualPolicy;
use predictive::PredictivePolicy;

/// Thresholds of delayed synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayParameters {
    max_unsynchronized_tokens: i64,
    max_unsynchronized_timeout: Duration,
}

impl DelayParameters {
    /// Sync once `max_unsynchronized_tokens` were consumed locally or
    /// `max_unsynchronized_timeout` passed since the last sync, whichever comes first.
    pub fn new(max_unsynchronized_tokens: i64, max_unsynchronized_timeout: Duration) -> Result<Self, ConfigurationError> {
        if max_unsynchronized_tokens < 0 {
            return Err(ConfigurationError::InvalidOptimization {
                reason: format!("max unsynchronized tokens must be >= 0 (got {})", max_unsynchronized_tokens),
            });
        }
        if max_unsynchronized_timeout.is_zero() {
            return Err(ConfigurationError::InvalidOptimization {
                reason: "max unsynchronized timeout must be > 0".to_string(),
            });
        }
        Ok(Self { max_unsynchronized_tokens, max_unsynchronized_timeout })
    }

    pub fn max_unsynchronized_tokens(&self) -> i64 {
        self.max_unsynchronized_tokens
    }

    pub fn max_unsynchronized_timeout(&self) -> Duration {
        self.max_unsynchronized_timeout
    }

    pub(crate) fn max_unsynchronized_nanos(&self) -> i64 {
        duration_to_nanos(self.max_unsynchronized_timeout)
    }
}

/// Sampling window of predictive synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionParameters {
    min_samples: usize,
    max_samples: usize,
    sample_max_age: Duration,
}

impl PredictionParameters {
    pub const DEFAULT_MIN_SAMPLES: usize = 2;
    pub const DEFAULT_MAX_SAMPLES: usize = 10;

    pub fn new(min_samples: usize, max_samples: usize, sample_max_age: Duration) -> Result<Self, ConfigurationError> {
        if min_samples < 2 {
            return Err(ConfigurationError::InvalidOptimization {
                reason: format!("min samples must be >= 2 (got {})", min_samples),
            });
        }
        if max_samples < min_samples {
            return Err(ConfigurationError::InvalidOptimization {
                reason: format!("max samples ({}) must be >= min samples ({})", max_samples, min_samples),
            });
        }
        if sample_max_age.is_zero() {
            return Err(ConfigurationError::InvalidOptimization {
                reason: "sample max age must be > 0".to_string(),
            });
        }
        Ok(Self { min_samples, max_samples, sample_max_age })
    }

    /// Default window for `delay`: two to ten samples, each kept for twice the delay timeout.
    pub fn for_delay(delay: &DelayParameters) -> Self {
        Self {
            min_samples: Self::DEFAULT_MIN_SAMPLES,
            max_samples: Self::DEFAULT_MAX_SAMPLES,
            sample_max_age: delay.max_unsynchronized_timeout.saturating_mul(2),
        }
    }

    pub fn min_samples(&self) -> usize {
        self.min_samples
    }

    pub fn max_samples(&self) -> usize {
        self.max_samples
    }

    pub fn sample_max_age(&self) -> Duration {
        self.sample_max_age
    }
}

/// How a proxy reduces its remote traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Optimization {
    /// Every command is one remote request.
    #[default]
    None,
    Batching,
    Delaying(DelayParameters),
    Manual,
    Predicting {
        delay: DelayParameters,
        prediction: PredictionParameters,
    },
}

impl Optimization {
    /// Predictive optimization with the default sampling window for `delay`.
    pub fn predicting(delay: DelayParameters) -> Self {
        Optimization::Predicting { delay, prediction: PredictionParameters::for_delay(&delay) }
    }

    /// Wrap `target` according to this optimization.
    ///
    /// Delaying and predicting executors sit behind a batching executor so that concurrent
    /// remote legs are merged as well.
    pub(crate) fn apply(
        &self,
        target: Arc<dyn CommandExecutor>,
        clock: Arc<dyn Clock>,
        listener: SharedSink,
    ) -> Arc<dyn CommandExecutor> {
        match *self {
            Optimization::None => target,
            Optimization::Batching => Arc::new(BatchingExecutor::new(target, listener)),
            Optimization::Delaying(delay) => {
                let synced = SyncingExecutor::new(target, clock, listener.clone(), DelayPolicy::new(delay));
                Arc::new(BatchingExecutor::new(Arc::new(synced), listener))
            }
            Optimization::Manual => Arc::new(SyncingExecutor::new(target, clock, listener, ManualPolicy)),
            Optimization::Predicting { delay, prediction } => {
                let policy = PredictivePolicy::new(delay, prediction);
                let synced = SyncingExecutor::new(target, clock, listener.clone(), policy);
                Arc::new(BatchingExecutor::new(Arc::new(synced), listener))
            }
        }
    }
}

/// Explicit synchronization of an optimized proxy.
///
/// Syncs travel through the proxy, so a missing bucket is recreated like for any other
/// command. Without a local-copy optimization a sync is a plain remote no-op.
#[derive(Clone)]
pub struct OptimizationController {
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for OptimizationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptimizationController").finish_non_exhaustive()
    }
}

impl OptimizationController {
    pub(crate) fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Push locally consumed tokens to storage and refresh the local copy.
    pub async fn sync_immediately(&self) -> Result<(), ExecutionError> {
        self.sync_by_condition(0, Duration::ZERO).await
    }

    /// Sync only if at least `unsynchronized_tokens` were consumed locally or
    /// `time_since_last_sync` passed since the last sync.
    pub async fn sync_by_condition(
        &self,
        unsynchronized_tokens: i64,
        time_since_last_sync: Duration,
    ) -> Result<(), ExecutionError> {
        let command = RemoteCommand::Sync {
            unsynchronized_tokens,
            nanos_since_last_sync: duration_to_nanos(time_since_last_sync),
        };
        self.executor.execute(command).await?.into_unit()
    }
}
