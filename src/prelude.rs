//! Convenient re-exports for common tokenwell types.
pub use crate::{
    bandwidth::Bandwidth,
    clock::{Clock, ManualClock, SystemClock},
    command::{ConsumeOutcome, ConsumptionProbe, EstimationProbe},
    config::{BucketConfiguration, TokensInheritanceStrategy},
    distributed::{BucketProxy, ClientSideConfig, ExpirationAfterWriteStrategy, ProxyManager, RecoveryStrategy},
    error::{BucketError, ConfigurationError, ExecutionError},
    local::{LocalBucket, LockFreeBucket, LockedBucket},
    optimization::{DelayParameters, Optimization},
    rate_limit::{Decision, RateLimitError, RateLimitLayer, RateLimiter},
    sleeper::{Sleeper, TokioSleeper},
    timeout::RequestTimeout,
    serialization::Version,
};
