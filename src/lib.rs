#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # tokenwell
//!
//! Token-bucket rate limiting for async Rust.
//!
//! ## Features
//!
//! - **Exact refill math** in integer nanoseconds, with greedy, interval and aligned refill
//! - **Local buckets** that are lock-free (`ArcSwap`) or mutex-based
//! - **Distributed buckets** over compare-and-swap, select-for-update or advisory-lock storage
//! - **Versioned binary and JSON formats** so mixed client versions can share storage
//! - **Synchronization optimizations**: batching, delaying, predicting and manual sync
//! - **Tower middleware** that rejects requests once a bucket is empty
//!
//! ## Quick Start
//!
//! ```rust
//! use std::time::Duration;
//! use tokenwell::{Bandwidth, BucketConfiguration, LocalBucket};
//!
//! let config = BucketConfiguration::new(vec![
//!     Bandwidth::simple(100, Duration::from_secs(60)).unwrap(),
//!     Bandwidth::simple(10, Duration::from_secs(1)).unwrap(),
//! ])
//! .unwrap();
//! let bucket = LocalBucket::builder(config).lock_free().unwrap();
//!
//! if bucket.try_consume(1).unwrap() {
//!     // handle the request
//! }
//! ```

pub mod bandwidth;
pub mod clock;
pub mod command;
pub mod config;
pub mod distributed;
pub mod error;
pub mod listener;
pub mod local;
pub mod optimization;
pub mod prelude;
pub mod rate_limit;
pub mod remote_state;
pub mod serialization;
pub mod sleeper;
pub mod state;
pub mod timeout;

// Re-exports
pub use bandwidth::Bandwidth;
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use command::{CommandResult, ConsumeOutcome, ConsumptionProbe, EstimationProbe, RemoteCommand};
pub use config::{BucketConfiguration, TokensInheritanceStrategy};
pub use error::{BucketError, ConfigurationError, ExecutionError, SerializationError};
pub use listener::{BucketEvent, CountingSink, EventSink, LogSink, MemorySink, NullSink, SharedSink};
pub use local::{LocalBucket, LocalBucketBuilder, LockFreeBucket, LockedBucket};
pub use optimization::{DelayParameters, Optimization, OptimizationController, PredictionParameters};
pub use rate_limit::{Decision, RateLimitError, RateLimitLayer, RateLimiter};
pub use remote_state::RemoteBucketState;
pub use serialization::Version;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use timeout::RequestTimeout;
