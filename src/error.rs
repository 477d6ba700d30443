//! Error types for bucket configuration, local buckets and remote execution.
//!
//! Running out of tokens is never an error: it is reported through ordinary return values
//! (`false`, [`ConsumeOutcome::Insufficient`](crate::command::ConsumeOutcome), probes). The
//! types here cover programmer errors, storage faults and format incompatibilities.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::command::RemoteError;

/// Errors produced when validating bandwidths, configurations and client settings.
///
/// Raised eagerly by constructors; a value that was built successfully is always usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Capacity must be > 0.
    NonPositiveCapacity {
        /// Value provided by caller.
        provided: i64,
    },
    /// Refill tokens must be > 0.
    NonPositiveRefillTokens {
        /// Value provided by caller.
        provided: i64,
    },
    /// Refill period must be > 0 and representable in i64 nanoseconds.
    InvalidRefillPeriod(Duration),
    /// Initial tokens must be >= 0.
    NegativeInitialTokens {
        /// Value provided by caller.
        provided: i64,
    },
    /// Adaptive initial tokens only make sense with an aligned first refill.
    AdaptiveInitialTokensWithoutAlignment,
    /// A configuration needs at least one bandwidth.
    EmptyConfiguration,
    /// Bandwidth ids must be non-empty.
    EmptyBandwidthId,
    /// Bandwidth ids must be unique within a configuration.
    DuplicateBandwidthId {
        /// The repeated id.
        id: String,
    },
    /// Aligned refill requires a clock that reports wall-clock time.
    WallClockRequired,
    /// Timeouts must be non-zero and finite.
    InvalidTimeout(Duration),
    /// Optimization parameters are out of range.
    InvalidOptimization {
        /// Description of the offending parameter.
        reason: String,
    },
    /// Settings could not be parsed or converted.
    InvalidSettings {
        /// Parser or conversion message.
        reason: String,
    },
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::NonPositiveCapacity { provided } => {
                write!(f, "capacity must be > 0 (got {})", provided)
            }
            ConfigurationError::NonPositiveRefillTokens { provided } => {
                write!(f, "refill tokens must be > 0 (got {})", provided)
            }
            ConfigurationError::InvalidRefillPeriod(period) => {
                write!(f, "refill period must be > 0 and fit in i64 nanoseconds (got {:?})", period)
            }
            ConfigurationError::NegativeInitialTokens { provided } => {
                write!(f, "initial tokens must be >= 0 (got {})", provided)
            }
            ConfigurationError::AdaptiveInitialTokensWithoutAlignment => {
                write!(f, "adaptive initial tokens require an aligned intervally refill")
            }
            ConfigurationError::EmptyConfiguration => {
                write!(f, "bucket configuration must contain at least one bandwidth")
            }
            ConfigurationError::EmptyBandwidthId => write!(f, "bandwidth id must not be empty"),
            ConfigurationError::DuplicateBandwidthId { id } => {
                write!(f, "bandwidth id '{}' is used more than once", id)
            }
            ConfigurationError::WallClockRequired => {
                write!(f, "aligned refill requires a wall-clock based clock")
            }
            ConfigurationError::InvalidTimeout(timeout) => {
                write!(f, "timeout must be non-zero and finite (got {:?})", timeout)
            }
            ConfigurationError::InvalidOptimization { reason } => {
                write!(f, "invalid optimization parameters: {}", reason)
            }
            ConfigurationError::InvalidSettings { reason } => {
                write!(f, "invalid settings: {}", reason)
            }
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Errors raised by the bucket API itself, independent of where the state lives.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum BucketError {
    /// Token amounts must be strictly positive.
    #[error("tokens must be > 0 (got {0})")]
    InvalidTokens(i64),
    /// The request can never be satisfied because it exceeds a bandwidth capacity.
    #[error("{tokens} tokens can never be provided: request exceeds bandwidth capacity")]
    ReservationOverflow {
        /// Tokens requested.
        tokens: i64,
    },
    /// A blocking wait was interrupted. The reservation stays consumed.
    #[error("interrupted while waiting for {tokens} reserved tokens")]
    Interrupted {
        /// Tokens that were reserved before the wait started.
        tokens: i64,
    },
}

/// Errors produced while encoding or decoding persisted state and wire messages.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SerializationError {
    /// The blob declares a format version this build cannot read.
    #[error("unsupported format version {found} (supported {min}..={max})")]
    UnsupportedVersion {
        /// Version found in the data.
        found: i32,
        /// Minimum supported version.
        min: i32,
        /// Maximum supported version.
        max: i32,
    },
    /// The value uses a feature that the target version cannot express.
    #[error("{what} requires format version {required}, target is {target}")]
    UnsupportedForVersion {
        /// Feature that cannot be written.
        what: &'static str,
        /// Version that introduced it.
        required: i32,
        /// Version being written.
        target: i32,
    },
    /// The type tag is not known to the registry in use.
    #[error("unknown type id {0}")]
    UnknownTypeId(u16),
    /// The input ended early.
    #[error("unexpected end of data while reading {0}")]
    UnexpectedEof(&'static str),
    /// Structurally valid bytes that describe an impossible value.
    #[error("invalid data: {0}")]
    InvalidData(String),
    /// JSON form could not be parsed or produced.
    #[error("json: {0}")]
    Json(String),
}

impl From<serde_json::Error> for SerializationError {
    fn from(err: serde_json::Error) -> Self {
        SerializationError::Json(err.to_string())
    }
}

/// Failure of a command against distributed state.
///
/// Clonable so one failure can be fanned out to every caller of a merged batch.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ExecutionError {
    /// Storage or transport failure, wrapping the backend's own error.
    #[error("backend failure: {message}")]
    Backend {
        /// Human-readable description.
        message: String,
        /// Underlying cause, if any.
        #[source]
        source: Option<Arc<dyn std::error::Error + Send + Sync>>,
    },
    /// A remote round-trip exceeded the configured request timeout.
    #[error("operation timed out after {elapsed:?} (limit: {timeout:?})")]
    Timeout {
        /// Time spent before giving up.
        elapsed: Duration,
        /// Configured limit.
        timeout: Duration,
    },
    /// State or message could not be (de)serialized.
    #[error("serialization: {0}")]
    Serialization(#[from] SerializationError),
    /// The bucket does not exist and the proxy is configured not to recreate it.
    #[error("bucket not found")]
    BucketNotFound,
    /// The executing side rejected the command.
    #[error("remote: {0}")]
    Remote(#[from] RemoteError),
    /// A command produced a result of the wrong shape.
    #[error("unexpected command result: expected {expected}")]
    UnexpectedResult {
        /// What the caller expected.
        expected: &'static str,
    },
    /// The backend does not implement the requested capability.
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    /// The operation was abandoned before a result was produced.
    #[error("operation was cancelled before it completed")]
    Cancelled,
    /// The request itself was invalid.
    #[error(transparent)]
    Bucket(#[from] BucketError),
}

impl ExecutionError {
    /// Wrap a backend error with context.
    pub fn backend<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ExecutionError::Backend { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Backend failure without an underlying error value.
    pub fn backend_message(message: impl Into<String>) -> Self {
        ExecutionError::Backend { message: message.into(), source: None }
    }

    /// Check if this error is due to timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Access timeout details as `(elapsed, timeout)`.
    pub fn timeout_details(&self) -> Option<(Duration, Duration)> {
        match self {
            Self::Timeout { elapsed, timeout } => Some((*elapsed, *timeout)),
            _ => None,
        }
    }

    /// Check if this error reports an incompatible format version.
    pub fn is_version_mismatch(&self) -> bool {
        matches!(
            self,
            Self::Serialization(SerializationError::UnsupportedVersion { .. })
                | Self::Remote(RemoteError::UnsupportedVersion { .. })
        )
    }
}
