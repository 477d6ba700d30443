//! Client-side options shared by every proxy a manager creates.
//!
//! Options can be assembled in code through [`ClientSideConfig`]'s `with_*` methods or
//! loaded from JSON as [`ClientSideSettings`] and converted with `TryFrom`:
//!
//! ```
//! use tokenwell::distributed::{ClientSideConfig, ClientSideSettings};
//!
//! let settings: ClientSideSettings = serde_json::from_str(
//!     r#"{"request_timeout_millis": 250, "expiration": {"strategy": "fixed_ttl", "ttl_millis": 60000}}"#,
//! ).unwrap();
//! let config = ClientSideConfig::try_from(settings).unwrap();
//! assert_eq!(config.request_timeout().unwrap().duration().as_millis(), 250);
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::expiration::ExpirationAfterWriteStrategy;
use crate::clock::{Clock, MonotonicClock, SystemClock};
use crate::error::ConfigurationError;
use crate::serialization::Version;
use crate::timeout::RequestTimeout;

/// Validated client options.
#[derive(Clone)]
pub struct ClientSideConfig {
    request_timeout: Option<RequestTimeout>,
    expiration: ExpirationAfterWriteStrategy,
    clock: Arc<dyn Clock>,
    backward_compatibility_version: Version,
}

impl Default for ClientSideConfig {
    fn default() -> Self {
        Self {
            request_timeout: None,
            expiration: ExpirationAfterWriteStrategy::None,
            clock: Arc::new(SystemClock),
            backward_compatibility_version: Version::LATEST,
        }
    }
}

impl fmt::Debug for ClientSideConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSideConfig")
            .field("request_timeout", &self.request_timeout)
            .field("expiration", &self.expiration)
            .field("clock", &self.clock)
            .field("backward_compatibility_version", &self.backward_compatibility_version)
            .finish()
    }
}

impl ClientSideConfig {
    /// Bound every remote round-trip by `timeout`.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ConfigurationError> {
        self.request_timeout = Some(RequestTimeout::new(timeout)?);
        Ok(self)
    }

    pub fn with_expiration(mut self, expiration: ExpirationAfterWriteStrategy) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Write state and commands in `version` so that older peers can read them.
    pub fn with_backward_compatibility_version(mut self, version: Version) -> Self {
        self.backward_compatibility_version = version;
        self
    }

    pub fn request_timeout(&self) -> Option<RequestTimeout> {
        self.request_timeout
    }

    pub fn expiration(&self) -> ExpirationAfterWriteStrategy {
        self.expiration
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn backward_compatibility_version(&self) -> Version {
        self.backward_compatibility_version
    }
}

/// Clock selection in [`ClientSideSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockSettings {
    /// Nanoseconds since the Unix epoch. Required when buckets are shared across processes.
    #[default]
    System,
    /// Process-local monotonic time.
    Monotonic,
}

/// Expiration selection in [`ClientSideSettings`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum ExpirationSettings {
    #[default]
    None,
    FixedTtl { ttl_millis: u64 },
    BasedOnTimeForRefillingBucketUpToMax { keep_after_refill_millis: u64 },
}

impl From<ExpirationSettings> for ExpirationAfterWriteStrategy {
    fn from(settings: ExpirationSettings) -> Self {
        match settings {
            ExpirationSettings::None => ExpirationAfterWriteStrategy::None,
            ExpirationSettings::FixedTtl { ttl_millis } => {
                ExpirationAfterWriteStrategy::FixedTtl(Duration::from_millis(ttl_millis))
            }
            ExpirationSettings::BasedOnTimeForRefillingBucketUpToMax { keep_after_refill_millis } => {
                ExpirationAfterWriteStrategy::BasedOnTimeForRefillingBucketUpToMax(Duration::from_millis(
                    keep_after_refill_millis,
                ))
            }
        }
    }
}

/// Serializable form of [`ClientSideConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClientSideSettings {
    #[serde(default)]
    pub request_timeout_millis: Option<u64>,
    #[serde(default)]
    pub expiration: ExpirationSettings,
    #[serde(default)]
    pub clock: ClockSettings,
    #[serde(default)]
    pub backward_compatibility_version: Option<Version>,
}

impl TryFrom<ClientSideSettings> for ClientSideConfig {
    type Error = ConfigurationError;

    fn try_from(settings: ClientSideSettings) -> Result<Self, Self::Error> {
        let clock: Arc<dyn Clock> = match settings.clock {
            ClockSettings::System => Arc::new(SystemClock),
            ClockSettings::Monotonic => Arc::new(MonotonicClock::default()),
        };
        let mut config = ClientSideConfig::default()
            .with_expiration(settings.expiration.into())
            .with_clock(clock)
            .with_backward_compatibility_version(settings.backward_compatibility_version.unwrap_or_default());
        if let Some(millis) = settings.request_timeout_millis {
            config = config.with_request_timeout(Duration::from_millis(millis))?;
        }
        Ok(config)
    }
}

impl ClientSideSettings {
    /// Parse settings from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(text).map_err(|err| ConfigurationError::InvalidSettings { reason: err.to_string() })
    }
}
