//! A single limit inside a bucket: capacity plus refill policy.
//!
//! Refill comes in two flavours:
//! - **greedy**: tokens trickle in continuously, proportional to elapsed time;
//! - **intervally**: the whole `refill_tokens` amount arrives at once when a full period has
//!   elapsed. Intervally refill can be *aligned* so periods start at a wall-clock instant.
//!
//! ```rust
//! use std::time::Duration;
//! use tokenwell::Bandwidth;
//!
//! // 100 tokens per minute, refilled continuously, starting empty.
//! let limit = Bandwidth::simple(100, Duration::from_secs(60))
//!     .unwrap()
//!     .with_initial_tokens(0)
//!     .unwrap();
//! assert_eq!(limit.capacity(), 100);
//! assert!(!limit.is_refill_intervally());
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Validated, immutable description of one limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BandwidthRepr", into = "BandwidthRepr")]
pub struct Bandwidth {
    capacity: i64,
    initial_tokens: i64,
    refill_period_nanos: i64,
    refill_tokens: i64,
    refill_intervally: bool,
    time_of_first_refill_millis: Option<i64>,
    use_adaptive_initial_tokens: bool,
    id: Option<String>,
}

impl Bandwidth {
    /// Greedy bandwidth that refills its whole capacity once per `period`.
    pub fn simple(capacity: i64, period: Duration) -> Result<Self, ConfigurationError> {
        Self::greedy(capacity, capacity, period)
    }

    /// Greedy refill: `refill_tokens` per `period`, added proportionally to elapsed time.
    pub fn greedy(
        capacity: i64,
        refill_tokens: i64,
        period: Duration,
    ) -> Result<Self, ConfigurationError> {
        Self::build(capacity, refill_tokens, period, false, None, false)
    }

    /// Intervally refill: `refill_tokens` added at once after each complete `period`.
    pub fn intervally(
        capacity: i64,
        refill_tokens: i64,
        period: Duration,
    ) -> Result<Self, ConfigurationError> {
        Self::build(capacity, refill_tokens, period, true, None, false)
    }

    /// Intervally refill whose period boundaries are aligned to `time_of_first_refill`.
    ///
    /// With `use_adaptive_initial_tokens`, a bucket created before the first refill starts
    /// with tokens proportional to the time remaining until that refill.
    pub fn intervally_aligned(
        capacity: i64,
        refill_tokens: i64,
        period: Duration,
        time_of_first_refill: SystemTime,
        use_adaptive_initial_tokens: bool,
    ) -> Result<Self, ConfigurationError> {
        let millis = time_of_first_refill
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Self::build(capacity, refill_tokens, period, true, Some(millis), use_adaptive_initial_tokens)
    }

    fn build(
        capacity: i64,
        refill_tokens: i64,
        period: Duration,
        refill_intervally: bool,
        time_of_first_refill_millis: Option<i64>,
        use_adaptive_initial_tokens: bool,
    ) -> Result<Self, ConfigurationError> {
        let refill_period_nanos = i64::try_from(period.as_nanos())
            .map_err(|_| ConfigurationError::InvalidRefillPeriod(period))?;
        if refill_period_nanos <= 0 {
            return Err(ConfigurationError::InvalidRefillPeriod(period));
        }
        let bandwidth = Self {
            capacity,
            initial_tokens: capacity,
            refill_period_nanos,
            refill_tokens,
            refill_intervally,
            time_of_first_refill_millis,
            use_adaptive_initial_tokens,
            id: None,
        };
        bandwidth.validate()?;
        Ok(bandwidth)
    }

    /// Override the tokens available right after creation (defaults to capacity).
    pub fn with_initial_tokens(mut self, initial_tokens: i64) -> Result<Self, ConfigurationError> {
        if initial_tokens < 0 {
            return Err(ConfigurationError::NegativeInitialTokens { provided: initial_tokens });
        }
        self.initial_tokens = initial_tokens;
        Ok(self)
    }

    /// Attach an id, used to match bandwidths when a configuration is replaced.
    pub fn with_id(mut self, id: impl Into<String>) -> Result<Self, ConfigurationError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ConfigurationError::EmptyBandwidthId);
        }
        self.id = Some(id);
        Ok(self)
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        if self.capacity <= 0 {
            return Err(ConfigurationError::NonPositiveCapacity { provided: self.capacity });
        }
        if self.refill_tokens <= 0 {
            return Err(ConfigurationError::NonPositiveRefillTokens {
                provided: self.refill_tokens,
            });
        }
        if self.refill_period_nanos <= 0 {
            return Err(ConfigurationError::InvalidRefillPeriod(Duration::ZERO));
        }
        if self.initial_tokens < 0 {
            return Err(ConfigurationError::NegativeInitialTokens {
                provided: self.initial_tokens,
            });
        }
        if self.use_adaptive_initial_tokens && self.time_of_first_refill_millis.is_none() {
            return Err(ConfigurationError::AdaptiveInitialTokensWithoutAlignment);
        }
        if self.time_of_first_refill_millis.is_some() && !self.refill_intervally {
            return Err(ConfigurationError::InvalidSettings {
                reason: "time of first refill requires intervally refill".into(),
            });
        }
        if matches!(&self.id, Some(id) if id.is_empty()) {
            return Err(ConfigurationError::EmptyBandwidthId);
        }
        Ok(())
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn initial_tokens(&self) -> i64 {
        self.initial_tokens
    }

    pub fn refill_period_nanos(&self) -> i64 {
        self.refill_period_nanos
    }

    pub fn refill_tokens(&self) -> i64 {
        self.refill_tokens
    }

    pub fn is_refill_intervally(&self) -> bool {
        self.refill_intervally
    }

    /// Intervally refill with a fixed wall-clock anchor.
    pub fn is_intervally_aligned(&self) -> bool {
        self.time_of_first_refill_millis.is_some()
    }

    pub fn time_of_first_refill_millis(&self) -> Option<i64> {
        self.time_of_first_refill_millis
    }

    pub fn is_use_adaptive_initial_tokens(&self) -> bool {
        self.use_adaptive_initial_tokens
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }
}

/// Field-for-field wire form; validated on the way back in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct BandwidthRepr {
    pub(crate) capacity: i64,
    pub(crate) initial_tokens: i64,
    pub(crate) refill_period_nanos: i64,
    pub(crate) refill_tokens: i64,
    pub(crate) refill_intervally: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) time_of_first_refill_millis: Option<i64>,
    #[serde(default)]
    pub(crate) use_adaptive_initial_tokens: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) id: Option<String>,
}

impl TryFrom<BandwidthRepr> for Bandwidth {
    type Error = ConfigurationError;

    fn try_from(repr: BandwidthRepr) -> Result<Self, Self::Error> {
        let bandwidth = Bandwidth {
            capacity: repr.capacity,
            initial_tokens: repr.initial_tokens,
            refill_period_nanos: repr.refill_period_nanos,
            refill_tokens: repr.refill_tokens,
            refill_intervally: repr.refill_intervally,
            time_of_first_refill_millis: repr.time_of_first_refill_millis,
            use_adaptive_initial_tokens: repr.use_adaptive_initial_tokens,
            id: repr.id,
        };
        bandwidth.validate()?;
        Ok(bandwidth)
    }
}

impl From<Bandwidth> for BandwidthRepr {
    fn from(b: Bandwidth) -> Self {
        BandwidthRepr {
            capacity: b.capacity,
            initial_tokens: b.initial_tokens,
            refill_period_nanos: b.refill_period_nanos,
            refill_tokens: b.refill_tokens,
            refill_intervally: b.refill_intervally,
            time_of_first_refill_millis: b.time_of_first_refill_millis,
            use_adaptive_initial_tokens: b.use_adaptive_initial_tokens,
            id: b.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_values_at_construction() {
        assert_eq!(
            Bandwidth::simple(0, Duration::from_secs(1)).unwrap_err(),
            ConfigurationError::NonPositiveCapacity { provided: 0 }
        );
        assert_eq!(
            Bandwidth::greedy(10, -1, Duration::from_secs(1)).unwrap_err(),
            ConfigurationError::NonPositiveRefillTokens { provided: -1 }
        );
        assert!(matches!(
            Bandwidth::greedy(10, 1, Duration::ZERO),
            Err(ConfigurationError::InvalidRefillPeriod(_))
        ));
        assert!(matches!(
            Bandwidth::greedy(10, 1, Duration::MAX),
            Err(ConfigurationError::InvalidRefillPeriod(_))
        ));
        let err = Bandwidth::simple(10, Duration::from_secs(1))
            .and_then(|b| b.with_initial_tokens(-3))
            .unwrap_err();
        assert_eq!(err, ConfigurationError::NegativeInitialTokens { provided: -3 });
    }

    #[test]
    fn initial_tokens_default_to_capacity() {
        let b = Bandwidth::greedy(20, 5, Duration::from_secs(1)).unwrap();
        assert_eq!(b.initial_tokens(), 20);
        assert_eq!(b.refill_tokens(), 5);
        assert_eq!(b.refill_period_nanos(), 1_000_000_000);
        assert!(!b.is_intervally_aligned());
    }

    #[test]
    fn aligned_bandwidth_records_first_refill() {
        let first = UNIX_EPOCH + Duration::from_secs(3_600);
        let b = Bandwidth::intervally_aligned(10, 10, Duration::from_secs(60), first, true).unwrap();
        assert!(b.is_refill_intervally());
        assert!(b.is_intervally_aligned());
        assert_eq!(b.time_of_first_refill_millis(), Some(3_600_000));
        assert!(b.is_use_adaptive_initial_tokens());
    }

    #[test]
    fn empty_id_is_rejected() {
        let err = Bandwidth::simple(1, Duration::from_secs(1)).unwrap().with_id("").unwrap_err();
        assert_eq!(err, ConfigurationError::EmptyBandwidthId);
    }

    #[test]
    fn json_form_is_validated_on_decode() {
        let b = Bandwidth::simple(5, Duration::from_secs(1)).unwrap().with_id("api").unwrap();
        let json = serde_json::to_value(&b).unwrap();
        assert_eq!(json["capacity"], 5);
        assert_eq!(json["id"], "api");
        let back: Bandwidth = serde_json::from_value(json).unwrap();
        assert_eq!(back, b);

        let bad = serde_json::json!({
            "capacity": 0,
            "initial_tokens": 0,
            "refill_period_nanos": 1,
            "refill_tokens": 1,
            "refill_intervally": false
        });
        assert!(serde_json::from_value::<Bandwidth>(bad).is_err());
    }
}
