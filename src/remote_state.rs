//! The unit of storage: configuration, token state and consumption statistics.
//!
//! Every bucket operation, local or remote, is a method here so that a lock-free local
//! bucket and a command running inside a storage transaction apply exactly the same rules.
//! Methods that take `now` refill first; mutating methods mutate `self` even when they
//! report failure, so callers work on a clone and keep it only when the operation committed.

use serde::{Deserialize, Serialize};

use crate::command::{ConsumeOutcome, ConsumptionProbe, EstimationProbe};
use crate::config::{BucketConfiguration, TokensInheritanceStrategy};
use crate::error::SerializationError;
use crate::state::BucketState;

/// Statistics that survive configuration changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteStat {
    consumed_tokens: i64,
}

impl RemoteStat {
    pub fn new(consumed_tokens: i64) -> Self {
        Self { consumed_tokens }
    }

    /// Total tokens ever consumed. Only grows (saturating at `i64::MAX`).
    pub fn consumed_tokens(&self) -> i64 {
        self.consumed_tokens
    }

    pub(crate) fn add_consumed(&mut self, tokens: i64) {
        self.consumed_tokens = self.consumed_tokens.saturating_add(tokens.max(0));
    }
}

/// Complete persisted state of one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RemoteStateRepr", into = "RemoteStateRepr")]
pub struct RemoteBucketState {
    configuration: BucketConfiguration,
    state: BucketState,
    stat: RemoteStat,
    configuration_version: Option<i64>,
}

#[derive(Serialize, Deserialize)]
struct RemoteStateRepr {
    configuration: BucketConfiguration,
    state: BucketState,
    stat: RemoteStat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    configuration_version: Option<i64>,
}

impl TryFrom<RemoteStateRepr> for RemoteBucketState {
    type Error = SerializationError;

    fn try_from(repr: RemoteStateRepr) -> Result<Self, Self::Error> {
        RemoteBucketState::from_parts(repr.configuration, repr.state, repr.stat, repr.configuration_version)
    }
}

impl From<RemoteBucketState> for RemoteStateRepr {
    fn from(state: RemoteBucketState) -> Self {
        RemoteStateRepr {
            configuration: state.configuration,
            state: state.state,
            stat: state.stat,
            configuration_version: state.configuration_version,
        }
    }
}

impl RemoteBucketState {
    /// Fresh bucket for `configuration` at `now`.
    pub fn new(configuration: BucketConfiguration, now: i64) -> Self {
        let state = BucketState::initial(&configuration, now);
        Self { configuration, state, stat: RemoteStat::default(), configuration_version: None }
    }

    /// Fresh bucket tagged with a configuration version.
    pub fn with_version(configuration: BucketConfiguration, version: i64, now: i64) -> Self {
        let mut fresh = Self::new(configuration, now);
        fresh.configuration_version = Some(version);
        fresh
    }

    /// Reassemble decoded parts, checking that the state matches the configuration.
    pub(crate) fn from_parts(
        configuration: BucketConfiguration,
        state: BucketState,
        stat: RemoteStat,
        configuration_version: Option<i64>,
    ) -> Result<Self, SerializationError> {
        if state.slots().len() != configuration.len() {
            return Err(SerializationError::InvalidData(format!(
                "state has {} slots but configuration has {} bandwidths",
                state.slots().len(),
                configuration.len()
            )));
        }
        Ok(Self { configuration, state, stat, configuration_version })
    }

    pub fn configuration(&self) -> &BucketConfiguration {
        &self.configuration
    }

    pub fn state(&self) -> &BucketState {
        &self.state
    }

    pub fn stat(&self) -> &RemoteStat {
        &self.stat
    }

    pub fn consumed_tokens(&self) -> i64 {
        self.stat.consumed_tokens()
    }

    pub fn configuration_version(&self) -> Option<i64> {
        self.configuration_version
    }

    pub(crate) fn set_configuration_version(&mut self, version: Option<i64>) {
        self.configuration_version = version;
    }

    pub fn refill_all(&mut self, now: i64) {
        self.state.refill_all(self.configuration.bandwidths(), now);
    }

    /// Tokens available at `now`, without mutating.
    pub fn available_tokens(&self, now: i64) -> i64 {
        let mut copy = self.state.clone();
        copy.refill_all(self.configuration.bandwidths(), now);
        copy.available_tokens()
    }

    /// Nanoseconds until every bandwidth is full again.
    pub fn nanos_to_full_refill(&self, now: i64) -> i64 {
        let mut copy = self.state.clone();
        copy.refill_all(self.configuration.bandwidths(), now);
        copy.nanos_to_full_refill(self.configuration.bandwidths(), now)
    }

    fn take(&mut self, tokens: i64) {
        self.state.consume(tokens);
        self.stat.add_consumed(tokens);
    }

    pub fn try_consume(&mut self, tokens: i64, now: i64) -> bool {
        self.refill_all(now);
        if tokens > self.state.available_tokens() {
            return false;
        }
        self.take(tokens);
        true
    }

    pub fn consume(&mut self, tokens: i64, now: i64) -> ConsumeOutcome {
        self.refill_all(now);
        let available = self.state.available_tokens();
        if tokens > available {
            return ConsumeOutcome::Insufficient { available };
        }
        self.take(tokens);
        ConsumeOutcome::Consumed { remaining: available - tokens }
    }

    /// Take up to `limit` tokens, as many as are available. Returns the amount taken.
    pub fn consume_as_much_as_possible(&mut self, limit: i64, now: i64) -> i64 {
        self.refill_all(now);
        let to_consume = self.state.available_tokens().min(limit);
        if to_consume <= 0 {
            return 0;
        }
        self.take(to_consume);
        to_consume
    }

    pub fn try_consume_and_return_remaining(&mut self, tokens: i64, now: i64) -> ConsumptionProbe {
        self.refill_all(now);
        let bandwidths = self.configuration.bandwidths();
        let available = self.state.available_tokens();
        if tokens > available {
            return ConsumptionProbe {
                consumed: false,
                remaining_tokens: available.max(0),
                nanos_to_wait_for_refill: self.state.delay_nanos_to_consume(bandwidths, tokens, now),
                nanos_to_wait_for_reset: self.state.nanos_to_full_refill(bandwidths, now),
            };
        }
        self.take(tokens);
        let bandwidths = self.configuration.bandwidths();
        ConsumptionProbe {
            consumed: true,
            remaining_tokens: (available - tokens).max(0),
            nanos_to_wait_for_refill: 0,
            nanos_to_wait_for_reset: self.state.nanos_to_full_refill(bandwidths, now),
        }
    }

    pub fn estimate_ability_to_consume(&self, tokens: i64, now: i64) -> EstimationProbe {
        let bandwidths = self.configuration.bandwidths();
        let mut copy = self.state.clone();
        copy.refill_all(bandwidths, now);
        let available = copy.available_tokens();
        if tokens <= available {
            EstimationProbe { can_be_consumed: true, remaining_tokens: available, nanos_to_wait_for_refill: 0 }
        } else {
            EstimationProbe {
                can_be_consumed: false,
                remaining_tokens: available,
                nanos_to_wait_for_refill: copy.delay_nanos_to_consume(bandwidths, tokens, now),
            }
        }
    }

    /// Reserve `tokens` if they become available within `max_wait_nanos`.
    ///
    /// Returns the nanoseconds the caller must wait before using the reserved tokens, or
    /// `i64::MAX` when nothing was reserved.
    pub fn reserve(&mut self, tokens: i64, max_wait_nanos: i64, now: i64) -> i64 {
        self.refill_all(now);
        let delay = self.state.delay_nanos_to_consume(self.configuration.bandwidths(), tokens, now);
        if delay == i64::MAX || delay > max_wait_nanos {
            return i64::MAX;
        }
        self.take(tokens);
        delay
    }

    pub fn add_tokens(&mut self, tokens: i64, now: i64) {
        self.refill_all(now);
        self.state.add_tokens(self.configuration.bandwidths(), tokens);
    }

    pub fn force_add_tokens(&mut self, tokens: i64, now: i64) {
        self.refill_all(now);
        self.state.force_add_tokens(self.configuration.bandwidths(), tokens);
    }

    /// Consume without checking availability; returns the tokens written off.
    pub fn consume_ignoring_rate_limits(&mut self, tokens: i64, now: i64) -> i64 {
        self.refill_all(now);
        self.stat.add_consumed(tokens);
        self.state.consume_ignoring_rate_limits(tokens)
    }

    /// Return every bandwidth to its initial state. Statistics are kept.
    pub fn reset(&mut self, now: i64) {
        self.state = BucketState::initial(&self.configuration, now);
    }

    /// Swap the configuration, remapping tokens per `strategy`. Returns the previous one.
    pub fn replace_configuration(
        &mut self,
        configuration: BucketConfiguration,
        strategy: TokensInheritanceStrategy,
        now: i64,
    ) -> BucketConfiguration {
        self.refill_all(now);
        self.state = self.state.replace_configuration(&self.configuration, &configuration, strategy, now);
        std::mem::replace(&mut self.configuration, configuration)
    }
}
