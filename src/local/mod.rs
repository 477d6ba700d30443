//! In-process buckets.
//!
//! A [`LocalBucket`] keeps its [`RemoteBucketState`] in memory and applies the same
//! operations that distributed commands apply. Two holders are provided:
//!
//! - [`LockFreeState`]: `ArcSwap` with a compare-and-swap retry loop. Readers never block.
//! - [`LockedState`]: a `std::sync::Mutex`.
//!
//! ```
//! use std::time::Duration;
//! use tokenwell::{Bandwidth, BucketConfiguration, LocalBucket};
//!
//! let config = BucketConfiguration::single(Bandwidth::simple(10, Duration::from_secs(1)).unwrap());
//! let bucket = LocalBucket::builder(config).lock_free().unwrap();
//! assert!(bucket.try_consume(3).unwrap());
//! assert!(bucket.available_tokens() <= 7);
//! ```

mod lock_free;
mod locked;

pub use lock_free::LockFreeState;
pub use locked::LockedState;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::{duration_to_nanos, nanos_to_duration, Clock, SystemClock};
use crate::command::{BucketEntry, CommandResult, ConsumeOutcome, ConsumptionProbe, EstimationProbe, RemoteCommand};
use crate::config::{BucketConfiguration, TokensInheritanceStrategy};
use crate::error::{BucketError, ConfigurationError};
use crate::listener::{null_sink, BucketEvent, SharedSink};
use crate::remote_state::RemoteBucketState;
use crate::sleeper::{BlockingStrategy, Sleeper};

/// Storage strategy for a local bucket's state.
pub trait StateHolder: Send + Sync + fmt::Debug {
    fn new(state: RemoteBucketState) -> Self
    where
        Self: Sized;

    /// Run `f` against the current state without changing it.
    fn read<R>(&self, f: impl FnOnce(&RemoteBucketState) -> R) -> R;

    /// Run `f` against the current state and keep its changes when it returns `true`
    /// alongside the result. `f` may run more than once.
    fn update<R>(&self, f: impl FnMut(&mut RemoteBucketState) -> (R, bool)) -> R;
}

/// Bucket backed by a lock-free holder.
pub type LockFreeBucket = LocalBucket<LockFreeState>;
/// Bucket backed by a mutex.
pub type LockedBucket = LocalBucket<LockedState>;

/// Token bucket living in this process.
#[derive(Debug)]
pub struct LocalBucket<S: StateHolder> {
    state: S,
    clock: Arc<dyn Clock>,
    listener: SharedSink,
}

/// Builder for [`LocalBucket`].
#[derive(Debug)]
pub struct LocalBucketBuilder {
    configuration: BucketConfiguration,
    clock: Arc<dyn Clock>,
    listener: SharedSink,
}

impl LocalBucketBuilder {
    /// Use `clock` instead of [`SystemClock`].
    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn listener(mut self, listener: SharedSink) -> Self {
        self.listener = listener;
        self
    }

    pub fn build<S: StateHolder>(self) -> Result<LocalBucket<S>, ConfigurationError> {
        check_clock(&self.configuration, self.clock.as_ref())?;
        let state = RemoteBucketState::new(self.configuration, self.clock.now_nanos());
        Ok(LocalBucket { state: S::new(state), clock: self.clock, listener: self.listener })
    }

    pub fn lock_free(self) -> Result<LockFreeBucket, ConfigurationError> {
        self.build()
    }

    pub fn locked(self) -> Result<LockedBucket, ConfigurationError> {
        self.build()
    }
}

fn check_clock(configuration: &BucketConfiguration, clock: &dyn Clock) -> Result<(), ConfigurationError> {
    if configuration.has_aligned_refill() && !clock.is_wall_clock_based() {
        return Err(ConfigurationError::WallClockRequired);
    }
    Ok(())
}

pub(crate) fn check_tokens(tokens: i64) -> Result<(), BucketError> {
    if tokens <= 0 {
        return Err(BucketError::InvalidTokens(tokens));
    }
    Ok(())
}

impl LocalBucket<LockFreeState> {
    pub fn builder(configuration: BucketConfiguration) -> LocalBucketBuilder {
        LocalBucketBuilder { configuration, clock: Arc::new(SystemClock), listener: null_sink() }
    }
}

impl<S: StateHolder> LocalBucket<S> {
    fn now(&self) -> i64 {
        self.clock.now_nanos()
    }

    fn emit(&self, event: BucketEvent) {
        self.listener.on_event(event);
    }

    fn report(&self, consumed: bool, tokens: i64) {
        if consumed {
            self.emit(BucketEvent::Consumed { tokens });
        } else {
            self.emit(BucketEvent::Rejected { tokens });
        }
    }

    pub fn try_consume(&self, tokens: i64) -> Result<bool, BucketError> {
        check_tokens(tokens)?;
        let now = self.now();
        let consumed = self.state.update(|state| {
            let consumed = state.try_consume(tokens, now);
            (consumed, consumed)
        });
        self.report(consumed, tokens);
        Ok(consumed)
    }

    pub fn consume(&self, tokens: i64) -> Result<ConsumeOutcome, BucketError> {
        check_tokens(tokens)?;
        let now = self.now();
        let outcome = self.state.update(|state| {
            let outcome = state.consume(tokens, now);
            let consumed = outcome.is_consumed();
            (outcome, consumed)
        });
        self.report(outcome.is_consumed(), tokens);
        Ok(outcome)
    }

    pub fn try_consume_and_return_remaining(&self, tokens: i64) -> Result<ConsumptionProbe, BucketError> {
        check_tokens(tokens)?;
        let now = self.now();
        let probe = self.state.update(|state| {
            let probe = state.try_consume_and_return_remaining(tokens, now);
            (probe, probe.consumed)
        });
        self.report(probe.consumed, tokens);
        Ok(probe)
    }

    /// Take up to `limit` tokens; returns how many were taken.
    pub fn consume_as_much_as_possible(&self, limit: i64) -> Result<i64, BucketError> {
        check_tokens(limit)?;
        let now = self.now();
        let taken = self.state.update(|state| {
            let taken = state.consume_as_much_as_possible(limit, now);
            (taken, taken > 0)
        });
        if taken > 0 {
            self.emit(BucketEvent::Consumed { tokens: taken });
        }
        Ok(taken)
    }

    pub fn estimate_ability_to_consume(&self, tokens: i64) -> Result<EstimationProbe, BucketError> {
        check_tokens(tokens)?;
        let now = self.now();
        Ok(self.state.read(|state| state.estimate_ability_to_consume(tokens, now)))
    }

    pub fn available_tokens(&self) -> i64 {
        let now = self.now();
        self.state.read(|state| state.available_tokens(now))
    }

    /// Add tokens, capped at each bandwidth's capacity.
    pub fn add_tokens(&self, tokens: i64) -> Result<(), BucketError> {
        check_tokens(tokens)?;
        let now = self.now();
        self.state.update(|state| (state.add_tokens(tokens, now), true));
        Ok(())
    }

    /// Add tokens, allowing the balance to exceed capacity.
    pub fn force_add_tokens(&self, tokens: i64) -> Result<(), BucketError> {
        check_tokens(tokens)?;
        let now = self.now();
        self.state.update(|state| (state.force_add_tokens(tokens, now), true));
        Ok(())
    }

    /// Consume regardless of availability; returns the tokens that were not covered.
    pub fn consume_ignoring_rate_limits(&self, tokens: i64) -> Result<i64, BucketError> {
        check_tokens(tokens)?;
        let now = self.now();
        let overdraft = self.state.update(|state| (state.consume_ignoring_rate_limits(tokens, now), true));
        self.emit(BucketEvent::Consumed { tokens });
        Ok(overdraft)
    }

    pub fn reset(&self) {
        let now = self.now();
        self.state.update(|state| (state.reset(now), true));
    }

    /// Swap the configuration; returns the previous one.
    pub fn replace_configuration(
        &self,
        configuration: BucketConfiguration,
        strategy: TokensInheritanceStrategy,
    ) -> Result<BucketConfiguration, ConfigurationError> {
        check_clock(&configuration, self.clock.as_ref())?;
        let now = self.now();
        Ok(self
            .state
            .update(|state| (state.replace_configuration(configuration.clone(), strategy, now), true)))
    }

    pub fn configuration(&self) -> BucketConfiguration {
        self.state.read(|state| state.configuration().clone())
    }

    pub fn snapshot(&self) -> RemoteBucketState {
        self.state.read(RemoteBucketState::clone)
    }

    /// Run a protocol command against this bucket.
    pub fn execute(&self, command: &RemoteCommand) -> CommandResult {
        let now = self.now();
        self.state.update(|state| {
            let mut entry = BucketEntry::new(Some(state.clone()));
            let result = command.execute(&mut entry, now);
            let modified = entry.is_modified();
            if let Some(next) = entry.into_state().filter(|_| modified) {
                *state = next;
            }
            (result, modified)
        })
    }

    /// Reserve `tokens` if they become available within `max_wait`.
    ///
    /// Returns how long to wait before the tokens may be used, or `None` when nothing was
    /// reserved.
    pub fn try_reserve(&self, tokens: i64, max_wait: Duration) -> Result<Option<Duration>, BucketError> {
        check_tokens(tokens)?;
        Ok(self.reserve(tokens, duration_to_nanos(max_wait)).map(nanos_to_duration))
    }

    fn reserve(&self, tokens: i64, max_wait_nanos: i64) -> Option<i64> {
        let now = self.now();
        let delay = self.state.update(|state| {
            let delay = state.reserve(tokens, max_wait_nanos, now);
            (delay, delay != i64::MAX)
        });
        let reserved = delay != i64::MAX;
        self.report(reserved, tokens);
        reserved.then_some(delay)
    }

    fn reserve_unbounded(&self, tokens: i64) -> Result<i64, BucketError> {
        check_tokens(tokens)?;
        self.reserve(tokens, i64::MAX).ok_or(BucketError::ReservationOverflow { tokens })
    }

    fn park(&self, tokens: i64, nanos: i64, parker: &dyn BlockingStrategy) -> Result<(), BucketError> {
        if nanos <= 0 {
            return Ok(());
        }
        self.emit(BucketEvent::Parked { nanos });
        parker.park(nanos).map_err(|_| {
            self.emit(BucketEvent::Interrupted { tokens });
            BucketError::Interrupted { tokens }
        })
    }

    async fn sleep(&self, nanos: i64, sleeper: &dyn Sleeper) {
        if nanos > 0 {
            self.emit(BucketEvent::Delayed { nanos });
            sleeper.sleep(nanos_to_duration(nanos)).await;
        }
    }

    /// Reserve `tokens` and block until they are available.
    ///
    /// An interrupt leaves the reservation consumed.
    pub fn consume_blocking(&self, tokens: i64, parker: &dyn BlockingStrategy) -> Result<(), BucketError> {
        let delay = self.reserve_unbounded(tokens)?;
        self.park(tokens, delay, parker)
    }

    /// Like [`consume_blocking`](Self::consume_blocking), giving up when the wait would exceed
    /// `max_wait`.
    pub fn try_consume_blocking(
        &self,
        tokens: i64,
        max_wait: Duration,
        parker: &dyn BlockingStrategy,
    ) -> Result<bool, BucketError> {
        check_tokens(tokens)?;
        match self.reserve(tokens, duration_to_nanos(max_wait)) {
            None => Ok(false),
            Some(delay) => self.park(tokens, delay, parker).map(|_| true),
        }
    }

    /// Reserve `tokens` and sleep until they are available.
    pub async fn consume_async(&self, tokens: i64, sleeper: &dyn Sleeper) -> Result<(), BucketError> {
        let delay = self.reserve_unbounded(tokens)?;
        self.sleep(delay, sleeper).await;
        Ok(())
    }

    /// Like [`consume_async`](Self::consume_async), giving up when the wait would exceed
    /// `max_wait`.
    pub async fn try_consume_async(
        &self,
        tokens: i64,
        max_wait: Duration,
        sleeper: &dyn Sleeper,
    ) -> Result<bool, BucketError> {
        check_tokens(tokens)?;
        match self.reserve(tokens, duration_to_nanos(max_wait)) {
            None => Ok(false),
            Some(delay) => {
                self.sleep(delay, sleeper).await;
                Ok(true)
            }
        }
    }
}
