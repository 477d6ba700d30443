//! Predictive synchronization: the local copy is charged with the consumption other nodes
//! are expected to make between syncs.

use std::collections::VecDeque;

use super::delay::DelayPolicy;
use super::synced::{Progress, SyncPolicy};
use super::{DelayParameters, PredictionParameters};
use crate::clock::duration_to_nanos;
use crate::command::RemoteCommand;
use crate::remote_state::RemoteBucketState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Sample {
    sync_nanos: i64,
    /// Consumption counter of the storage snapshot.
    observed_consumed: i64,
    /// Part of `observed_consumed` caused by this handle.
    self_consumed: i64,
}

/// Bounded window of sync observations used to estimate the consumption rate of other nodes.
#[derive(Debug, Clone)]
pub struct Sampling {
    min_samples: usize,
    max_samples: usize,
    max_age_nanos: i64,
    samples: VecDeque<Sample>,
    /// Tokens already charged to the local copy since the newest sample.
    speculated: i64,
}

impl Sampling {
    pub fn new(parameters: PredictionParameters) -> Self {
        Self {
            min_samples: parameters.min_samples(),
            max_samples: parameters.max_samples(),
            max_age_nanos: duration_to_nanos(parameters.sample_max_age()),
            samples: VecDeque::with_capacity(parameters.max_samples()),
            speculated: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Record a sync. A counter or clock that went backwards (a recreated bucket, a clock
    /// step) invalidates the window.
    pub fn add_sample(&mut self, sync_nanos: i64, observed_consumed: i64, self_consumed: i64) {
        if let Some(last) = self.samples.back() {
            if observed_consumed < last.observed_consumed
                || sync_nanos < last.sync_nanos
                || self_consumed < last.self_consumed
            {
                self.samples.clear();
            }
        }
        self.samples.push_back(Sample { sync_nanos, observed_consumed, self_consumed });
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
        self.speculated = 0;
    }

    fn prune(&mut self, now: i64) {
        while self
            .samples
            .front()
            .is_some_and(|sample| now.saturating_sub(sample.sync_nanos) > self.max_age_nanos)
        {
            self.samples.pop_front();
        }
    }

    /// Tokens consumed by others across the window, and the window length in nanos.
    fn observed(&mut self, now: i64) -> Option<(i64, i64)> {
        self.prune(now);
        if self.samples.len() < self.min_samples {
            return None;
        }
        let (oldest, newest) = (self.samples.front()?, self.samples.back()?);
        let elapsed = newest.sync_nanos.saturating_sub(oldest.sync_nanos);
        if elapsed <= 0 {
            return None;
        }
        let observed = newest.observed_consumed.saturating_sub(oldest.observed_consumed);
        let own = newest.self_consumed.saturating_sub(oldest.self_consumed);
        Some((observed.saturating_sub(own).max(0), elapsed))
    }

    /// Tokens per nanosecond consumed by others, or `None` when the window cannot tell.
    pub fn rate_per_nano(&mut self, now: i64) -> Option<f64> {
        let (others, elapsed) = self.observed(now)?;
        Some(others as f64 / elapsed as f64)
    }

    /// Consumption of others predicted since the newest sample.
    pub fn predicted_since_last_sync(&mut self, now: i64) -> Option<i64> {
        let (others, window) = self.observed(now)?;
        let newest = self.samples.back()?;
        let elapsed = now.saturating_sub(newest.sync_nanos).max(0);
        let predicted = i128::from(others) * i128::from(elapsed) / i128::from(window);
        Some(i64::try_from(predicted).unwrap_or(i64::MAX))
    }

    /// Predicted tokens not yet charged to the local copy; marks them as charged.
    pub fn take_speculation(&mut self, now: i64) -> i64 {
        let predicted = self.predicted_since_last_sync(now).unwrap_or(0);
        let fresh = predicted.saturating_sub(self.speculated).max(0);
        self.speculated = self.speculated.saturating_add(fresh);
        fresh
    }
}

pub(crate) struct PredictivePolicy {
    delay: DelayPolicy,
    sampling: Sampling,
}

impl PredictivePolicy {
    pub(crate) fn new(delay: DelayParameters, prediction: PredictionParameters) -> Self {
        Self { delay: DelayPolicy::new(delay), sampling: Sampling::new(prediction) }
    }
}

impl SyncPolicy for PredictivePolicy {
    fn may_run_locally(&mut self, progress: &Progress, command: &RemoteCommand, now: i64) -> bool {
        self.delay.within_thresholds(progress, command, now) && self.sampling.observed(now).is_some()
    }

    fn before_local_execution(&mut self, snapshot: &mut RemoteBucketState, now: i64) {
        let tokens = self.sampling.take_speculation(now);
        if tokens > 0 {
            snapshot.consume_ignoring_rate_limits(tokens, now);
        }
    }

    fn on_synced(&mut self, snapshot: &RemoteBucketState, self_in_snapshot: i64, now: i64) {
        self.sampling.add_sample(now, snapshot.consumed_tokens(), self_in_snapshot);
    }
}
