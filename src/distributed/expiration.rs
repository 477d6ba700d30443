//! Time-to-live policies applied to stored buckets on every write.

use std::time::Duration;

use crate::remote_state::RemoteBucketState;

const NANOS_PER_MILLI: i64 = 1_000_000;

/// How long storage should keep a bucket after each write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpirationAfterWriteStrategy {
    /// Keep forever.
    #[default]
    None,
    /// Keep for a fixed time after every write.
    FixedTtl(Duration),
    /// Keep until the bucket would be full again, plus `keep_after_refill`.
    ///
    /// A full bucket is indistinguishable from a fresh one, so dropping it then loses nothing.
    BasedOnTimeForRefillingBucketUpToMax(Duration),
}

impl ExpirationAfterWriteStrategy {
    /// Time to live in milliseconds, or `-1` for "never expires".
    pub fn calculate_time_to_live_millis(&self, state: &RemoteBucketState, now_nanos: i64) -> i64 {
        match self {
            ExpirationAfterWriteStrategy::None => -1,
            ExpirationAfterWriteStrategy::FixedTtl(ttl) => millis(*ttl),
            ExpirationAfterWriteStrategy::BasedOnTimeForRefillingBucketUpToMax(keep) => {
                let to_full_refill = state.nanos_to_full_refill(now_nanos) / NANOS_PER_MILLI;
                millis(*keep).saturating_add(to_full_refill).max(1)
            }
        }
    }

    /// Absolute expiry in epoch milliseconds, if the bucket expires at all.
    pub fn expires_at_millis(&self, state: &RemoteBucketState, now_nanos: i64) -> Option<i64> {
        let ttl = self.calculate_time_to_live_millis(state, now_nanos);
        (ttl >= 0).then(|| (now_nanos / NANOS_PER_MILLI).saturating_add(ttl))
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
