//! Clock abstractions used by buckets, proxies and optimizers.
//!
//! Every timestamp in this crate is an `i64` count of nanoseconds. Distributed buckets must
//! share one timeline across processes, so the default there is [`SystemClock`] (nanoseconds
//! since the Unix epoch). Local buckets may use the cheaper [`MonotonicClock`].

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Clock abstraction so timing can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current time in nanoseconds.
    fn now_nanos(&self) -> i64;

    /// Whether `now_nanos` is measured from the Unix epoch.
    ///
    /// Aligned refill computes period boundaries from wall-clock instants and needs this.
    fn is_wall_clock_based(&self) -> bool;
}

/// Wall clock: nanoseconds since the Unix epoch.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_nanos(&self) -> i64 {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        i64::try_from(since_epoch.as_nanos()).unwrap_or(i64::MAX)
    }

    fn is_wall_clock_based(&self) -> bool {
        true
    }
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Notes: resets when the process restarts, so it is only suitable for in-process buckets.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_nanos(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_nanos()).unwrap_or(i64::MAX)
    }

    fn is_wall_clock_based(&self) -> bool {
        false
    }
}

/// Manually driven clock for deterministic tests. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
    wall_clock: bool,
}

impl ManualClock {
    /// Clock starting at `nanos`.
    pub fn new(nanos: i64) -> Self {
        Self { now: Arc::new(AtomicI64::new(nanos)), wall_clock: false }
    }

    /// Clock that claims to be wall-clock based, for aligned-refill tests.
    pub fn wall_clock(nanos: i64) -> Self {
        Self { now: Arc::new(AtomicI64::new(nanos)), wall_clock: true }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.advance_nanos(i64::try_from(by.as_nanos()).unwrap_or(i64::MAX));
    }

    /// Move time forward by raw nanoseconds (negative values move it back).
    pub fn advance_nanos(&self, nanos: i64) {
        self.now.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Jump to an absolute time.
    pub fn set_nanos(&self, nanos: i64) {
        self.now.store(nanos, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }

    fn is_wall_clock_based(&self) -> bool {
        self.wall_clock
    }
}

/// Convert a duration to i64 nanoseconds, saturating at `i64::MAX`.
pub(crate) fn duration_to_nanos(duration: Duration) -> i64 {
    i64::try_from(duration.as_nanos()).unwrap_or(i64::MAX)
}

/// Convert non-negative nanoseconds back into a duration; negatives clamp to zero.
pub(crate) fn nanos_to_duration(nanos: i64) -> Duration {
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_shared_between_clones() {
        let clock = ManualClock::new(10);
        let other = clock.clone();
        clock.advance(Duration::from_nanos(5));
        assert_eq!(other.now_nanos(), 15);
        other.advance_nanos(-20);
        assert_eq!(clock.now_nanos(), -5);
    }

    #[test]
    fn system_clock_is_wall_based_and_monotonic_is_not() {
        assert!(SystemClock.is_wall_clock_based());
        assert!(SystemClock.now_nanos() > 1_600_000_000_000_000_000);
        assert!(!MonotonicClock::default().is_wall_clock_based());
    }

    #[test]
    fn duration_conversion_saturates() {
        assert_eq!(duration_to_nanos(Duration::MAX), i64::MAX);
        assert_eq!(nanos_to_duration(-1), Duration::ZERO);
        assert_eq!(nanos_to_duration(1_500), Duration::from_nanos(1_500));
    }
}
