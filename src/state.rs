//! Per-bandwidth token state and the refill/delay arithmetic behind every bucket.
//!
//! A [`BucketState`] holds one [`BandwidthState`] slot per bandwidth of the owning
//! configuration, in the same order. It never stores the configuration itself; callers pass
//! the bandwidth slice in. All time values are nanoseconds on the caller's clock.
//!
//! Intermediate products are widened to `i128` so nothing wraps; results that do not fit
//! back into `i64` saturate (to capacity for token counts, to `i64::MAX` for delays).

use serde::{Deserialize, Serialize};

use crate::bandwidth::Bandwidth;
use crate::config::{BucketConfiguration, TokensInheritanceStrategy};

/// Token balance of a single bandwidth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthState {
    /// Current tokens. Negative only after a reservation.
    pub tokens: i64,
    /// Time the refill was last applied up to.
    pub last_refill_nanos: i64,
    /// Fractional refill carried between calls, in `tokens * nanos` units (always `< period`).
    pub rounding_error: i64,
}

/// Mutable, cheaply cloned token state of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketState {
    slots: Vec<BandwidthState>,
}

impl BucketState {
    /// Fresh state for `config` at `now`.
    pub fn initial(config: &BucketConfiguration, now: i64) -> Self {
        Self { slots: config.bandwidths().iter().map(|b| initial_slot(b, now)).collect() }
    }

    pub(crate) fn from_slots(slots: Vec<BandwidthState>) -> Self {
        Self { slots }
    }

    pub fn slots(&self) -> &[BandwidthState] {
        &self.slots
    }

    /// Tokens of the bandwidth at `index`.
    pub fn tokens(&self, index: usize) -> Option<i64> {
        self.slots.get(index).map(|s| s.tokens)
    }

    /// Apply refill for every bandwidth up to `now`.
    ///
    /// A `now` earlier than the last refill is ignored.
    pub fn refill_all(&mut self, bandwidths: &[Bandwidth], now: i64) {
        for (bandwidth, slot) in bandwidths.iter().zip(self.slots.iter_mut()) {
            refill(bandwidth, slot, now);
        }
    }

    /// Minimum token count across all bandwidths.
    pub fn available_tokens(&self) -> i64 {
        self.slots.iter().map(|s| s.tokens).min().unwrap_or(0)
    }

    /// Subtract `tokens` from every bandwidth without checking availability.
    pub fn consume(&mut self, tokens: i64) {
        for slot in &mut self.slots {
            slot.tokens = slot.tokens.saturating_sub(tokens);
        }
    }

    /// Add `tokens` to every bandwidth, capped at capacity.
    pub fn add_tokens(&mut self, bandwidths: &[Bandwidth], tokens: i64) {
        for (bandwidth, slot) in bandwidths.iter().zip(self.slots.iter_mut()) {
            let new_size = slot.tokens.saturating_add(tokens);
            if new_size >= bandwidth.capacity() {
                slot.tokens = bandwidth.capacity();
                slot.rounding_error = 0;
            } else {
                slot.tokens = new_size;
            }
        }
    }

    /// Add `tokens` to every bandwidth, allowing the balance to exceed capacity.
    pub fn force_add_tokens(&mut self, bandwidths: &[Bandwidth], tokens: i64) {
        for (bandwidth, slot) in bandwidths.iter().zip(self.slots.iter_mut()) {
            slot.tokens = slot.tokens.saturating_add(tokens);
            if slot.tokens >= bandwidth.capacity() {
                slot.rounding_error = 0;
            }
        }
    }

    /// Subtract `tokens` with a floor at zero. A balance that is already negative is left alone.
    ///
    /// Returns the largest number of tokens written off in any bandwidth.
    pub fn consume_ignoring_rate_limits(&mut self, tokens: i64) -> i64 {
        let mut overdraft = 0i64;
        for slot in &mut self.slots {
            let current = slot.tokens;
            let new_size = current.saturating_sub(tokens).max(current.min(0));
            let applied = i128::from(current) - i128::from(new_size);
            let written_off = clamp_i64(i128::from(tokens) - applied);
            overdraft = overdraft.max(written_off);
            slot.tokens = new_size;
        }
        overdraft
    }

    /// Nanoseconds until `tokens` can be consumed, for a state already refilled to `now`.
    ///
    /// `0` when available right away, `i64::MAX` when `tokens` exceeds some capacity and can
    /// never be satisfied.
    pub fn delay_nanos_to_consume(&self, bandwidths: &[Bandwidth], tokens: i64, now: i64) -> i64 {
        let mut delay = 0i64;
        for (bandwidth, slot) in bandwidths.iter().zip(self.slots.iter()) {
            if tokens > bandwidth.capacity() {
                return i64::MAX;
            }
            delay = delay.max(delay_for(bandwidth, slot, tokens, now));
        }
        delay
    }

    /// Nanoseconds until every bandwidth is back at capacity, for a state refilled to `now`.
    pub fn nanos_to_full_refill(&self, bandwidths: &[Bandwidth], now: i64) -> i64 {
        bandwidths
            .iter()
            .zip(self.slots.iter())
            .map(|(bandwidth, slot)| delay_for(bandwidth, slot, bandwidth.capacity(), now))
            .max()
            .unwrap_or(0)
    }

    /// Build the state for `new` from this state under `previous`, already refilled to `now`.
    ///
    /// New bandwidths are matched to old ones by id when the new configuration uses ids,
    /// otherwise by index when both have the same number of bandwidths. Unmatched bandwidths
    /// start fresh.
    pub fn replace_configuration(
        &self,
        previous: &BucketConfiguration,
        new: &BucketConfiguration,
        strategy: TokensInheritanceStrategy,
        now: i64,
    ) -> BucketState {
        let by_id = new.has_ids();
        let slots = new
            .bandwidths()
            .iter()
            .enumerate()
            .map(|(index, new_bandwidth)| {
                let fresh = initial_slot(new_bandwidth, now);
                if strategy == TokensInheritanceStrategy::Reset {
                    return fresh;
                }
                let matched = if by_id {
                    new_bandwidth.id().and_then(|id| previous.index_of(id))
                } else if previous.len() == new.len() {
                    Some(index)
                } else {
                    None
                };
                match matched.and_then(|j| Some((previous.bandwidths().get(j)?, self.slots.get(j)?))) {
                    Some((old_bandwidth, old_slot)) => {
                        inherit(old_bandwidth, old_slot, new_bandwidth, fresh, strategy)
                    }
                    None => fresh,
                }
            })
            .collect();
        BucketState { slots }
    }
}

fn inherit(
    old_bandwidth: &Bandwidth,
    old: &BandwidthState,
    new_bandwidth: &Bandwidth,
    fresh: BandwidthState,
    strategy: TokensInheritanceStrategy,
) -> BandwidthState {
    let capacity = new_bandwidth.capacity();
    let tokens = match strategy {
        TokensInheritanceStrategy::Reset => fresh.tokens,
        TokensInheritanceStrategy::AsIs => old.tokens.min(capacity),
        TokensInheritanceStrategy::Proportionally => {
            let scaled = (i128::from(old.tokens) * i128::from(capacity))
                .div_euclid(i128::from(old_bandwidth.capacity()));
            clamp_i64(scaled).min(capacity)
        }
        TokensInheritanceStrategy::Additive => {
            old.tokens.saturating_add(new_bandwidth.initial_tokens()).min(capacity)
        }
    };
    let same_refill = old_bandwidth.refill_period_nanos() == new_bandwidth.refill_period_nanos()
        && old_bandwidth.refill_tokens() == new_bandwidth.refill_tokens()
        && old_bandwidth.is_refill_intervally() == new_bandwidth.is_refill_intervally()
        && old_bandwidth.time_of_first_refill_millis() == new_bandwidth.time_of_first_refill_millis();
    if same_refill {
        BandwidthState {
            tokens,
            last_refill_nanos: old.last_refill_nanos,
            rounding_error: if tokens >= capacity { 0 } else { old.rounding_error },
        }
    } else {
        BandwidthState { tokens, last_refill_nanos: fresh.last_refill_nanos, rounding_error: 0 }
    }
}

fn initial_slot(bandwidth: &Bandwidth, now: i64) -> BandwidthState {
    BandwidthState {
        tokens: initial_tokens(bandwidth, now),
        last_refill_nanos: initial_last_refill(bandwidth, now),
        rounding_error: 0,
    }
}

fn first_refill_nanos(bandwidth: &Bandwidth) -> Option<i64> {
    bandwidth.time_of_first_refill_millis().map(|millis| millis.saturating_mul(1_000_000))
}

/// Aligned bandwidths pretend the previous refill happened one period before the first one.
fn initial_last_refill(bandwidth: &Bandwidth, now: i64) -> i64 {
    match first_refill_nanos(bandwidth) {
        Some(first) => first.saturating_sub(bandwidth.refill_period_nanos()),
        None => now,
    }
}

fn initial_tokens(bandwidth: &Bandwidth, now: i64) -> i64 {
    let first = match first_refill_nanos(bandwidth) {
        Some(first) if bandwidth.is_use_adaptive_initial_tokens() && now < first => first,
        _ => return bandwidth.initial_tokens(),
    };
    let guaranteed_base = (bandwidth.capacity() - bandwidth.refill_tokens()).max(0);
    let nanos_before_first_refill = i128::from(first) - i128::from(now);
    let proportional = nanos_before_first_refill * i128::from(bandwidth.refill_tokens())
        / i128::from(bandwidth.refill_period_nanos());
    clamp_i64(i128::from(guaranteed_base) + proportional).min(bandwidth.capacity())
}

fn refill(bandwidth: &Bandwidth, slot: &mut BandwidthState, now: i64) {
    let period = i128::from(bandwidth.refill_period_nanos());
    let mut elapsed = i128::from(now) - i128::from(slot.last_refill_nanos);
    if elapsed <= 0 {
        return;
    }
    if bandwidth.is_refill_intervally() {
        elapsed -= elapsed % period;
        if elapsed == 0 {
            return;
        }
    }
    slot.last_refill_nanos = clamp_i64(i128::from(slot.last_refill_nanos) + elapsed);

    let capacity = bandwidth.capacity();
    if slot.tokens >= capacity {
        // Possible after force-add.
        return;
    }

    let refill_tokens = i128::from(bandwidth.refill_tokens());
    let (added, rounding_error) = if bandwidth.is_refill_intervally() {
        (elapsed / period * refill_tokens, 0)
    } else {
        let divided = elapsed * refill_tokens + i128::from(slot.rounding_error);
        (divided / period, divided % period)
    };

    let new_size = i128::from(slot.tokens) + added;
    if new_size >= i128::from(capacity) {
        slot.tokens = capacity;
        slot.rounding_error = 0;
    } else {
        slot.tokens = clamp_i64(new_size);
        slot.rounding_error = clamp_i64(rounding_error);
    }
}

fn delay_for(bandwidth: &Bandwidth, slot: &BandwidthState, tokens: i64, now: i64) -> i64 {
    if tokens <= slot.tokens {
        return 0;
    }
    let deficit = i128::from(tokens) - i128::from(slot.tokens);
    let period = i128::from(bandwidth.refill_period_nanos());
    let refill_tokens = i128::from(bandwidth.refill_tokens());

    if bandwidth.is_refill_intervally() {
        let next_refill = i128::from(slot.last_refill_nanos) + period;
        let wait_for_next = (next_refill - i128::from(now)).max(0);
        let remaining = deficit - refill_tokens;
        if remaining <= 0 {
            return clamp_i64(wait_for_next);
        }
        let periods = (remaining + refill_tokens - 1) / refill_tokens;
        clamp_i64(wait_for_next + periods * period)
    } else {
        let numerator = deficit * period - i128::from(slot.rounding_error);
        clamp_i64((numerator + refill_tokens - 1) / refill_tokens)
    }
}

pub(crate) fn clamp_i64(value: i128) -> i64 {
    i64::try_from(value).unwrap_or(if value < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::time::{Duration, UNIX_EPOCH};

    const SECOND: i64 = 1_000_000_000;

    fn config(bandwidths: Vec<Bandwidth>) -> BucketConfiguration {
        BucketConfiguration::new(bandwidths).unwrap()
    }

    fn greedy(capacity: i64, tokens: i64, period_secs: u64) -> Bandwidth {
        Bandwidth::greedy(capacity, tokens, Duration::from_secs(period_secs)).unwrap()
    }

    fn empty(bandwidth: Bandwidth) -> Bandwidth {
        bandwidth.with_initial_tokens(0).unwrap()
    }

    #[test]
    fn greedy_refill_carries_fractional_tokens() {
        // 3 tokens per 10 seconds: one token every 3.33s.
        let cfg = config(vec![empty(greedy(100, 3, 10))]);
        let mut state = BucketState::initial(&cfg, 0);

        state.refill_all(cfg.bandwidths(), 2 * SECOND);
        assert_eq!(state.available_tokens(), 0);
        state.refill_all(cfg.bandwidths(), 4 * SECOND);
        // 12 token-seconds accumulated over two calls without truncation loss.
        assert_eq!(state.available_tokens(), 1);
        state.refill_all(cfg.bandwidths(), 10 * SECOND);
        assert_eq!(state.available_tokens(), 3);
        assert_eq!(state.slots()[0].rounding_error, 0);
    }

    #[test]
    fn refill_is_capped_at_capacity() {
        let cfg = config(vec![empty(greedy(10, 10, 1))]);
        let mut state = BucketState::initial(&cfg, 0);
        state.refill_all(cfg.bandwidths(), 3_600 * SECOND);
        assert_eq!(state.available_tokens(), 10);
    }

    #[test]
    fn clock_regression_is_a_noop() {
        let cfg = config(vec![empty(greedy(10, 10, 1))]);
        let mut state = BucketState::initial(&cfg, 5 * SECOND);
        let before = state.clone();
        state.refill_all(cfg.bandwidths(), SECOND);
        assert_eq!(state, before);
    }

    #[test]
    fn huge_elapsed_time_saturates_to_capacity() {
        let huge = Bandwidth::greedy(i64::MAX / 2, i64::MAX / 4, Duration::from_nanos(1)).unwrap();
        let cfg = config(vec![empty(huge)]);
        let mut state = BucketState::initial(&cfg, i64::MIN / 2);
        state.refill_all(cfg.bandwidths(), i64::MAX / 2);
        assert_eq!(state.available_tokens(), i64::MAX / 2);
    }

    #[test]
    fn intervally_refill_drops_incomplete_period() {
        let cfg = config(vec![empty(Bandwidth::intervally(100, 10, Duration::from_secs(60)).unwrap())]);
        let mut state = BucketState::initial(&cfg, 0);

        state.refill_all(cfg.bandwidths(), 59 * SECOND);
        assert_eq!(state.available_tokens(), 0);
        state.refill_all(cfg.bandwidths(), 61 * SECOND);
        assert_eq!(state.available_tokens(), 10);
        // Period boundary stays at 60s, not at the time of the call.
        assert_eq!(state.slots()[0].last_refill_nanos, 60 * SECOND);
        state.refill_all(cfg.bandwidths(), 179 * SECOND);
        assert_eq!(state.available_tokens(), 20);
    }

    #[test]
    fn aligned_refill_happens_at_first_refill_time() {
        let first = UNIX_EPOCH + Duration::from_secs(1_000);
        let bandwidth = Bandwidth::intervally_aligned(10, 10, Duration::from_secs(60), first, false)
            .unwrap()
            .with_initial_tokens(0)
            .unwrap();
        let cfg = config(vec![bandwidth]);
        let mut state = BucketState::initial(&cfg, 970 * SECOND);

        state.refill_all(cfg.bandwidths(), 999 * SECOND);
        assert_eq!(state.available_tokens(), 0);
        assert_eq!(state.delay_nanos_to_consume(cfg.bandwidths(), 5, 999 * SECOND), SECOND);
        state.refill_all(cfg.bandwidths(), 1_000 * SECOND);
        assert_eq!(state.available_tokens(), 10);
    }

    #[test]
    fn adaptive_initial_tokens_before_first_refill() {
        let first = UNIX_EPOCH + Duration::from_secs(100);
        let bandwidth =
            Bandwidth::intervally_aligned(400, 300, Duration::from_secs(60), first, true).unwrap();
        let cfg = config(vec![bandwidth]);
        // 30s before the first refill: base 100 + 30/60 * 300.
        let state = BucketState::initial(&cfg, 70 * SECOND);
        assert_eq!(state.available_tokens(), 250);
        // After the first refill the configured initial tokens apply.
        let state = BucketState::initial(&cfg, 200 * SECOND);
        assert_eq!(state.available_tokens(), 400);
    }

    #[test]
    fn available_tokens_is_minimum_across_bandwidths() {
        let cfg = config(vec![greedy(10, 10, 1), greedy(100, 100, 60)]);
        let mut state = BucketState::initial(&cfg, 0);
        assert_eq!(state.available_tokens(), 10);
        state.consume(4);
        assert_eq!(state.tokens(0), Some(6));
        assert_eq!(state.tokens(1), Some(96));
    }

    #[test]
    fn greedy_delay_accounts_for_rounding_error() {
        let cfg = config(vec![empty(greedy(10, 1, 3))]);
        let mut state = BucketState::initial(&cfg, 0);
        state.refill_all(cfg.bandwidths(), SECOND);
        assert_eq!(state.delay_nanos_to_consume(cfg.bandwidths(), 1, SECOND), 2 * SECOND);
        assert_eq!(state.delay_nanos_to_consume(cfg.bandwidths(), 2, SECOND), 5 * SECOND);

        // Waiting exactly the reported delay is always enough.
        let delay = state.delay_nanos_to_consume(cfg.bandwidths(), 2, SECOND);
        state.refill_all(cfg.bandwidths(), SECOND + delay);
        assert_eq!(state.available_tokens(), 2);
    }

    #[test]
    fn intervally_delay_waits_for_whole_periods() {
        let cfg = config(vec![empty(Bandwidth::intervally(100, 10, Duration::from_secs(60)).unwrap())]);
        let mut state = BucketState::initial(&cfg, 0);
        state.refill_all(cfg.bandwidths(), 20 * SECOND);
        let bws = cfg.bandwidths();
        assert_eq!(state.delay_nanos_to_consume(bws, 10, 20 * SECOND), 40 * SECOND);
        assert_eq!(state.delay_nanos_to_consume(bws, 11, 20 * SECOND), 100 * SECOND);
        assert_eq!(state.delay_nanos_to_consume(bws, 30, 20 * SECOND), 160 * SECOND);
    }

    #[test]
    fn delay_is_max_when_request_exceeds_capacity() {
        let cfg = config(vec![greedy(10, 1, 1), greedy(5, 1, 1)]);
        let state = BucketState::initial(&cfg, 0);
        assert_eq!(state.delay_nanos_to_consume(cfg.bandwidths(), 6, 0), i64::MAX);
        assert_eq!(state.delay_nanos_to_consume(cfg.bandwidths(), 5, 0), 0);
    }

    #[test]
    fn delay_is_maximum_over_short_bandwidths() {
        let cfg = config(vec![empty(greedy(10, 10, 1)), empty(greedy(10, 1, 1))]);
        let state = BucketState::initial(&cfg, 0);
        assert_eq!(state.delay_nanos_to_consume(cfg.bandwidths(), 2, 0), 2 * SECOND);
        assert_eq!(state.nanos_to_full_refill(cfg.bandwidths(), 0), 10 * SECOND);
    }

    #[test]
    fn reservation_deficit_is_covered_by_future_refill() {
        let cfg = config(vec![greedy(10, 10, 10)]);
        let mut state = BucketState::initial(&cfg, 0);
        state.consume(15);
        assert_eq!(state.available_tokens(), -5);
        assert_eq!(state.delay_nanos_to_consume(cfg.bandwidths(), 1, 0), 6 * SECOND);
        state.refill_all(cfg.bandwidths(), 5 * SECOND);
        assert_eq!(state.available_tokens(), 0);
    }

    #[test]
    fn add_tokens_caps_and_force_add_does_not() {
        let cfg = config(vec![empty(greedy(10, 1, 1))]);
        let mut state = BucketState::initial(&cfg, 0);
        state.add_tokens(cfg.bandwidths(), 7);
        assert_eq!(state.available_tokens(), 7);
        state.add_tokens(cfg.bandwidths(), 7);
        assert_eq!(state.available_tokens(), 10);
        state.force_add_tokens(cfg.bandwidths(), 7);
        assert_eq!(state.available_tokens(), 17);
        // Refill leaves an over-capacity balance alone.
        state.refill_all(cfg.bandwidths(), 100 * SECOND);
        assert_eq!(state.available_tokens(), 17);
    }

    #[test]
    fn consume_ignoring_rate_limits_floors_at_zero() {
        let cfg = config(vec![greedy(10, 1, 1), greedy(3, 1, 1)]);
        let mut state = BucketState::initial(&cfg, 0);
        let overdraft = state.consume_ignoring_rate_limits(5);
        assert_eq!(state.tokens(0), Some(5));
        assert_eq!(state.tokens(1), Some(0));
        assert_eq!(overdraft, 2);

        // An already negative balance is not deepened.
        let mut reserved = BucketState::initial(&cfg, 0);
        reserved.consume(13);
        let overdraft = reserved.consume_ignoring_rate_limits(4);
        assert_eq!(reserved.tokens(1), Some(-10));
        assert_eq!(reserved.tokens(0), Some(-3));
        assert_eq!(overdraft, 4);
    }

    #[test]
    fn replace_configuration_strategies() {
        let old = config(vec![greedy(100, 10, 1)]);
        let new = config(vec![greedy(200, 10, 1).with_initial_tokens(50).unwrap()]);
        let mut state = BucketState::initial(&old, 0);
        state.consume(40);

        let replaced = |strategy| state.replace_configuration(&old, &new, strategy, 0).tokens(0);
        assert_eq!(replaced(TokensInheritanceStrategy::Reset), Some(50));
        assert_eq!(replaced(TokensInheritanceStrategy::AsIs), Some(60));
        assert_eq!(replaced(TokensInheritanceStrategy::Proportionally), Some(120));
        assert_eq!(replaced(TokensInheritanceStrategy::Additive), Some(110));

        let smaller = config(vec![greedy(30, 10, 1)]);
        let capped = state.replace_configuration(&old, &smaller, TokensInheritanceStrategy::AsIs, 0);
        assert_eq!(capped.tokens(0), Some(30));
    }

    #[test]
    fn replace_configuration_matches_by_id_then_by_index() {
        let old = config(vec![
            greedy(10, 1, 1).with_id("burst").unwrap(),
            greedy(100, 1, 1).with_id("sustained").unwrap(),
        ]);
        let mut state = BucketState::initial(&old, 0);
        state.consume(5);

        let reordered = config(vec![
            greedy(100, 1, 1).with_id("sustained").unwrap(),
            greedy(50, 1, 1).with_id("new").unwrap(),
        ]);
        let next = state.replace_configuration(&old, &reordered, TokensInheritanceStrategy::AsIs, 0);
        assert_eq!(next.tokens(0), Some(95));
        assert_eq!(next.tokens(1), Some(50));

        // Without ids and with a different count nothing matches.
        let anonymous = config(vec![greedy(10, 1, 1), greedy(20, 1, 1), greedy(30, 1, 1)]);
        let plain = config(vec![greedy(10, 1, 1)]);
        let mut state = BucketState::initial(&plain, 0);
        state.consume(10);
        let next = state.replace_configuration(&plain, &anonymous, TokensInheritanceStrategy::AsIs, 0);
        assert_eq!(next.available_tokens(), 10);
    }

    #[test]
    fn refill_is_monotonic_and_split_additive() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for _ in 0..500 {
            let capacity = rng.random_range(1..1_000_000i64);
            let tokens = rng.random_range(1..1_000i64);
            let period = rng.random_range(1..10_000_000_000i64);
            let intervally = rng.random_bool(0.3);
            let bandwidth = if intervally {
                Bandwidth::intervally(capacity, tokens, Duration::from_nanos(period as u64))
            } else {
                Bandwidth::greedy(capacity, tokens, Duration::from_nanos(period as u64))
            }
            .unwrap()
            .with_initial_tokens(0)
            .unwrap();
            let cfg = config(vec![bandwidth]);
            let t1 = rng.random_range(0..period * 3);
            let t2 = rng.random_range(0..period * 3);

            let mut split = BucketState::initial(&cfg, 0);
            split.refill_all(cfg.bandwidths(), t1);
            let after_first = split.available_tokens();
            assert!(after_first >= 0);
            split.refill_all(cfg.bandwidths(), t1 + t2);
            assert!(split.available_tokens() >= after_first);
            assert!(split.available_tokens() <= capacity);

            let mut once = BucketState::initial(&cfg, 0);
            once.refill_all(cfg.bandwidths(), t1 + t2);
            assert_eq!(split.available_tokens(), once.available_tokens());
        }
    }
}
