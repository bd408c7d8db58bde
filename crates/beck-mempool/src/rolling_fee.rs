//! Decaying admission floor.
//!
//! When size limiting evicts a package, the pool remembers that package's
//! feerate as the minimum worth accepting: admitting cheaper transactions
//! would only evict them again. The floor decays exponentially with a
//! 12-hour half-life once a block has arrived, and snaps to zero below half
//! the incremental relay fee so it cannot linger at a meaningless level.
//!
//! The floor is a threshold, not an ordering, so the decay factor may use
//! floating point; every comparator in this crate stays integer-exact.

use crate::feerate::FeeRate;

/// Decay half-life of the rolling floor in seconds.
pub const ROLLING_FEE_HALF_LIFE: i64 = 60 * 60 * 12;

#[derive(Debug)]
pub(crate) struct RollingFeeRate {
    /// Current floor in becks per kB. f64 so partial-half-life decay is
    /// smooth; reads round to a FeeRate.
    rate: f64,
    /// When the floor last decayed.
    last_update: i64,
    /// Decay is armed only once a block has arrived since the last bump.
    block_since_last_bump: bool,
}

impl RollingFeeRate {
    pub(crate) fn new() -> Self {
        Self { rate: 0.0, last_update: 0, block_since_last_bump: false }
    }

    /// Raise the floor to an evicted package's feerate.
    ///
    /// Returns true if the floor moved.
    pub(crate) fn track_package_removed(&mut self, rate: FeeRate) -> bool {
        if (rate.becks_per_kb() as f64) > self.rate {
            self.rate = rate.becks_per_kb() as f64;
            self.block_since_last_bump = false;
            true
        } else {
            false
        }
    }

    /// Arm decay and restart the decay clock: a new block means demand may
    /// have dropped.
    pub(crate) fn on_block_connected(&mut self, now: i64) {
        self.last_update = now;
        self.block_since_last_bump = true;
    }

    /// Current floor, decayed to `now`.
    ///
    /// The half-life shortens when the pool is well under its byte limit:
    /// a quarter of the half-life below 25% usage, half below 50%. Below
    /// half the incremental relay fee the floor snaps to zero; otherwise
    /// the incremental fee is the least the floor reports, bounding how
    /// finely eviction can ratchet admission.
    pub(crate) fn current(
        &mut self,
        now: i64,
        usage: u64,
        size_limit: u64,
        incremental: FeeRate,
    ) -> FeeRate {
        if !self.block_since_last_bump || self.rate == 0.0 {
            return FeeRate::from_becks_per_kb(self.rate.round() as u64);
        }

        if now > self.last_update + 10 {
            let mut half_life = ROLLING_FEE_HALF_LIFE as f64;
            if usage < size_limit / 4 {
                half_life /= 4.0;
            } else if usage < size_limit / 2 {
                half_life /= 2.0;
            }

            self.rate /= 2f64.powf((now - self.last_update) as f64 / half_life);
            self.last_update = now;

            if self.rate < incremental.becks_per_kb() as f64 / 2.0 {
                self.rate = 0.0;
                return FeeRate::ZERO;
            }
        }
        FeeRate::from_becks_per_kb(self.rate.round() as u64).max(incremental)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMIT: u64 = 1_000_000;
    const INCREMENTAL: FeeRate = FeeRate::ZERO;

    fn incremental(per_kb: u64) -> FeeRate {
        FeeRate::from_becks_per_kb(per_kb)
    }

    #[test]
    fn starts_at_zero() {
        let mut fee = RollingFeeRate::new();
        assert_eq!(fee.current(0, LIMIT, LIMIT, INCREMENTAL), FeeRate::ZERO);
    }

    #[test]
    fn bump_raises_floor() {
        let mut fee = RollingFeeRate::new();
        assert!(fee.track_package_removed(incremental(4000)));
        assert_eq!(
            fee.current(0, LIMIT, LIMIT, INCREMENTAL).becks_per_kb(),
            4000
        );
    }

    #[test]
    fn lower_eviction_does_not_lower_floor() {
        let mut fee = RollingFeeRate::new();
        fee.track_package_removed(incremental(4000));
        assert!(!fee.track_package_removed(incremental(1000)));
        assert_eq!(
            fee.current(0, LIMIT, LIMIT, INCREMENTAL).becks_per_kb(),
            4000
        );
    }

    #[test]
    fn no_decay_until_block_arrives() {
        let mut fee = RollingFeeRate::new();
        fee.track_package_removed(incremental(4000));

        // A week passes without a block: the floor holds.
        let rate = fee.current(7 * 24 * 3600, LIMIT, LIMIT, INCREMENTAL);
        assert_eq!(rate.becks_per_kb(), 4000);
    }

    #[test]
    fn halves_per_half_life() {
        let mut fee = RollingFeeRate::new();
        fee.track_package_removed(incremental(4000));
        fee.on_block_connected(0);

        let rate = fee.current(ROLLING_FEE_HALF_LIFE, LIMIT, LIMIT, INCREMENTAL);
        assert_eq!(rate.becks_per_kb(), 2000);
        let rate = fee.current(2 * ROLLING_FEE_HALF_LIFE, LIMIT, LIMIT, INCREMENTAL);
        assert_eq!(rate.becks_per_kb(), 1000);
    }

    #[test]
    fn decay_is_monotone() {
        let mut fee = RollingFeeRate::new();
        fee.track_package_removed(incremental(4000));
        fee.on_block_connected(0);

        let mut last = u64::MAX;
        for hour in 1..=24 {
            let rate = fee.current(hour * 3600, LIMIT, LIMIT, INCREMENTAL);
            assert!(rate.becks_per_kb() <= last);
            last = rate.becks_per_kb();
        }
    }

    #[test]
    fn snaps_to_zero_below_half_incremental() {
        let mut fee = RollingFeeRate::new();
        fee.track_package_removed(incremental(1000));
        fee.on_block_connected(0);

        // After two half-lives the floor is 250, below 1000/2: snap to 0.
        let rate = fee.current(2 * ROLLING_FEE_HALF_LIFE, LIMIT, LIMIT, incremental(1000));
        assert_eq!(rate, FeeRate::ZERO);
        // And it stays zero without needing further decay.
        let rate = fee.current(3 * ROLLING_FEE_HALF_LIFE, LIMIT, LIMIT, incremental(1000));
        assert_eq!(rate, FeeRate::ZERO);
    }

    #[test]
    fn reports_at_least_incremental_while_active() {
        let mut fee = RollingFeeRate::new();
        fee.track_package_removed(incremental(4000));
        fee.on_block_connected(0);

        // Decayed to 2000 but incremental is 3000: report 3000.
        let rate = fee.current(ROLLING_FEE_HALF_LIFE, LIMIT, LIMIT, incremental(3000));
        assert_eq!(rate.becks_per_kb(), 3000);
    }

    #[test]
    fn near_empty_pool_decays_faster() {
        let mut a = RollingFeeRate::new();
        let mut b = RollingFeeRate::new();
        a.track_package_removed(incremental(4000));
        b.track_package_removed(incremental(4000));
        a.on_block_connected(0);
        b.on_block_connected(0);

        // Full pool: one half-life. Near-empty pool: quarter half-life, so
        // four halvings over the same span.
        let full = a.current(ROLLING_FEE_HALF_LIFE, LIMIT, LIMIT, INCREMENTAL);
        let empty = b.current(ROLLING_FEE_HALF_LIFE, 0, LIMIT, INCREMENTAL);
        assert_eq!(full.becks_per_kb(), 2000);
        assert_eq!(empty.becks_per_kb(), 250);
    }

    #[test]
    fn eviction_after_block_disarms_decay() {
        let mut fee = RollingFeeRate::new();
        fee.on_block_connected(0);
        fee.track_package_removed(incremental(4000));

        // Bump after the block: decay disarmed until the next block.
        let rate = fee.current(ROLLING_FEE_HALF_LIFE, LIMIT, LIMIT, INCREMENTAL);
        assert_eq!(rate.becks_per_kb(), 4000);
    }
}
