//! Cost calculation
//!
//! Converts elapsed talk time into minor units. Elapsed seconds are first
//! rounded up to the billing increment, then priced at the per-minute rate, and
//! the fractional minor unit is resolved with the configured rounding.

use callmeter_core::models::{BillingProfile, Rounding};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Pure, deterministic pricing function
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostCalculator {
    rate_per_minute: Decimal,
    billing_increment_secs: u32,
    rounding: Rounding,
}

impl CostCalculator {
    pub fn new(rate_per_minute: Decimal, billing_increment_secs: u32, rounding: Rounding) -> Self {
        Self {
            rate_per_minute: rate_per_minute.max(Decimal::ZERO),
            billing_increment_secs: billing_increment_secs.max(1),
            rounding,
        }
    }

    pub fn from_profile(profile: &BillingProfile) -> Self {
        Self::new(
            profile.rate_per_minute,
            profile.billing_increment_secs,
            profile.rounding,
        )
    }

    /// Elapsed seconds rounded up to the billing increment
    pub fn billable_seconds(&self, elapsed_seconds: i64) -> i64 {
        if elapsed_seconds <= 0 {
            return 0;
        }

        let increment = i64::from(self.billing_increment_secs);
        let blocks = elapsed_seconds / increment + i64::from(elapsed_seconds % increment != 0);
        blocks.saturating_mul(increment)
    }

    /// Cost of `elapsed_seconds` in minor units, never negative
    pub fn cost(&self, elapsed_seconds: i64) -> i64 {
        let billable = self.billable_seconds(elapsed_seconds);
        if billable == 0 || self.rate_per_minute.is_zero() {
            return 0;
        }

        let exact = Decimal::from(billable)
            .checked_mul(self.rate_per_minute)
            .map(|total| total / Decimal::from(60))
            .unwrap_or(Decimal::MAX);

        let rounded = match self.rounding {
            Rounding::Up => exact.ceil(),
            Rounding::Down => exact.floor(),
            Rounding::Nearest => exact.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero),
        };

        rounded.to_i64().unwrap_or(i64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn per_minute(rate: Decimal) -> CostCalculator {
        CostCalculator::new(rate, 60, Rounding::Up)
    }

    #[test]
    fn test_per_minute_blocks() {
        let calc = per_minute(dec!(56));

        assert_eq!(calc.cost(0), 0);
        assert_eq!(calc.cost(1), 56);
        assert_eq!(calc.cost(60), 56);
        assert_eq!(calc.cost(61), 112);
        assert_eq!(calc.cost(120), 112);
        assert_eq!(calc.cost(300), 280);
    }

    #[test]
    fn test_negative_elapsed_is_free() {
        assert_eq!(per_minute(dec!(56)).cost(-30), 0);
    }

    #[test]
    fn test_per_second_with_fractional_rate() {
        // 0.5 per minute, 90 seconds = 0.75
        let up = CostCalculator::new(dec!(0.5), 1, Rounding::Up);
        let down = CostCalculator::new(dec!(0.5), 1, Rounding::Down);
        let nearest = CostCalculator::new(dec!(0.5), 1, Rounding::Nearest);

        assert_eq!(up.cost(90), 1);
        assert_eq!(down.cost(90), 0);
        assert_eq!(nearest.cost(90), 1);
        assert_eq!(nearest.cost(30), 0);
    }

    #[test]
    fn test_nearest_midpoint_rounds_away() {
        // 1 per minute, 30 seconds = 0.5
        let calc = CostCalculator::new(dec!(1), 1, Rounding::Nearest);
        assert_eq!(calc.cost(30), 1);
    }

    #[test]
    fn test_from_profile() {
        let profile = BillingProfile {
            rate_per_minute: dec!(12.5),
            billing_increment_secs: 6,
            ..Default::default()
        };

        let calc = CostCalculator::from_profile(&profile);
        assert_eq!(calc.billable_seconds(7), 12);
        // 12s at 12.5/min = 2.5 -> 3
        assert_eq!(calc.cost(7), 3);
    }

    #[test]
    fn test_zero_increment_treated_as_per_second() {
        let calc = CostCalculator::new(dec!(60), 0, Rounding::Up);
        assert_eq!(calc.cost(7), 7);
    }

    #[test]
    fn test_huge_elapsed_saturates() {
        let calc = per_minute(dec!(56));
        assert!(calc.cost(i64::MAX) > 0);
    }

    fn rounding_strategy() -> impl Strategy<Value = Rounding> {
        prop_oneof![
            Just(Rounding::Up),
            Just(Rounding::Nearest),
            Just(Rounding::Down)
        ]
    }

    proptest! {
        #[test]
        fn cost_is_monotonic(
            rate_cents in 0u32..100_000,
            increment in 1u32..=120,
            rounding in rounding_strategy(),
            a in 0i64..1_000_000,
            b in 0i64..1_000_000,
        ) {
            let calc = CostCalculator::new(Decimal::new(rate_cents.into(), 2), increment, rounding);
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(calc.cost(lo) <= calc.cost(hi));
        }

        #[test]
        fn cost_is_deterministic(
            rate_cents in 0u32..100_000,
            increment in 1u32..=120,
            elapsed in 0i64..1_000_000,
        ) {
            let calc = CostCalculator::new(Decimal::new(rate_cents.into(), 2), increment, Rounding::Up);
            prop_assert_eq!(calc.cost(elapsed), calc.cost(elapsed));
            prop_assert!(calc.cost(elapsed) >= 0);
        }

        #[test]
        fn rounding_orders_results(
            rate_cents in 0u32..100_000,
            elapsed in 0i64..100_000,
        ) {
            let rate = Decimal::new(rate_cents.into(), 2);
            let up = CostCalculator::new(rate, 1, Rounding::Up).cost(elapsed);
            let nearest = CostCalculator::new(rate, 1, Rounding::Nearest).cost(elapsed);
            let down = CostCalculator::new(rate, 1, Rounding::Down).cost(elapsed);
            prop_assert!(down <= nearest && nearest <= up);
        }
    }
}
