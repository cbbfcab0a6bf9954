//! Market tax
//!
//! Tax is skimmed from the seller's proceeds on every fill and credited to
//! the treasury. Amounts are rounded half-up to the currency scale.

use crate::numeric::CURRENCY_SCALE;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Tax configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaxPolicy {
    /// Fraction of the trade value, e.g. 0.05 for 5%
    pub rate: Decimal,
}

impl TaxPolicy {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }

    /// Tax owed on a trade value
    pub fn tax_on(&self, total_price: Decimal) -> Decimal {
        (total_price * self.rate)
            .round_dp_with_strategy(CURRENCY_SCALE, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Rate must lie in `[0, 1)` so the seller always nets something
    pub fn is_valid(&self) -> bool {
        self.rate >= Decimal::ZERO && self.rate < Decimal::ONE
    }
}

impl Default for TaxPolicy {
    fn default() -> Self {
        // 5%
        Self {
            rate: Decimal::new(5, 2),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_default_rate() {
        let tax = TaxPolicy::default();
        assert_eq!(tax.tax_on(dec!(300)), dec!(15));
        assert_eq!(tax.tax_on(dec!(200)), dec!(10));
    }

    #[test]
    fn test_rounds_half_up_to_cents() {
        let tax = TaxPolicy::default();
        // 0.05 * 0.30 = 0.015
        assert_eq!(tax.tax_on(dec!(0.30)), dec!(0.02));
        // 0.05 * 0.20 = 0.010
        assert_eq!(tax.tax_on(dec!(0.20)), dec!(0.01));
    }

    #[test]
    fn test_rate_bounds() {
        assert!(TaxPolicy::new(Decimal::ZERO).is_valid());
        assert!(!TaxPolicy::new(Decimal::ONE).is_valid());
        assert!(!TaxPolicy::new(dec!(-0.1)).is_valid());
    }
}
