//! Crossing detection logic
//!
//! Determines when a bid and ask can match based on price compatibility

use rust_decimal::Decimal;
use types::numeric::Price;
use types::order::Side;

/// Check if a bid and ask can match at given prices
///
/// For a buy order to match with a sell order the buy price must be at
/// least the sell price.
pub fn can_match(bid_price: Price, ask_price: Price) -> bool {
    bid_price >= ask_price
}

/// Check if an incoming order can match against a resting order
pub fn incoming_can_match(incoming_side: Side, incoming_price: Price, resting_price: Price) -> bool {
    match incoming_side {
        Side::Buy => can_match(incoming_price, resting_price),
        Side::Sell => can_match(resting_price, incoming_price),
    }
}

/// Gold a buyer reserved beyond what a fill at `execution_price` costs
///
/// Fills execute at the resting order's price, so an incoming bid above the
/// best ask keeps the difference. Returns `None` on overflow.
pub fn price_improvement(limit_price: Price, execution_price: Price, quantity: u64) -> Option<Decimal> {
    let per_unit = limit_price.as_decimal() - execution_price.as_decimal();
    if per_unit <= Decimal::ZERO {
        return Some(Decimal::ZERO);
    }
    Decimal::from(quantity).checked_mul(per_unit)
}
