//! Amount helpers shared by orders, the ledger and the gateway client.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};

/// Round to the two decimal places stored in `NUMERIC(12,2)` columns.
#[must_use]
pub fn normalize(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Convert a major-unit amount (e.g. rupees) to the integer minor units
/// (paise) the payment gateway expects. Returns `None` on overflow or for
/// negative input.
#[must_use]
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    if amount.is_sign_negative() {
        return None;
    }
    (normalize(amount) * Decimal::ONE_HUNDRED).to_i64()
}

/// Convert gateway minor units back into a major-unit amount.
#[must_use]
pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::new(minor, 2)
}

/// Render an amount for user-facing text, e.g. `₹1249.50`. No digit grouping.
#[must_use]
pub fn format_amount(symbol: &str, amount: Decimal) -> String {
    format!("{symbol}{:.2}", normalize(amount))
}
