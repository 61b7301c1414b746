//! Decimal helpers for cash balances and prices.
//!
//! Every stored amount carries two decimal places. Rounding is banker's
//! rounding (`round_dp`), matching decimal column quantization.

use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::str::FromStr;

pub const MONEY_DP: u32 = 2;

pub fn to_money(value: Decimal) -> Decimal {
    value.round_dp(MONEY_DP)
}

/// Converts a provider float into a stored price. Non-finite input yields `None`.
pub fn money_from_f64(value: f64) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value).map(to_money)
}

pub fn parse_money(text: &str) -> Result<Decimal, rust_decimal::Error> {
    Decimal::from_str(text.trim()).map(to_money)
}

pub fn format_money(value: Decimal) -> String {
    format!("{:.2}", to_money(value))
}
