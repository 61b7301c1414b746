//! Derived per-user, per-ticker holdings rebuilt from the ledger.

use rust_decimal::Decimal;

use super::money::to_money;
use super::operation::{Operation, OperationType};

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub user_id: i64,
    pub ticker: String,
    pub quantity: i64,
    /// Latest known close price.
    pub price: Decimal,
    /// Mean of the prices of every operation on this ticker.
    pub price_average: Decimal,
    pub total: Decimal,
}

/// What the store must do with the holding row after a rebuild.
#[derive(Debug, Clone, PartialEq)]
pub enum HoldingUpdate {
    Upsert(Holding),
    Remove { user_id: i64, ticker: String },
}

impl HoldingUpdate {
    pub fn quantity(&self) -> Option<i64> {
        match self {
            HoldingUpdate::Upsert(h) => Some(h.quantity),
            HoldingUpdate::Remove { .. } => None,
        }
    }
}

pub fn total_bought(ledger: &[Operation]) -> i64 {
    sum_quantity(ledger, OperationType::Buy)
}

pub fn total_sold(ledger: &[Operation]) -> i64 {
    sum_quantity(ledger, OperationType::Sell)
}

fn sum_quantity(ledger: &[Operation], kind: OperationType) -> i64 {
    ledger
        .iter()
        .filter(|op| op.operation_type == kind)
        .map(|op| op.quantity)
        .sum()
}

/// Shares bought minus shares sold.
pub fn net_quantity(ledger: &[Operation]) -> i64 {
    total_bought(ledger) - total_sold(ledger)
}

/// Mean operation price over the ledger, or zero for an empty ledger.
pub fn average_price(ledger: &[Operation]) -> Decimal {
    if ledger.is_empty() {
        return Decimal::ZERO;
    }
    let sum: Decimal = ledger.iter().map(|op| op.price).sum();
    sum / Decimal::from(ledger.len())
}

/// Rebuilds the holding for `(user_id, ticker)` from that pair's ledger.
///
/// `ledger` must contain only operations for this user and ticker. A negative
/// net quantity removes the row; zero or more upserts it.
pub fn rebuild_holding(
    user_id: i64,
    ticker: &str,
    ledger: &[Operation],
    latest_price: Option<Decimal>,
) -> HoldingUpdate {
    let net = net_quantity(ledger);
    if net < 0 {
        return HoldingUpdate::Remove {
            user_id,
            ticker: ticker.to_string(),
        };
    }

    let price = latest_price.unwrap_or(Decimal::ZERO);
    HoldingUpdate::Upsert(Holding {
        user_id,
        ticker: ticker.to_string(),
        quantity: net,
        price,
        price_average: to_money(average_price(ledger)),
        total: to_money(price * Decimal::from(net)),
    })
}
