//! Ledger entries: one immutable row per executed trade.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Buy,
    Sell,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Buy => "buy",
            OperationType::Sell => "sell",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            OperationType::Buy => "Buy",
            OperationType::Sell => "Sell",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(OperationType::Buy),
            "sell" => Ok(OperationType::Sell),
            other => Err(format!("unknown operation type: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: i64,
    pub user_id: i64,
    pub ticker: String,
    pub quantity: i64,
    pub operation_type: OperationType,
    pub price: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl Operation {
    pub fn total(&self) -> Decimal {
        self.price * Decimal::from(self.quantity)
    }

    /// Quantity with its direction: positive for buys, negative for sells.
    pub fn signed_quantity(&self) -> i64 {
        match self.operation_type {
            OperationType::Buy => self.quantity,
            OperationType::Sell => -self.quantity,
        }
    }
}
