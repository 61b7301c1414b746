//! Order validation and settlement arithmetic.
//!
//! The store runs [`settle`] inside the trade's write transaction, so the
//! balance and net holding it sees are the ones it mutates.

use rust_decimal::Decimal;

use super::error::TradeRejection;
use super::holding::HoldingUpdate;
use super::money::to_money;
use super::operation::{Operation, OperationType};

#[derive(Debug, Clone, PartialEq)]
pub struct TradeOrder {
    pub ticker: String,
    pub quantity: i64,
    pub side: OperationType,
}

impl TradeOrder {
    pub fn buy(ticker: impl Into<String>, quantity: i64) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            side: OperationType::Buy,
        }
    }

    pub fn sell(ticker: impl Into<String>, quantity: i64) -> Self {
        Self {
            ticker: ticker.into(),
            quantity,
            side: OperationType::Sell,
        }
    }

    /// Builds an order from raw form fields.
    ///
    /// An unparsable quantity is reported the same way as a non-positive one.
    pub fn from_form(operation: &str, ticker: &str, quantity: &str) -> Result<Self, TradeRejection> {
        let side: OperationType =
            operation
                .parse()
                .map_err(|_| TradeRejection::UnknownOperation {
                    operation: operation.to_string(),
                })?;
        let quantity: i64 = quantity
            .trim()
            .parse()
            .map_err(|_| TradeRejection::InvalidOrder)?;
        Ok(Self {
            ticker: ticker.trim().to_uppercase(),
            quantity,
            side,
        })
    }
}

/// Checks that need no database state: ticker is tradable and quantity positive.
pub fn validate_order(order: &TradeOrder, tickers: &[String]) -> Result<(), TradeRejection> {
    let known = tickers.iter().any(|t| t == &order.ticker);
    if !known || order.quantity < 1 {
        return Err(TradeRejection::InvalidOrder);
    }
    Ok(())
}

/// Balance movement of an accepted trade.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub price: Decimal,
    pub total: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
}

/// Prices the order against the latest close and the caller's current state.
pub fn settle(
    order: &TradeOrder,
    latest_price: Option<Decimal>,
    balance: Decimal,
    net_held: i64,
) -> Result<Settlement, TradeRejection> {
    if order.quantity < 1 {
        return Err(TradeRejection::InvalidOrder);
    }

    match order.side {
        OperationType::Buy => {
            let price = latest_price.ok_or_else(|| TradeRejection::NoPriceForBuy {
                ticker: order.ticker.clone(),
            })?;
            let total = to_money(price * Decimal::from(order.quantity));
            if balance < total {
                return Err(TradeRejection::InsufficientBalance {
                    needed: total,
                    available: balance,
                });
            }
            Ok(Settlement {
                price,
                total,
                balance_before: balance,
                balance_after: balance - total,
            })
        }
        OperationType::Sell => {
            if net_held < order.quantity {
                return Err(TradeRejection::InsufficientHoldings {
                    held: net_held,
                    requested: order.quantity,
                });
            }
            let price = latest_price
                .filter(|p| *p > Decimal::ZERO)
                .ok_or_else(|| TradeRejection::NoPriceForSell {
                    ticker: order.ticker.clone(),
                })?;
            let total = to_money(price * Decimal::from(order.quantity));
            Ok(Settlement {
                price,
                total,
                balance_before: balance,
                balance_after: balance + total,
            })
        }
    }
}

/// Result of an executed trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeReceipt {
    pub operation: Operation,
    pub holding: HoldingUpdate,
}

impl TradeReceipt {
    pub fn success_message(&self) -> String {
        match self.operation.operation_type {
            OperationType::Buy => "Purchase made successfully!".to_string(),
            OperationType::Sell => format!(
                "{} {} tickets sold!",
                self.operation.quantity, self.operation.ticker
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tickers() -> Vec<String> {
        vec!["AAPL".to_string(), "PETR4.SA".to_string()]
    }

    #[test]
    fn from_form_normalizes_ticker() {
        let order = TradeOrder::from_form("buy", " petr4.sa ", "3").unwrap();
        assert_eq!(order, TradeOrder::buy("PETR4.SA", 3));
    }

    #[test]
    fn from_form_rejects_bad_quantity_and_operation() {
        assert_eq!(
            TradeOrder::from_form("buy", "AAPL", "three"),
            Err(TradeRejection::InvalidOrder)
        );
        assert!(matches!(
            TradeOrder::from_form("hold", "AAPL", "1"),
            Err(TradeRejection::UnknownOperation { .. })
        ));
    }

    #[test]
    fn validate_rejects_unknown_ticker() {
        let order = TradeOrder::buy("TSLA", 1);
        assert_eq!(validate_order(&order, &tickers()), Err(TradeRejection::InvalidOrder));
    }

    #[test]
    fn validate_rejects_non_positive_quantity() {
        for qty in [0, -5] {
            let order = TradeOrder::buy("AAPL", qty);
            assert_eq!(validate_order(&order, &tickers()), Err(TradeRejection::InvalidOrder));
        }
    }

    #[test]
    fn validate_accepts_known_ticker() {
        assert!(validate_order(&TradeOrder::sell("AAPL", 1), &tickers()).is_ok());
    }

    #[test]
    fn buy_debits_balance() {
        let s = settle(&TradeOrder::buy("AAPL", 10), Some(dec!(12.34)), dec!(1000), 0).unwrap();
        assert_eq!(s.total, dec!(123.40));
        assert_eq!(s.balance_before, dec!(1000));
        assert_eq!(s.balance_after, dec!(876.60));
    }

    #[test]
    fn buy_of_exact_balance_is_allowed() {
        let s = settle(&TradeOrder::buy("AAPL", 2), Some(dec!(50)), dec!(100), 0).unwrap();
        assert_eq!(s.balance_after, Decimal::ZERO);
    }

    #[test]
    fn buy_beyond_balance_is_rejected() {
        let err = settle(&TradeOrder::buy("AAPL", 3), Some(dec!(50)), dec!(100), 0).unwrap_err();
        assert_eq!(
            err,
            TradeRejection::InsufficientBalance {
                needed: dec!(150),
                available: dec!(100)
            }
        );
    }

    #[test]
    fn buy_without_price_is_rejected() {
        let err = settle(&TradeOrder::buy("AAPL", 1), None, dec!(100), 0).unwrap_err();
        assert!(matches!(err, TradeRejection::NoPriceForBuy { .. }));
    }

    #[test]
    fn sell_credits_balance() {
        let s = settle(&TradeOrder::sell("AAPL", 4), Some(dec!(25)), dec!(10), 4).unwrap();
        assert_eq!(s.balance_after, dec!(110));
    }

    #[test]
    fn sell_more_than_held_is_rejected() {
        let err = settle(&TradeOrder::sell("AAPL", 5), Some(dec!(25)), dec!(10), 4).unwrap_err();
        assert_eq!(
            err,
            TradeRejection::InsufficientHoldings {
                held: 4,
                requested: 5
            }
        );
    }

    #[test]
    fn sell_checks_holdings_before_price() {
        let err = settle(&TradeOrder::sell("AAPL", 1), None, dec!(10), 0).unwrap_err();
        assert!(matches!(err, TradeRejection::InsufficientHoldings { .. }));
    }

    #[test]
    fn sell_at_zero_price_is_rejected() {
        let err = settle(&TradeOrder::sell("AAPL", 1), Some(Decimal::ZERO), dec!(10), 3).unwrap_err();
        assert!(matches!(err, TradeRejection::NoPriceForSell { .. }));
    }
}
