//! Trade execution, ledger and holdings port trait.

use crate::domain::error::WalletError;
use crate::domain::holding::{Holding, HoldingUpdate};
use crate::domain::operation::{Operation, OperationType};
use crate::domain::trading::{TradeOrder, TradeReceipt};

pub trait LedgerPort {
    /// Settles the order against the stored price, balance and ledger inside
    /// one write transaction: balance update, operation insert and holding
    /// rebuild commit together or not at all.
    ///
    /// The order must already have passed `validate_order`.
    fn execute_trade(&self, user_id: i64, order: &TradeOrder) -> Result<TradeReceipt, WalletError>;

    /// Rebuilds the holding for one ticker from the ledger and stores it.
    fn rebuild_holding(&self, user_id: i64, ticker: &str) -> Result<HoldingUpdate, WalletError>;

    /// Tickers with at least one operation for the user.
    fn traded_tickers(&self, user_id: i64) -> Result<Vec<String>, WalletError>;

    fn count_operations(&self, user_id: i64) -> Result<usize, WalletError>;

    /// Newest first.
    fn list_operations(
        &self,
        user_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Operation>, WalletError>;

    /// Newest first, one side only.
    fn recent_operations(
        &self,
        user_id: i64,
        side: OperationType,
        limit: usize,
    ) -> Result<Vec<Operation>, WalletError>;

    fn list_holdings(&self, user_id: i64) -> Result<Vec<Holding>, WalletError>;
}
