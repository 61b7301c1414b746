//! External market-data provider port trait.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::domain::error::WalletError;
use crate::domain::market::TickerInfo;

#[async_trait]
pub trait MarketDataPort: Send + Sync {
    /// Latest daily close, `None` when the provider has no history for it.
    async fn latest_close(&self, ticker: &str) -> Result<Option<Decimal>, WalletError>;

    async fn ticker_info(&self, ticker: &str) -> Result<TickerInfo, WalletError>;
}
