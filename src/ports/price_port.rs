//! Close-price persistence port trait.

use crate::domain::error::WalletError;
use crate::domain::market::PriceRecord;

pub trait PricePort {
    /// Overwrites the record for `(ticker, user_id)` or inserts it.
    fn upsert_price(&self, record: &PriceRecord) -> Result<(), WalletError>;

    /// Most recent record for the ticker across all owners.
    fn latest_price(&self, ticker: &str) -> Result<Option<PriceRecord>, WalletError>;
}
