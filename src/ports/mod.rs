//! Port traits implemented by the adapters.

pub mod account_port;
pub mod config_port;
pub mod ledger_port;
pub mod market_data_port;
pub mod price_port;

use account_port::AccountPort;
use ledger_port::LedgerPort;
use price_port::PricePort;

/// Everything the web layer needs from persistence, behind one object.
pub trait WalletStore: AccountPort + LedgerPort + PricePort + Send + Sync {}

impl<T> WalletStore for T where T: AccountPort + LedgerPort + PricePort + Send + Sync {}
