//! Typed wallet settings decoded from the `[wallet]` and `[market]` sections.

use rust_decimal::Decimal;

use super::error::WalletError;
use super::money::parse_money;
use crate::ports::config_port::ConfigPort;

/// Instruments tradable when `[market] tickers` is not configured.
pub const DEFAULT_TICKERS: &[&str] = &[
    "PETR4.SA", "VALE3.SA", "ITUB4.SA", "BBDC4.SA", "B3SA3.SA", "AAPL", "GOOGL", "MSFT",
    "JBSS3.SA", "COGN3.SA",
];

pub const DEFAULT_STARTING_BALANCE: &str = "100000.00";
pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const RECENT_OPERATIONS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct WalletSettings {
    pub starting_balance: Decimal,
    pub page_size: usize,
    pub tickers: Vec<String>,
}

impl Default for WalletSettings {
    fn default() -> Self {
        Self {
            starting_balance: Decimal::new(100_000_00, 2),
            page_size: DEFAULT_PAGE_SIZE,
            tickers: DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

impl WalletSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WalletError> {
        let balance_str = config
            .get_string("wallet", "starting_balance")
            .unwrap_or_else(|| DEFAULT_STARTING_BALANCE.to_string());
        let starting_balance =
            parse_money(&balance_str).map_err(|e| WalletError::ConfigInvalid {
                section: "wallet".into(),
                key: "starting_balance".into(),
                reason: e.to_string(),
            })?;
        if starting_balance < Decimal::ZERO {
            return Err(WalletError::ConfigInvalid {
                section: "wallet".into(),
                key: "starting_balance".into(),
                reason: "must not be negative".into(),
            });
        }

        let page_size = config.get_int("wallet", "page_size", DEFAULT_PAGE_SIZE as i64);
        if page_size < 1 {
            return Err(WalletError::ConfigInvalid {
                section: "wallet".into(),
                key: "page_size".into(),
                reason: "must be at least 1".into(),
            });
        }

        let tickers = match config.get_string("market", "tickers") {
            Some(list) => parse_tickers(&list),
            None => DEFAULT_TICKERS.iter().map(|t| t.to_string()).collect(),
        };
        if tickers.is_empty() {
            return Err(WalletError::ConfigInvalid {
                section: "market".into(),
                key: "tickers".into(),
                reason: "no tickers listed".into(),
            });
        }

        Ok(Self {
            starting_balance,
            page_size: page_size as usize,
            tickers,
        })
    }
}

/// Splits a comma list into upper-cased, de-duplicated symbols.
pub fn parse_tickers(list: &str) -> Vec<String> {
    let mut tickers: Vec<String> = Vec::new();
    for t in list.split(',').map(|s| s.trim().to_uppercase()) {
        if !t.is_empty() && !tickers.contains(&t) {
            tickers.push(t);
        }
    }
    tickers
}
