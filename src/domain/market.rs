//! Stored close prices and the per-request price refresh.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::fmt::Display;
use tracing::{debug, info, warn};

use super::error::WalletError;
use crate::ports::market_data_port::MarketDataPort;
use crate::ports::price_port::PricePort;

#[derive(Debug, Clone, PartialEq)]
pub struct PriceRecord {
    pub ticker: String,
    pub close_price: Decimal,
    pub date: NaiveDate,
    /// Set only for prices attributed to one user; refreshed prices are shared.
    pub user_id: Option<i64>,
}

/// Descriptive quote fields shown on the ticker page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickerInfo {
    pub ticker: String,
    pub name: Option<String>,
    pub currency: Option<String>,
    pub previous_close: Option<f64>,
    pub open: Option<f64>,
    pub day_low: Option<f64>,
    pub day_high: Option<f64>,
    pub volume: Option<u64>,
    pub dividend_rate: Option<f64>,
    pub dividend_yield: Option<f64>,
    pub ex_dividend_date: Option<NaiveDate>,
}

impl TickerInfo {
    /// Placeholder used when the provider cannot be reached.
    pub fn unavailable(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            ..Default::default()
        }
    }
}

/// Renders an optional provider field, `N/A` when absent.
pub fn or_na<T: Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RefreshSummary {
    pub updated: Vec<String>,
    pub skipped: Vec<String>,
}

/// Fetches the latest close for every ticker and upserts it as today's price.
///
/// Provider errors and empty histories skip the ticker; store errors abort.
pub async fn refresh_prices<P: PricePort + ?Sized>(
    market: &dyn MarketDataPort,
    prices: &P,
    tickers: &[String],
    today: NaiveDate,
) -> Result<RefreshSummary, WalletError> {
    let mut summary = RefreshSummary::default();

    for ticker in tickers {
        let close = match market.latest_close(ticker).await {
            Ok(Some(close)) => close,
            Ok(None) => {
                debug!(ticker = %ticker, "no quote history, keeping stored price");
                summary.skipped.push(ticker.clone());
                continue;
            }
            Err(e) => {
                warn!(ticker = %ticker, error = %e, "price fetch failed");
                summary.skipped.push(ticker.clone());
                continue;
            }
        };

        prices.upsert_price(&PriceRecord {
            ticker: ticker.clone(),
            close_price: close,
            date: today,
            user_id: None,
        })?;
        summary.updated.push(ticker.clone());
    }

    info!(
        updated = summary.updated.len(),
        skipped = summary.skipped.len(),
        "price refresh complete"
    );
    Ok(summary)
}
