//! Yahoo Finance market data adapter.
//!
//! Latest closes come from the chart API through `yahoo_finance_api`. Ticker
//! details come from the `quoteSummary` endpoint, which needs a cookie and
//! crumb pair fetched once and cached until Yahoo answers 401.

use std::sync::RwLock;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::header;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::{debug, warn};
use urlencoding::encode;
use yahoo_finance_api as yahoo;

use crate::domain::error::WalletError;
use crate::domain::market::TickerInfo;
use crate::domain::money::money_from_f64;
use crate::ports::market_data_port::MarketDataPort;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const COOKIE_URL: &str = "https://fc.yahoo.com";
const CRUMB_URL: &str = "https://query1.finance.yahoo.com/v1/test/getcrumb";

#[derive(Debug, Clone)]
struct CrumbData {
    cookie: String,
    crumb: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    price: Option<PriceModule>,
    summary_detail: Option<SummaryDetail>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PriceModule {
    currency: Option<String>,
    short_name: Option<String>,
    long_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryDetail {
    previous_close: Option<RawValue>,
    open: Option<RawValue>,
    day_low: Option<RawValue>,
    day_high: Option<RawValue>,
    volume: Option<RawValue>,
    dividend_rate: Option<RawValue>,
    dividend_yield: Option<RawValue>,
    ex_dividend_date: Option<RawValue>,
}

/// Yahoo wraps numbers as `{"raw": 1.0, "fmt": "1.00"}`; an empty object means absent.
#[derive(Debug, Clone, Default, Deserialize)]
struct RawValue {
    raw: Option<f64>,
}

fn raw(value: &Option<RawValue>) -> Option<f64> {
    value.as_ref().and_then(|v| v.raw).filter(|v| v.is_finite())
}

fn map_summary(ticker: &str, result: &QuoteSummaryResult) -> TickerInfo {
    let price = result.price.as_ref();
    let detail = result.summary_detail.as_ref();

    TickerInfo {
        ticker: ticker.to_string(),
        name: price.and_then(|p| p.long_name.clone().or_else(|| p.short_name.clone())),
        currency: price.and_then(|p| p.currency.clone()),
        previous_close: detail.and_then(|d| raw(&d.previous_close)),
        open: detail.and_then(|d| raw(&d.open)),
        day_low: detail.and_then(|d| raw(&d.day_low)),
        day_high: detail.and_then(|d| raw(&d.day_high)),
        volume: detail.and_then(|d| raw(&d.volume)).filter(|v| *v >= 0.0).map(|v| v as u64),
        dividend_rate: detail.and_then(|d| raw(&d.dividend_rate)),
        dividend_yield: detail.and_then(|d| raw(&d.dividend_yield)),
        ex_dividend_date: detail.and_then(|d| raw(&d.ex_dividend_date))
            .and_then(|secs| DateTime::from_timestamp(secs as i64, 0))
            .map(|dt| dt.date_naive()),
    }
}

fn market_err(ticker: &str, reason: impl std::fmt::Display) -> WalletError {
    WalletError::MarketData {
        ticker: ticker.to_string(),
        reason: reason.to_string(),
    }
}

pub struct YahooAdapter {
    connector: yahoo::YahooConnector,
    client: reqwest::Client,
    crumb: RwLock<Option<CrumbData>>,
}

impl YahooAdapter {
    pub fn new() -> Result<Self, WalletError> {
        let connector = yahoo::YahooConnector::new().map_err(|e| market_err("*", e))?;
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| market_err("*", e))?;
        Ok(Self {
            connector,
            client,
            crumb: RwLock::new(None),
        })
    }

    async fn ensure_crumb(&self, ticker: &str) -> Result<CrumbData, WalletError> {
        let cached = self.crumb.read().ok().and_then(|guard| guard.clone());
        if let Some(crumb) = cached {
            return Ok(crumb);
        }
        self.fetch_crumb(ticker).await
    }

    async fn fetch_crumb(&self, ticker: &str) -> Result<CrumbData, WalletError> {
        let response = self
            .client
            .get(COOKIE_URL)
            .send()
            .await
            .map_err(|e| market_err(ticker, format!("cookie request failed: {e}")))?;

        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|h| h.to_str().ok())
            .and_then(|s| s.split_once(';').map(|(v, _)| v.to_string()))
            .ok_or_else(|| market_err(ticker, "no cookie in response"))?;

        let crumb = self
            .client
            .get(CRUMB_URL)
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .map_err(|e| market_err(ticker, format!("crumb request failed: {e}")))?
            .text()
            .await
            .map_err(|e| market_err(ticker, format!("crumb read failed: {e}")))?;

        let data = CrumbData { cookie, crumb };
        if let Ok(mut guard) = self.crumb.write() {
            *guard = Some(data.clone());
        }
        debug!("yahoo crumb refreshed");
        Ok(data)
    }

    fn clear_crumb(&self) {
        if let Ok(mut guard) = self.crumb.write() {
            *guard = None;
        }
    }
}

#[async_trait]
impl MarketDataPort for YahooAdapter {
    async fn latest_close(&self, ticker: &str) -> Result<Option<Decimal>, WalletError> {
        let response = match self.connector.get_latest_quotes(ticker, "1d").await {
            Ok(response) => response,
            Err(yahoo::YahooError::NoQuotes | yahoo::YahooError::NoResult) => return Ok(None),
            Err(e) => return Err(market_err(ticker, e)),
        };

        match response.last_quote() {
            Ok(quote) => Ok(money_from_f64(quote.close)),
            Err(e) => {
                debug!(ticker, error = %e, "empty quote history");
                Ok(None)
            }
        }
    }

    async fn ticker_info(&self, ticker: &str) -> Result<TickerInfo, WalletError> {
        let crumb = self.ensure_crumb(ticker).await?;
        let url = format!(
            "https://query1.finance.yahoo.com/v10/finance/quoteSummary/{}?modules=price,summaryDetail&crumb={}",
            encode(ticker),
            encode(&crumb.crumb)
        );

        let response = self
            .client
            .get(&url)
            .header(header::COOKIE, &crumb.cookie)
            .send()
            .await
            .map_err(|e| market_err(ticker, format!("quote summary request failed: {e}")))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            self.clear_crumb();
            warn!(ticker, "yahoo authentication expired");
            return Err(market_err(ticker, "authentication expired"));
        }

        let body: QuoteSummaryResponse = response
            .json()
            .await
            .map_err(|e| market_err(ticker, format!("unreadable quote summary: {e}")))?;

        let result = body
            .quote_summary
            .result
            .and_then(|r| r.into_iter().next())
            .ok_or_else(|| market_err(ticker, "symbol not found"))?;

        Ok(map_summary(ticker, &result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "quoteSummary": {
            "result": [{
                "price": {"currency": "BRL", "shortName": "PETROBRAS PN", "longName": "Petróleo Brasileiro S.A. - Petrobras"},
                "summaryDetail": {
                    "previousClose": {"raw": 36.12, "fmt": "36.12"},
                    "open": {"raw": 36.3, "fmt": "36.30"},
                    "dayLow": {"raw": 35.9, "fmt": "35.90"},
                    "dayHigh": {"raw": 36.75, "fmt": "36.75"},
                    "volume": {"raw": 41234500, "fmt": "41.23M"},
                    "dividendRate": {"raw": 5.12, "fmt": "5.12"},
                    "dividendYield": {"raw": 0.1418, "fmt": "14.18%"},
                    "exDividendDate": {"raw": 1718236800, "fmt": "2024-06-13"}
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn maps_full_summary() {
        let body: QuoteSummaryResponse = serde_json::from_str(SAMPLE).unwrap();
        let result = body.quote_summary.result.unwrap().remove(0);
        let info = map_summary("PETR4.SA", &result);

        assert_eq!(info.ticker, "PETR4.SA");
        assert_eq!(info.name.as_deref(), Some("Petróleo Brasileiro S.A. - Petrobras"));
        assert_eq!(info.currency.as_deref(), Some("BRL"));
        assert_eq!(info.previous_close, Some(36.12));
        assert_eq!(info.day_high, Some(36.75));
        assert_eq!(info.volume, Some(41_234_500));
        assert_eq!(info.dividend_yield, Some(0.1418));
        assert_eq!(
            info.ex_dividend_date,
            Some(NaiveDate::from_ymd_opt(2024, 6, 13).unwrap())
        );
    }

    #[test]
    fn empty_raw_objects_are_missing() {
        let body = r#"{"quoteSummary": {"result": [{
            "summaryDetail": {"dividendRate": {}, "dividendYield": {}, "open": {"raw": 10.0}}
        }]}}"#;
        let body: QuoteSummaryResponse = serde_json::from_str(body).unwrap();
        let result = body.quote_summary.result.unwrap().remove(0);
        let info = map_summary("AAPL", &result);

        assert_eq!(info.open, Some(10.0));
        assert!(info.dividend_rate.is_none());
        assert!(info.dividend_yield.is_none());
        assert!(info.name.is_none());
        assert!(info.ex_dividend_date.is_none());
    }

    #[test]
    fn null_result_deserializes() {
        let body = r#"{"quoteSummary": {"result": null, "error": {"code": "Not Found"}}}"#;
        let body: QuoteSummaryResponse = serde_json::from_str(body).unwrap();
        assert!(body.quote_summary.result.is_none());
    }

    #[tokio::test]
    #[ignore = "requires network access to Yahoo Finance"]
    async fn fetches_live_close() {
        let adapter = YahooAdapter::new().unwrap();
        let close = adapter.latest_close("AAPL").await.unwrap();
        assert!(close.is_some_and(|c| c > Decimal::ZERO));
    }
}
