//! Askama page templates and the row views they render.

use askama::Template;

use super::flash::Flash;
use crate::domain::holding::Holding;
use crate::domain::market::{PriceRecord, TickerInfo, or_na};
use crate::domain::money::format_money;
use crate::domain::operation::Operation;
use crate::domain::pagination::PageWindow;

pub struct PriceRow {
    pub ticker: String,
    pub close: String,
    pub date: String,
}

impl From<&PriceRecord> for PriceRow {
    fn from(record: &PriceRecord) -> Self {
        Self {
            ticker: record.ticker.clone(),
            close: format_money(record.close_price),
            date: record.date.format("%d/%m/%Y").to_string(),
        }
    }
}

pub struct OperationRow {
    pub date: String,
    pub ticker: String,
    pub kind: &'static str,
    pub quantity: i64,
    pub price: String,
    pub total: String,
    pub balance_before: String,
    pub balance_after: String,
}

impl From<&Operation> for OperationRow {
    fn from(op: &Operation) -> Self {
        Self {
            date: op.created_at.format("%d/%m/%Y %H:%M").to_string(),
            ticker: op.ticker.clone(),
            kind: op.operation_type.label(),
            quantity: op.quantity,
            price: format_money(op.price),
            total: format_money(op.total()),
            balance_before: format_money(op.balance_before),
            balance_after: format_money(op.balance_after),
        }
    }
}

pub struct HoldingRow {
    pub ticker: String,
    pub quantity: i64,
    pub price: String,
    pub price_average: String,
    pub total: String,
}

impl From<&Holding> for HoldingRow {
    fn from(h: &Holding) -> Self {
        Self {
            ticker: h.ticker.clone(),
            quantity: h.quantity,
            price: format_money(h.price),
            price_average: format_money(h.price_average),
            total: format_money(h.total),
        }
    }
}

pub struct InfoField {
    pub label: &'static str,
    pub value: String,
}

pub fn info_fields(info: &TickerInfo) -> Vec<InfoField> {
    vec![
        InfoField {
            label: "Previous close",
            value: or_na(info.previous_close),
        },
        InfoField {
            label: "Open",
            value: or_na(info.open),
        },
        InfoField {
            label: "Day low",
            value: or_na(info.day_low),
        },
        InfoField {
            label: "Day high",
            value: or_na(info.day_high),
        },
        InfoField {
            label: "Volume",
            value: or_na(info.volume),
        },
        InfoField {
            label: "Dividend rate",
            value: or_na(info.dividend_rate),
        },
        InfoField {
            label: "Dividend yield",
            value: or_na(info.dividend_yield),
        },
        InfoField {
            label: "Ex-dividend date",
            value: or_na(info.ex_dividend_date.map(|d| d.format("%d/%m/%Y"))),
        },
    ]
}

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate<'a> {
    pub username: &'a str,
    pub flashes: &'a [Flash],
    pub balance: String,
    pub prices: &'a [PriceRow],
    pub tickers: &'a [String],
    pub recent_buys: &'a [OperationRow],
    pub recent_sells: &'a [OperationRow],
}

#[derive(Template)]
#[template(path = "history.html")]
pub struct HistoryTemplate<'a> {
    pub username: &'a str,
    pub flashes: &'a [Flash],
    pub operations: &'a [OperationRow],
    pub page: &'a PageWindow,
}

/// The table and pager only, swapped in by HTMX.
#[derive(Template)]
#[template(path = "history_rows.html")]
pub struct HistoryRowsTemplate<'a> {
    pub operations: &'a [OperationRow],
    pub page: &'a PageWindow,
}

#[derive(Template)]
#[template(path = "wallet.html")]
pub struct WalletTemplate<'a> {
    pub username: &'a str,
    pub flashes: &'a [Flash],
    pub balance: String,
    pub holdings: &'a [HoldingRow],
}

#[derive(Template)]
#[template(path = "ticker.html")]
pub struct TickerTemplate<'a> {
    pub username: &'a str,
    pub flashes: &'a [Flash],
    pub ticker: &'a str,
    pub name: &'a str,
    pub currency: &'a str,
    pub fields: &'a [InfoField],
}

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate<'a> {
    pub username: &'a str,
    pub flashes: &'a [Flash],
    pub next: &'a str,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate<'a> {
    pub username: &'a str,
    pub flashes: &'a [Flash],
    pub form_username: &'a str,
    pub form_email: &'a str,
}

#[derive(Template)]
#[template(path = "error.html")]
pub struct ErrorTemplate<'a> {
    pub message: &'a str,
    pub status: u16,
}
