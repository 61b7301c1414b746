//! HTTP request handlers for the web adapter.

use askama::Template;
use axum::{
    Form,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::account::{Account, Registration};
use crate::domain::error::WalletError;
use crate::domain::market::{self, TickerInfo};
use crate::domain::money::format_money;
use crate::domain::operation::OperationType;
use crate::domain::pagination::PageWindow;
use crate::domain::settings::RECENT_OPERATIONS;
use crate::domain::trading::{TradeOrder, validate_order};

use super::auth::{Credentials, User, hash_password};
use super::flash::{self, Flash};
use super::templates::{
    HistoryRowsTemplate, HistoryTemplate, HoldingRow, HomeTemplate, LoginTemplate, OperationRow,
    PriceRow, RegisterTemplate, TickerTemplate, WalletTemplate, info_fields,
};
use super::{AppState, AuthSession, WebError, is_htmx_request};

fn render(template: impl Template) -> Result<Response, WebError> {
    template
        .render()
        .map(|html| Html(html).into_response())
        .map_err(|e| WebError::internal(format!("template error: {e}")))
}

fn current_user(auth: &AuthSession) -> Result<User, WebError> {
    auth.user
        .clone()
        .ok_or_else(|| WebError::new(StatusCode::UNAUTHORIZED, "Login required"))
}

/// Only same-site absolute paths are followed after login.
fn safe_next(next: Option<&str>) -> &str {
    match next {
        Some(path) if path.starts_with('/') && !path.starts_with("//") => path,
        _ => "/",
    }
}

async fn refresh(state: &AppState) {
    if !state.refresh_on_request {
        return;
    }
    let today = Utc::now().date_naive();
    if let Err(e) = market::refresh_prices(
        state.market.as_ref(),
        state.store.as_ref(),
        &state.settings.tickers,
        today,
    )
    .await
    {
        warn!(error = %e, "price refresh failed");
    }
}

pub async fn home(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
) -> Result<Response, WebError> {
    let user = current_user(&auth)?;
    refresh(&state).await;
    let flashes = flash::take(&auth.session).await;

    let profile = state.store.get_profile(user.id)?;
    let mut prices = Vec::with_capacity(state.settings.tickers.len());
    for ticker in &state.settings.tickers {
        if let Some(record) = state.store.latest_price(ticker)? {
            prices.push(PriceRow::from(&record));
        }
    }
    let recent_buys: Vec<OperationRow> = state
        .store
        .recent_operations(user.id, OperationType::Buy, RECENT_OPERATIONS)?
        .iter()
        .map(OperationRow::from)
        .collect();
    let recent_sells: Vec<OperationRow> = state
        .store
        .recent_operations(user.id, OperationType::Sell, RECENT_OPERATIONS)?
        .iter()
        .map(OperationRow::from)
        .collect();

    render(HomeTemplate {
        username: &user.username,
        flashes: &flashes,
        balance: format_money(profile.balance),
        prices: &prices,
        tickers: &state.settings.tickers,
        recent_buys: &recent_buys,
        recent_sells: &recent_sells,
    })
}

#[derive(Debug, Default, serde::Deserialize)]
pub struct TradeForm {
    #[serde(default)]
    pub ticker: String,
    #[serde(default)]
    pub quantity: String,
    #[serde(default)]
    pub operation: String,
}

pub async fn trade(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Form(form): Form<TradeForm>,
) -> Result<Response, WebError> {
    let user = current_user(&auth)?;
    refresh(&state).await;

    let order = TradeOrder::from_form(&form.operation, &form.ticker, &form.quantity)
        .and_then(|order| validate_order(&order, &state.settings.tickers).map(|_| order));

    let message = match order {
        Err(rejection) => Flash::error(rejection.to_string()),
        Ok(order) => match state.store.execute_trade(user.id, &order) {
            Ok(receipt) => Flash::success(receipt.success_message()),
            Err(WalletError::Rejected(rejection)) => {
                info!(user_id = user.id, ticker = %order.ticker, reason = %rejection, "trade rejected");
                Flash::error(rejection.to_string())
            }
            Err(e) => return Err(e.into()),
        },
    };

    flash::push(&auth.session, message).await?;
    Ok(Redirect::to("/").into_response())
}

#[derive(Debug, serde::Deserialize)]
pub struct HistoryQuery {
    pub page: Option<String>,
}

pub async fn transaction_history(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Response, WebError> {
    let user = current_user(&auth)?;

    let total = state.store.count_operations(user.id)?;
    let page = PageWindow::resolve(query.page.as_deref(), total, state.settings.page_size);
    let operations: Vec<OperationRow> = state
        .store
        .list_operations(user.id, page.offset(), page.limit())?
        .iter()
        .map(OperationRow::from)
        .collect();

    if is_htmx_request(&headers) {
        return render(HistoryRowsTemplate {
            operations: &operations,
            page: &page,
        });
    }

    let flashes = flash::take(&auth.session).await;
    render(HistoryTemplate {
        username: &user.username,
        flashes: &flashes,
        operations: &operations,
        page: &page,
    })
}

pub async fn wallet_details(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
) -> Result<Response, WebError> {
    let user = current_user(&auth)?;
    let flashes = flash::take(&auth.session).await;

    let profile = state.store.get_profile(user.id)?;
    let holdings: Vec<HoldingRow> = state
        .store
        .list_holdings(user.id)?
        .iter()
        .map(HoldingRow::from)
        .collect();

    render(WalletTemplate {
        username: &user.username,
        flashes: &flashes,
        balance: format_money(profile.balance),
        holdings: &holdings,
    })
}

pub async fn ticker_detail(
    State(state): State<Arc<AppState>>,
    auth: AuthSession,
    Path(ticker): Path<String>,
) -> Result<Response, WebError> {
    let user = current_user(&auth)?;
    let ticker = ticker.trim().to_uppercase();
    if !state.settings.tickers.contains(&ticker) {
        return Err(WebError::not_found(format!("Unknown ticker: {ticker}")));
    }

    let mut flashes = flash::take(&auth.session).await;
    let info = match state.market.ticker_info(&ticker).await {
        Ok(info) => info,
        Err(e) => {
            warn!(ticker = %ticker, error = %e, "ticker info unavailable");
            flashes.push(Flash::warning(format!(
                "Could not load market data for {ticker}."
            )));
            TickerInfo::unavailable(&ticker)
        }
    };
    let fields = info_fields(&info);

    render(TickerTemplate {
        username: &user.username,
        flashes: &flashes,
        ticker: &ticker,
        name: info.name.as_deref().unwrap_or(""),
        currency: info.currency.as_deref().unwrap_or(""),
        fields: &fields,
    })
}

pub async fn register_form(auth: AuthSession) -> Result<Response, WebError> {
    if auth.user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let flashes = flash::take(&auth.session).await;
    render(RegisterTemplate {
        username: "",
        flashes: &flashes,
        form_username: "",
        form_email: "",
    })
}

fn register_account(state: &AppState, form: Registration) -> Result<Account, WalletError> {
    form.validate()?;
    let username = form.normalized_username();
    if state.store.find_account_by_username(&username)?.is_some() {
        return Err(WalletError::DuplicateUsername { username });
    }
    let email = form.normalized_email();
    if state.store.find_account_by_email(&email)?.is_some() {
        return Err(WalletError::DuplicateEmail { email });
    }
    form.check_passwords()?;
    let password_hash = hash_password(&form.password)?;
    let account = form.into_new_account(password_hash);
    state
        .store
        .create_account(&account, state.settings.starting_balance)
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    mut auth: AuthSession,
    Form(form): Form<Registration>,
) -> Result<Response, WebError> {
    if auth.user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }

    let form_username = form.username.clone();
    let form_email = form.email.clone();

    match register_account(&state, form) {
        Ok(account) => {
            let user = User::from(account);
            auth.login(&user).await?;
            info!(user_id = user.id, "registered and logged in");
            Ok(Redirect::to("/").into_response())
        }
        Err(e) if e.is_user_facing() => {
            let flashes = vec![Flash::error(e.to_string())];
            render(RegisterTemplate {
                username: "",
                flashes: &flashes,
                form_username: &form_username,
                form_email: &form_email,
            })
        }
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, serde::Deserialize)]
pub struct NextQuery {
    pub next: Option<String>,
}

pub async fn login_form(
    auth: AuthSession,
    Query(query): Query<NextQuery>,
) -> Result<Response, WebError> {
    if auth.user.is_some() {
        return Ok(Redirect::to("/").into_response());
    }
    let flashes = flash::take(&auth.session).await;
    render(LoginTemplate {
        username: "",
        flashes: &flashes,
        next: query.next.as_deref().unwrap_or(""),
    })
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    mut auth: AuthSession,
    Form(creds): Form<Credentials>,
) -> Result<Response, WebError> {
    let next = creds.next.clone();
    let username = creds.username.trim().to_string();

    match auth.authenticate(creds).await? {
        Some(user) => {
            auth.login(&user).await?;
            info!(user_id = user.id, "logged in");
            Ok(Redirect::to(safe_next(next.as_deref())).into_response())
        }
        None => {
            let known = !username.is_empty()
                && state.store.find_account_by_username(&username)?.is_some();
            let message = if known {
                "Wrong password!"
            } else {
                "User not registered"
            };
            let flashes = vec![Flash::error(message)];
            render(LoginTemplate {
                username: "",
                flashes: &flashes,
                next: next.as_deref().unwrap_or(""),
            })
        }
    }
}

pub async fn logout(mut auth: AuthSession) -> Result<Response, WebError> {
    auth.logout().await?;
    Ok(Redirect::to("/login/").into_response())
}

pub async fn not_found() -> WebError {
    WebError::not_found("Page not found")
}
