#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, Response, StatusCode, header},
};
use http_body_util::BodyExt;
use papertrade::adapters::file_config_adapter::FileConfigAdapter;
use papertrade::adapters::sqlite_adapter::SqliteAdapter;
use papertrade::adapters::web::{AppState, build_router};
use papertrade::domain::error::WalletError;
use papertrade::domain::market::TickerInfo;
use papertrade::ports::market_data_port::MarketDataPort;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_PASSWORD: &str = "correct horse";

pub fn test_config(extra: &str) -> FileConfigAdapter {
    let ini = format!(
        "[auth]\n\
         session_secret = {}\n\
         session_lifetime = 3600\n\
         [wallet]\n\
         starting_balance = 1000.00\n\
         page_size = 3\n\
         [market]\n\
         tickers = AAPL, MSFT, PETR4.SA\n\
         {extra}",
        "01".repeat(64)
    );
    FileConfigAdapter::from_string(&ini).unwrap()
}

/// Market data served from fixed tables.
#[derive(Default)]
pub struct StaticMarketData {
    pub closes: HashMap<String, Decimal>,
    pub infos: HashMap<String, TickerInfo>,
}

impl StaticMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_close(mut self, ticker: &str, close: Decimal) -> Self {
        self.closes.insert(ticker.to_string(), close);
        self
    }

    pub fn with_info(mut self, info: TickerInfo) -> Self {
        self.infos.insert(info.ticker.clone(), info);
        self
    }
}

#[async_trait]
impl MarketDataPort for StaticMarketData {
    async fn latest_close(&self, ticker: &str) -> Result<Option<Decimal>, WalletError> {
        Ok(self.closes.get(ticker).copied())
    }

    async fn ticker_info(&self, ticker: &str) -> Result<TickerInfo, WalletError> {
        self.infos
            .get(ticker)
            .cloned()
            .ok_or_else(|| WalletError::MarketData {
                ticker: ticker.to_string(),
                reason: "provider unavailable".into(),
            })
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<SqliteAdapter>,
}

pub fn test_app(market: StaticMarketData) -> TestApp {
    test_app_with(market, "")
}

pub fn test_app_with(market: StaticMarketData, extra_config: &str) -> TestApp {
    let store = Arc::new(SqliteAdapter::in_memory().unwrap());
    store.initialize_schema().unwrap();
    let state = AppState::new(
        store.clone(),
        Arc::new(market),
        Arc::new(test_config(extra_config)),
    )
    .unwrap();
    TestApp {
        router: build_router(state).unwrap(),
        store,
    }
}

/// Sends requests through the router, carrying the session cookie like a browser.
pub struct Client {
    router: Router,
    cookie: Option<String>,
}

impl Client {
    pub fn new(router: Router) -> Self {
        Self {
            router,
            cookie: None,
        }
    }

    pub async fn send(&mut self, mut request: Request<Body>) -> Response<Body> {
        if let Some(cookie) = &self.cookie {
            request
                .headers_mut()
                .insert(header::COOKIE, cookie.parse().unwrap());
        }
        let response = self.router.clone().oneshot(request).await.unwrap();
        if let Some(set) = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .last()
        {
            self.cookie = set.split(';').next().map(str::to_string);
        }
        response
    }

    pub async fn get(&mut self, uri: &str) -> Response<Body> {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    pub async fn post_form(&mut self, uri: &str, fields: &[(&str, &str)]) -> Response<Body> {
        self.send(form_request(uri, fields)).await
    }

    pub async fn register(&mut self, username: &str, email: &str) -> Response<Body> {
        self.post_form(
            "/register/",
            &[
                ("username", username),
                ("email", email),
                ("password", TEST_PASSWORD),
                ("password2", TEST_PASSWORD),
            ],
        )
        .await
    }
}

pub fn form_request(uri: &str, fields: &[(&str, &str)]) -> Request<Body> {
    let body = fields
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body))
        .unwrap()
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub fn assert_redirect(response: &Response<Body>, to: &str) {
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(response), to);
}
