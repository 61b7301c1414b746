#![cfg(feature = "sqlite")]
//! Page handlers: trading, history, wallet and ticker info.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use papertrade::domain::market::TickerInfo;
use papertrade::ports::account_port::AccountPort;
use papertrade::ports::ledger_port::LedgerPort;
use rust_decimal_macros::dec;

use common::*;

fn market() -> StaticMarketData {
    StaticMarketData::new()
        .with_close("AAPL", dec!(100.00))
        .with_close("MSFT", dec!(250.50))
}

async fn logged_in(app: &TestApp) -> Client {
    let mut client = Client::new(app.router.clone());
    client.register("alice", "alice@example.com").await;
    client
}

async fn trade(client: &mut Client, operation: &str, ticker: &str, quantity: &str) {
    let response = client
        .post_form(
            "/",
            &[
                ("operation", operation),
                ("ticker", ticker),
                ("quantity", quantity),
            ],
        )
        .await;
    assert_redirect(&response, "/");
}

async fn home_html(client: &mut Client) -> String {
    let response = client.get("/").await;
    assert_eq!(response.status(), StatusCode::OK);
    body_text(response).await
}

fn alice_id(app: &TestApp) -> i64 {
    app.store
        .find_account_by_username("alice")
        .unwrap()
        .unwrap()
        .id
}

mod trade_tests {
    use super::*;

    #[tokio::test]
    async fn home_refreshes_prices() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        let html = home_html(&mut client).await;
        assert!(html.contains("Balance: 1000.00"));
        assert!(html.contains("/ticker/AAPL/"));
        assert!(html.contains("250.50"));
        assert!(html.contains("No purchases yet."));
    }

    #[tokio::test]
    async fn buy_debits_balance_and_flashes_once() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        trade(&mut client, "buy", "aapl", "3").await;

        let html = home_html(&mut client).await;
        assert!(html.contains("Purchase made successfully!"));
        assert!(html.contains("Balance: 700.00"));
        assert!(html.contains("300.00"));

        let html = home_html(&mut client).await;
        assert!(!html.contains("Purchase made successfully!"));
    }

    #[tokio::test]
    async fn buy_beyond_balance_changes_nothing() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        trade(&mut client, "buy", "AAPL", "11").await;

        let html = home_html(&mut client).await;
        assert!(html.contains("Insufficient balance to make the purchase."));
        assert!(html.contains("Balance: 1000.00"));
        assert_eq!(app.store.count_operations(alice_id(&app)).unwrap(), 0);
    }

    #[tokio::test]
    async fn sell_credits_balance_and_updates_holding() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        trade(&mut client, "buy", "AAPL", "5").await;
        trade(&mut client, "sell", "AAPL", "2").await;

        let html = home_html(&mut client).await;
        assert!(html.contains("2 AAPL tickets sold!"));
        assert!(html.contains("Balance: 700.00"));

        let holdings = app.store.list_holdings(alice_id(&app)).unwrap();
        assert_eq!(holdings.len(), 1);
        assert_eq!(holdings[0].quantity, 3);
        assert_eq!(holdings[0].total, dec!(300.00));
    }

    #[tokio::test]
    async fn oversized_sell_is_rejected() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        trade(&mut client, "buy", "AAPL", "1").await;
        trade(&mut client, "sell", "AAPL", "2").await;

        let html = home_html(&mut client).await;
        assert!(html.contains("Insufficient tickets to make the sale."));
        assert!(html.contains("Balance: 900.00"));
        assert_eq!(app.store.count_operations(alice_id(&app)).unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_ticker_and_bad_quantity_are_rejected() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        trade(&mut client, "buy", "ZZZZ", "1").await;
        trade(&mut client, "buy", "AAPL", "0").await;
        trade(&mut client, "buy", "AAPL", "lots").await;

        let html = home_html(&mut client).await;
        assert_eq!(html.matches("invalid quantity!").count(), 3);
        assert_eq!(app.store.count_operations(alice_id(&app)).unwrap(), 0);
    }

    #[tokio::test]
    async fn ticker_without_stored_price_cannot_be_bought() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        trade(&mut client, "buy", "PETR4.SA", "1").await;

        let html = home_html(&mut client).await;
        assert!(html.contains("Ticker not found in stock data."));
    }

    #[tokio::test]
    async fn refresh_can_be_turned_off() {
        let app = test_app_with(market(), "refresh_on_request = false\n");
        let mut client = logged_in(&app).await;

        let html = home_html(&mut client).await;
        assert!(html.contains("No prices stored yet."));
    }
}

mod page_tests {
    use super::*;

    #[tokio::test]
    async fn history_pages_newest_first() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;
        for ticker in ["AAPL", "AAPL", "AAPL", "MSFT"] {
            trade(&mut client, "buy", ticker, "1").await;
        }

        let html = body_text(client.get("/transaction_history/").await).await;
        assert!(html.contains("<h1>Transaction history</h1>"));
        assert!(html.contains("Page 1 of 2"));
        let first_row = html.find("<td>MSFT</td>").unwrap();
        let aapl_row = html.find("<td>AAPL</td>").unwrap();
        assert!(first_row < aapl_row);

        let html = body_text(client.get("/transaction_history/?page=99").await).await;
        assert!(html.contains("Page 2 of 2"));

        let html = body_text(client.get("/transaction_history/?page=abc").await).await;
        assert!(html.contains("Page 1 of 2"));
    }

    #[tokio::test]
    async fn htmx_request_gets_rows_fragment() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;
        for _ in 0..4 {
            trade(&mut client, "buy", "AAPL", "1").await;
        }

        let response = client
            .send(
                Request::builder()
                    .uri("/transaction_history/?page=2")
                    .header("HX-Request", "true")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.trim_start().starts_with("<div id=\"history\">"));
        assert!(!html.contains("<html"));
        assert!(html.contains("Page 2 of 2"));
        assert_eq!(html.matches("<td>AAPL</td>").count(), 1);
    }

    #[tokio::test]
    async fn wallet_lists_holdings() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;
        trade(&mut client, "buy", "MSFT", "2").await;

        let response = client.get("/wallet_details/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Cash balance: 499.00"));
        assert!(html.contains("<td>501.00</td>"));
        assert!(html.contains("<td>250.50</td>"));
    }

    #[tokio::test]
    async fn ticker_page_shows_provider_fields() {
        let info = TickerInfo {
            name: Some("Apple Inc.".into()),
            currency: Some("USD".into()),
            previous_close: Some(189.5),
            volume: Some(1_000_000),
            ..TickerInfo::unavailable("AAPL")
        };
        let app = test_app(market().with_info(info));
        let mut client = logged_in(&app).await;

        let response = client.get("/ticker/aapl/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Apple Inc. (USD)"));
        assert!(html.contains("189.5"));
        assert!(html.contains("1000000"));
        assert!(html.contains("N/A"));
    }

    #[tokio::test]
    async fn ticker_page_survives_provider_failure() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        let response = client.get("/ticker/MSFT/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Could not load market data for MSFT."));
        assert_eq!(html.matches("N/A").count(), 8);
    }

    #[tokio::test]
    async fn unknown_ticker_page_is_not_found() {
        let app = test_app(market());
        let mut client = logged_in(&app).await;

        let response = client.get("/ticker/ZZZZ/").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let app = test_app(market());
        let response = Client::new(app.router).get("/no/such/page").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("Page not found"));
    }
}
