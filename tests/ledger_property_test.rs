#![cfg(feature = "sqlite")]
//! Ledger, balance and holdings stay consistent across any trade sequence,
//! including trades racing each other on a shared pool.

use chrono::NaiveDate;
use papertrade::adapters::file_config_adapter::FileConfigAdapter;
use papertrade::adapters::sqlite_adapter::SqliteAdapter;
use papertrade::domain::account::NewAccount;
use papertrade::domain::error::WalletError;
use papertrade::domain::market::PriceRecord;
use papertrade::domain::operation::OperationType;
use papertrade::domain::trading::TradeOrder;
use papertrade::ports::account_port::AccountPort;
use papertrade::ports::ledger_port::LedgerPort;
use papertrade::ports::price_port::PricePort;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

const TICKERS: [&str; 2] = ["AAPL", "MSFT"];

fn arb_order() -> impl Strategy<Value = TradeOrder> {
    (
        prop_oneof![Just(OperationType::Buy), Just(OperationType::Sell)],
        0usize..TICKERS.len(),
        1i64..15,
    )
        .prop_map(|(side, ticker, quantity)| TradeOrder {
            ticker: TICKERS[ticker].to_string(),
            quantity,
            side,
        })
}

fn seeded_store() -> (SqliteAdapter, i64) {
    let store = SqliteAdapter::in_memory().unwrap();
    store.initialize_schema().unwrap();
    let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    for (ticker, close) in [("AAPL", dec!(37.25)), ("MSFT", dec!(101.10))] {
        store
            .upsert_price(&PriceRecord {
                ticker: ticker.into(),
                close_price: close,
                date,
                user_id: None,
            })
            .unwrap();
    }
    let account = store
        .create_account(
            &NewAccount {
                username: "prop".into(),
                email: "prop@example.com".into(),
                password_hash: "x".into(),
            },
            dec!(1000.00),
        )
        .unwrap();
    (store, account.id)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn balance_and_holdings_follow_the_ledger(orders in proptest::collection::vec(arb_order(), 1..25)) {
        let (store, user_id) = seeded_store();
        let mut accepted = 0usize;

        for order in &orders {
            let before = store.get_profile(user_id).unwrap().balance;
            match store.execute_trade(user_id, order) {
                Ok(receipt) => {
                    accepted += 1;
                    let op = receipt.operation;
                    prop_assert_eq!(op.balance_before, before);
                    match op.operation_type {
                        OperationType::Buy => prop_assert_eq!(op.balance_after, before - op.total()),
                        OperationType::Sell => prop_assert_eq!(op.balance_after, before + op.total()),
                    }
                    prop_assert!(op.balance_after >= Decimal::ZERO);
                }
                Err(WalletError::Rejected(_)) => {
                    prop_assert_eq!(store.get_profile(user_id).unwrap().balance, before);
                }
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
            prop_assert_eq!(store.count_operations(user_id).unwrap(), accepted);
        }

        let ledger = store.list_operations(user_id, 0, accepted.max(1)).unwrap();
        let mut net: HashMap<String, i64> = HashMap::new();
        let mut cash = dec!(1000.00);
        for op in &ledger {
            *net.entry(op.ticker.clone()).or_default() += op.signed_quantity();
            match op.operation_type {
                OperationType::Buy => cash -= op.total(),
                OperationType::Sell => cash += op.total(),
            }
        }
        prop_assert_eq!(store.get_profile(user_id).unwrap().balance, cash);

        for holding in store.list_holdings(user_id).unwrap() {
            prop_assert!(holding.quantity >= 0);
            prop_assert_eq!(Some(&holding.quantity), net.get(&holding.ticker));
        }
        for (ticker, quantity) in &net {
            prop_assert!(*quantity >= 0, "{} went short", ticker);
        }
    }
}

#[test]
fn concurrent_trades_for_one_user_stay_consistent() {
    let dir = tempfile::tempdir().unwrap();
    let config = FileConfigAdapter::from_string(&format!(
        "[sqlite]\npath = {}\npool_size = 8\n",
        dir.path().join("race.db").display()
    ))
    .unwrap();
    let store = Arc::new(SqliteAdapter::from_config(&config).unwrap());
    store.initialize_schema().unwrap();
    store
        .upsert_price(&PriceRecord {
            ticker: "AAPL".into(),
            close_price: dec!(10.00),
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            user_id: None,
        })
        .unwrap();
    let user_id = store
        .create_account(
            &NewAccount {
                username: "racer".into(),
                email: "racer@example.com".into(),
                password_hash: "x".into(),
            },
            dec!(1000.00),
        )
        .unwrap()
        .id;
    store.execute_trade(user_id, &TradeOrder::buy("AAPL", 5)).unwrap();

    let workers: Vec<_> = (0..16)
        .map(|i| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let order = if i % 2 == 0 {
                    TradeOrder::sell("AAPL", 1)
                } else {
                    TradeOrder::buy("AAPL", 20)
                };
                store.execute_trade(user_id, &order).map(|_| ())
            })
        })
        .collect();

    let mut accepted = 0;
    for worker in workers {
        match worker.join().unwrap() {
            Ok(()) => accepted += 1,
            Err(WalletError::Rejected(_)) => {}
            Err(other) => panic!("trade failed outside validation: {other}"),
        }
    }
    assert!(accepted > 0);

    let ledger = store.list_operations(user_id, 0, 100).unwrap();
    assert_eq!(ledger.len(), accepted + 1);

    let net: i64 = ledger.iter().map(|op| op.signed_quantity()).sum();
    let spent: Decimal = ledger
        .iter()
        .map(|op| match op.operation_type {
            OperationType::Buy => op.total(),
            OperationType::Sell => -op.total(),
        })
        .sum();

    let balance = store.get_profile(user_id).unwrap().balance;
    assert!(balance >= Decimal::ZERO);
    assert_eq!(balance, dec!(1000.00) - spent);

    let holdings = store.list_holdings(user_id).unwrap();
    assert_eq!(holdings.len(), 1);
    assert_eq!(holdings[0].quantity, net);
    assert!(net >= 0);
}
