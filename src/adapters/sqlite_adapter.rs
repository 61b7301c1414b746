//! SQLite store adapter.
//!
//! Decimals are stored as TEXT and timestamps as RFC 3339 strings. Trades run
//! under `BEGIN IMMEDIATE`, which takes the database write lock before the
//! balance is read.

use chrono::{DateTime, NaiveDate, Utc};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, TransactionBehavior, params};
use rust_decimal::Decimal;
use std::str::FromStr;
use tracing::{debug, info};

use crate::domain::account::{Account, NewAccount, Profile};
use crate::domain::error::WalletError;
use crate::domain::holding::{self, Holding, HoldingUpdate};
use crate::domain::market::PriceRecord;
use crate::domain::operation::{Operation, OperationType};
use crate::domain::trading::{self, TradeOrder, TradeReceipt};
use crate::ports::account_port::AccountPort;
use crate::ports::config_port::ConfigPort;
use crate::ports::ledger_port::LedgerPort;
use crate::ports::price_port::PricePort;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS profiles (
    user_id INTEGER PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    balance TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS price_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ticker TEXT NOT NULL,
    close_price TEXT NOT NULL,
    date TEXT NOT NULL,
    user_id INTEGER REFERENCES users(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_price_records_ticker ON price_records(ticker);
CREATE TABLE IF NOT EXISTS operations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    ticker TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    operation_type TEXT NOT NULL CHECK (operation_type IN ('buy', 'sell')),
    price TEXT NOT NULL,
    balance_before TEXT NOT NULL,
    balance_after TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_operations_user_ticker ON operations(user_id, ticker);
CREATE TRIGGER IF NOT EXISTS operations_append_only
    BEFORE UPDATE ON operations
    BEGIN
        SELECT RAISE(ABORT, 'operations are append-only');
    END;
CREATE TABLE IF NOT EXISTS holdings (
    user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    ticker TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    price TEXT NOT NULL,
    price_average TEXT NOT NULL,
    total TEXT NOT NULL,
    PRIMARY KEY (user_id, ticker)
);";

const OPERATION_COLUMNS: &str =
    "id, user_id, ticker, quantity, operation_type, price, balance_before, balance_after, created_at";

pub struct SqliteAdapter {
    pool: Pool<SqliteConnectionManager>,
}

fn db_err(e: r2d2::Error) -> WalletError {
    WalletError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: rusqlite::Error) -> WalletError {
    WalletError::DatabaseQuery {
        reason: e.to_string(),
    }
}

fn init_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")
}

impl SqliteAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WalletError> {
        let db_path = config
            .get_string("sqlite", "path")
            .ok_or_else(|| WalletError::ConfigMissing {
                section: "sqlite".into(),
                key: "path".into(),
            })?;

        let pool_size = config.get_int("sqlite", "pool_size", 4).max(1) as u32;

        let manager = SqliteConnectionManager::file(&db_path).with_init(init_connection);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        info!(path = %db_path, pool_size, "opened sqlite store");
        Ok(Self { pool })
    }

    pub fn in_memory() -> Result<Self, WalletError> {
        let manager = SqliteConnectionManager::memory().with_init(init_connection);
        let pool = Pool::builder().max_size(1).build(manager).map_err(db_err)?;

        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), WalletError> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA).map_err(query_err)?;
        Ok(())
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, WalletError> {
        self.pool.get().map_err(db_err)
    }
}

fn conversion_err(idx: usize, e: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn decimal_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    let text: String = row.get(idx)?;
    Decimal::from_str(&text).map_err(|e| conversion_err(idx, e))
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_err(idx, e))
}

fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| conversion_err(idx, e))
}

fn account_from_row(row: &Row<'_>) -> rusqlite::Result<Account> {
    Ok(Account {
        id: row.get(0)?,
        username: row.get(1)?,
        email: row.get(2)?,
        password_hash: row.get(3)?,
        created_at: timestamp_at(row, 4)?,
    })
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<Operation> {
    let kind: String = row.get(4)?;
    let operation_type: OperationType = kind.parse().map_err(|e: String| conversion_err(4, e))?;
    Ok(Operation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        ticker: row.get(2)?,
        quantity: row.get(3)?,
        operation_type,
        price: decimal_at(row, 5)?,
        balance_before: decimal_at(row, 6)?,
        balance_after: decimal_at(row, 7)?,
        created_at: timestamp_at(row, 8)?,
    })
}

fn price_from_row(row: &Row<'_>) -> rusqlite::Result<PriceRecord> {
    Ok(PriceRecord {
        ticker: row.get(0)?,
        close_price: decimal_at(row, 1)?,
        date: date_at(row, 2)?,
        user_id: row.get(3)?,
    })
}

fn holding_from_row(row: &Row<'_>) -> rusqlite::Result<Holding> {
    Ok(Holding {
        user_id: row.get(0)?,
        ticker: row.get(1)?,
        quantity: row.get(2)?,
        price: decimal_at(row, 3)?,
        price_average: decimal_at(row, 4)?,
        total: decimal_at(row, 5)?,
    })
}

fn collect_rows<T>(
    rows: impl Iterator<Item = rusqlite::Result<T>>,
) -> Result<Vec<T>, WalletError> {
    rows.map(|r| r.map_err(query_err)).collect()
}

fn read_balance(conn: &Connection, user_id: i64) -> Result<Decimal, WalletError> {
    conn.query_row(
        "SELECT balance FROM profiles WHERE user_id = ?1",
        params![user_id],
        |row| decimal_at(row, 0),
    )
    .optional()
    .map_err(query_err)?
    .ok_or_else(|| WalletError::NotFound {
        entity: "profile",
        key: user_id.to_string(),
    })
}

fn read_latest_price(conn: &Connection, ticker: &str) -> Result<Option<PriceRecord>, WalletError> {
    conn.query_row(
        "SELECT ticker, close_price, date, user_id FROM price_records
         WHERE ticker = ?1
         ORDER BY date DESC, id DESC
         LIMIT 1",
        params![ticker],
        price_from_row,
    )
    .optional()
    .map_err(query_err)
}

fn read_ledger(conn: &Connection, user_id: i64, ticker: &str) -> Result<Vec<Operation>, WalletError> {
    let query = format!(
        "SELECT {OPERATION_COLUMNS} FROM operations WHERE user_id = ?1 AND ticker = ?2 ORDER BY id ASC"
    );
    let mut stmt = conn.prepare(&query).map_err(query_err)?;
    let rows = stmt
        .query_map(params![user_id, ticker], operation_from_row)
        .map_err(query_err)?;
    collect_rows(rows)
}

fn apply_holding(conn: &Connection, update: &HoldingUpdate) -> Result<(), WalletError> {
    match update {
        HoldingUpdate::Upsert(h) => {
            conn.execute(
                "INSERT INTO holdings (user_id, ticker, quantity, price, price_average, total)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(user_id, ticker) DO UPDATE SET
                    quantity = excluded.quantity,
                    price = excluded.price,
                    price_average = excluded.price_average,
                    total = excluded.total",
                params![
                    h.user_id,
                    h.ticker,
                    h.quantity,
                    h.price.to_string(),
                    h.price_average.to_string(),
                    h.total.to_string()
                ],
            )
            .map_err(query_err)?;
        }
        HoldingUpdate::Remove { user_id, ticker } => {
            conn.execute(
                "DELETE FROM holdings WHERE user_id = ?1 AND ticker = ?2",
                params![user_id, ticker],
            )
            .map_err(query_err)?;
        }
    }
    Ok(())
}

fn exists(conn: &Connection, query: &str, value: &str) -> Result<bool, WalletError> {
    conn.query_row(query, params![value], |row| row.get(0))
        .map_err(query_err)
}

impl AccountPort for SqliteAdapter {
    fn create_account(
        &self,
        account: &NewAccount,
        starting_balance: Decimal,
    ) -> Result<Account, WalletError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        if exists(
            &tx,
            "SELECT EXISTS(SELECT 1 FROM users WHERE username = ?1)",
            &account.username,
        )? {
            return Err(WalletError::DuplicateUsername {
                username: account.username.clone(),
            });
        }
        if exists(
            &tx,
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            &account.email,
        )? {
            return Err(WalletError::DuplicateEmail {
                email: account.email.clone(),
            });
        }

        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO users (username, email, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                account.username,
                account.email,
                account.password_hash,
                created_at.to_rfc3339()
            ],
        )
        .map_err(query_err)?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO profiles (user_id, balance) VALUES (?1, ?2)",
            params![id, starting_balance.to_string()],
        )
        .map_err(query_err)?;

        tx.commit().map_err(query_err)?;
        info!(user_id = id, username = %account.username, "account created");

        Ok(Account {
            id,
            username: account.username.clone(),
            email: account.email.clone(),
            password_hash: account.password_hash.clone(),
            created_at,
        })
    }

    fn find_account(&self, user_id: i64) -> Result<Option<Account>, WalletError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE id = ?1",
            params![user_id],
            account_from_row,
        )
        .optional()
        .map_err(query_err)
    }

    fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, WalletError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE username = ?1",
            params![username],
            account_from_row,
        )
        .optional()
        .map_err(query_err)
    }

    fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, WalletError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, username, email, password_hash, created_at FROM users WHERE email = ?1",
            params![email],
            account_from_row,
        )
        .optional()
        .map_err(query_err)
    }

    fn get_profile(&self, user_id: i64) -> Result<Profile, WalletError> {
        let conn = self.conn()?;
        let balance = read_balance(&conn, user_id)?;
        Ok(Profile { user_id, balance })
    }

    fn list_accounts(&self) -> Result<Vec<(Account, Profile)>, WalletError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT u.id, u.username, u.email, u.password_hash, u.created_at, p.balance
                 FROM users u JOIN profiles p ON p.user_id = u.id
                 ORDER BY u.username",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map([], |row| {
                let account = account_from_row(row)?;
                let profile = Profile {
                    user_id: account.id,
                    balance: decimal_at(row, 5)?,
                };
                Ok((account, profile))
            })
            .map_err(query_err)?;
        collect_rows(rows)
    }
}

impl PricePort for SqliteAdapter {
    fn upsert_price(&self, record: &PriceRecord) -> Result<(), WalletError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(query_err)?;
        let date = record.date.format("%Y-%m-%d").to_string();

        let updated = tx
            .execute(
                "UPDATE price_records SET close_price = ?1, date = ?2
                 WHERE ticker = ?3 AND user_id IS ?4",
                params![
                    record.close_price.to_string(),
                    date,
                    record.ticker,
                    record.user_id
                ],
            )
            .map_err(query_err)?;

        if updated == 0 {
            tx.execute(
                "INSERT INTO price_records (ticker, close_price, date, user_id)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    record.ticker,
                    record.close_price.to_string(),
                    date,
                    record.user_id
                ],
            )
            .map_err(query_err)?;
        }

        tx.commit().map_err(query_err)?;
        debug!(ticker = %record.ticker, close = %record.close_price, "price stored");
        Ok(())
    }

    fn latest_price(&self, ticker: &str) -> Result<Option<PriceRecord>, WalletError> {
        let conn = self.conn()?;
        read_latest_price(&conn, ticker)
    }
}

impl LedgerPort for SqliteAdapter {
    fn execute_trade(&self, user_id: i64, order: &TradeOrder) -> Result<TradeReceipt, WalletError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let balance = read_balance(&tx, user_id)?;
        let latest_price = read_latest_price(&tx, &order.ticker)?.map(|p| p.close_price);
        let mut ledger = read_ledger(&tx, user_id, &order.ticker)?;
        let net_held = holding::net_quantity(&ledger);

        let settlement = trading::settle(order, latest_price, balance, net_held)?;

        tx.execute(
            "UPDATE profiles SET balance = ?1 WHERE user_id = ?2",
            params![settlement.balance_after.to_string(), user_id],
        )
        .map_err(query_err)?;

        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO operations
                (user_id, ticker, quantity, operation_type, price, balance_before, balance_after, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                user_id,
                order.ticker,
                order.quantity,
                order.side.as_str(),
                settlement.price.to_string(),
                settlement.balance_before.to_string(),
                settlement.balance_after.to_string(),
                created_at.to_rfc3339()
            ],
        )
        .map_err(query_err)?;

        let operation = Operation {
            id: tx.last_insert_rowid(),
            user_id,
            ticker: order.ticker.clone(),
            quantity: order.quantity,
            operation_type: order.side,
            price: settlement.price,
            balance_before: settlement.balance_before,
            balance_after: settlement.balance_after,
            created_at,
        };
        ledger.push(operation.clone());

        let update = holding::rebuild_holding(user_id, &order.ticker, &ledger, latest_price);
        apply_holding(&tx, &update)?;

        tx.commit().map_err(query_err)?;
        info!(
            user_id,
            ticker = %order.ticker,
            side = %order.side,
            quantity = order.quantity,
            price = %settlement.price,
            "trade executed"
        );

        Ok(TradeReceipt {
            operation,
            holding: update,
        })
    }

    fn rebuild_holding(&self, user_id: i64, ticker: &str) -> Result<HoldingUpdate, WalletError> {
        let mut conn = self.conn()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(query_err)?;

        let ledger = read_ledger(&tx, user_id, ticker)?;
        let latest_price = read_latest_price(&tx, ticker)?.map(|p| p.close_price);
        let update = holding::rebuild_holding(user_id, ticker, &ledger, latest_price);
        apply_holding(&tx, &update)?;

        tx.commit().map_err(query_err)?;
        Ok(update)
    }

    fn traded_tickers(&self, user_id: i64) -> Result<Vec<String>, WalletError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT DISTINCT ticker FROM operations WHERE user_id = ?1 ORDER BY ticker")
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![user_id], |row| row.get(0))
            .map_err(query_err)?;
        collect_rows(rows)
    }

    fn count_operations(&self, user_id: i64) -> Result<usize, WalletError> {
        let conn = self.conn()?;
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM operations WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .map_err(query_err)?;
        Ok(count as usize)
    }

    fn list_operations(
        &self,
        user_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Operation>, WalletError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE user_id = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3"
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![user_id, limit as i64, offset as i64],
                operation_from_row,
            )
            .map_err(query_err)?;
        collect_rows(rows)
    }

    fn recent_operations(
        &self,
        user_id: i64,
        side: OperationType,
        limit: usize,
    ) -> Result<Vec<Operation>, WalletError> {
        let conn = self.conn()?;
        let query = format!(
            "SELECT {OPERATION_COLUMNS} FROM operations WHERE user_id = ?1 AND operation_type = ?2
             ORDER BY id DESC LIMIT ?3"
        );
        let mut stmt = conn.prepare(&query).map_err(query_err)?;
        let rows = stmt
            .query_map(
                params![user_id, side.as_str(), limit as i64],
                operation_from_row,
            )
            .map_err(query_err)?;
        collect_rows(rows)
    }

    fn list_holdings(&self, user_id: i64) -> Result<Vec<Holding>, WalletError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT user_id, ticker, quantity, price, price_average, total
                 FROM holdings WHERE user_id = ?1 ORDER BY ticker",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![user_id], holding_from_row)
            .map_err(query_err)?;
        collect_rows(rows)
    }
}
