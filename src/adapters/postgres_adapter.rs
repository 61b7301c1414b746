//! PostgreSQL store adapter.
//!
//! Money columns are `NUMERIC(15, 2)`. A trade locks the caller's profile row
//! with `SELECT ... FOR UPDATE`, which serialises concurrent trades per user.

use chrono::{DateTime, Utc};
use postgres::error::SqlState;
use postgres::{GenericClient, NoTls, Row};
use r2d2::{Pool, PooledConnection};
use r2d2_postgres::PostgresConnectionManager;
use rust_decimal::Decimal;
use tokio::runtime::{Handle, RuntimeFlavor};
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
    id BIGSERIAL PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE TABLE IF NOT EXISTS profiles (
    user_id BIGINT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
    balance NUMERIC(15, 2) NOT NULL
);
CREATE TABLE IF NOT EXISTS price_records (
    id BIGSERIAL PRIMARY KEY,
    ticker TEXT NOT NULL,
    close_price NUMERIC(15, 2) NOT NULL,
    date DATE NOT NULL,
    user_id BIGINT REFERENCES users(id) ON DELETE CASCADE
);
CREATE INDEX IF NOT EXISTS idx_price_records_ticker ON price_records(ticker);
CREATE TABLE IF NOT EXISTS operations (
    id BIGSERIAL PRIMARY KEY,
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    ticker TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    operation_type TEXT NOT NULL CHECK (operation_type IN ('buy', 'sell')),
    price NUMERIC(15, 2) NOT NULL,
    balance_before NUMERIC(15, 2) NOT NULL,
    balance_after NUMERIC(15, 2) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS idx_operations_user_ticker ON operations(user_id, ticker);
CREATE OR REPLACE FUNCTION operations_append_only() RETURNS trigger AS $$
BEGIN
    RAISE EXCEPTION 'operations are append-only';
END;
$$ LANGUAGE plpgsql;
DO $$
BEGIN
    IF NOT EXISTS (SELECT 1 FROM pg_trigger WHERE tgname = 'operations_append_only') THEN
        CREATE TRIGGER operations_append_only
            BEFORE UPDATE ON operations
            FOR EACH ROW EXECUTE FUNCTION operations_append_only();
    END IF;
END;
$$;
CREATE TABLE IF NOT EXISTS holdings (
    user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    ticker TEXT NOT NULL,
    quantity BIGINT NOT NULL,
    price NUMERIC(15, 2) NOT NULL,
    price_average NUMERIC(15, 2) NOT NULL,
    total NUMERIC(15, 2) NOT NULL,
    PRIMARY KEY (user_id, ticker)
);";

const OPERATION_COLUMNS: &str =
    "id, user_id, ticker, quantity, operation_type, price, balance_before, balance_after, created_at";

type PgPool = Pool<PostgresConnectionManager<NoTls>>;

pub struct PostgresAdapter {
    pool: PgPool,
}

/// The sync client drives its own runtime, which tokio refuses to nest inside a
/// worker thread. Async callers on a multi-thread runtime hand the thread over first.
fn blocking<T>(f: impl FnOnce() -> T) -> T {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(f)
        }
        _ => f(),
    }
}

fn db_err(e: impl std::fmt::Display) -> WalletError {
    WalletError::Database {
        reason: e.to_string(),
    }
}

fn query_err(e: postgres::Error) -> WalletError {
    WalletError::DatabaseQuery {
        reason: e.to_string(),
    }
}

/// A registration racing another one past the `EXISTS` checks lands on the
/// UNIQUE constraint instead.
fn insert_user_err(e: postgres::Error, account: &NewAccount) -> WalletError {
    if e.code() != Some(&SqlState::UNIQUE_VIOLATION) {
        return query_err(e);
    }
    let constraint = e.as_db_error().and_then(|db| db.constraint());
    duplicate_for_constraint(constraint, account)
}

fn duplicate_for_constraint(constraint: Option<&str>, account: &NewAccount) -> WalletError {
    match constraint {
        Some(name) if name.contains("email") => WalletError::DuplicateEmail {
            email: account.email.clone(),
        },
        _ => WalletError::DuplicateUsername {
            username: account.username.clone(),
        },
    }
}

impl PostgresAdapter {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, WalletError> {
        let connection_string = config.require_string("postgres", "connection_string")?;
        let pool_size = config.get_int("postgres", "pool_size", 4).max(1) as u32;

        let pg_config: postgres::Config = connection_string.parse().map_err(db_err)?;
        let manager = PostgresConnectionManager::new(pg_config, NoTls);
        let pool = Pool::builder()
            .max_size(pool_size)
            .build(manager)
            .map_err(db_err)?;

        info!(pool_size, "opened postgres store");
        Ok(Self { pool })
    }

    pub fn initialize_schema(&self) -> Result<(), WalletError> {
        let mut conn = self.conn()?;
        conn.batch_execute(SCHEMA).map_err(query_err)
    }

    fn conn(&self) -> Result<PooledConnection<PostgresConnectionManager<NoTls>>, WalletError> {
        self.pool.get().map_err(db_err)
    }
}

fn account_from_row(row: &Row) -> Account {
    Account {
        id: row.get(0),
        username: row.get(1),
        email: row.get(2),
        password_hash: row.get(3),
        created_at: row.get(4),
    }
}

fn operation_from_row(row: &Row) -> Result<Operation, WalletError> {
    let kind: String = row.get(4);
    let operation_type: OperationType = kind
        .parse()
        .map_err(|reason| WalletError::DatabaseQuery { reason })?;
    Ok(Operation {
        id: row.get(0),
        user_id: row.get(1),
        ticker: row.get(2),
        quantity: row.get(3),
        operation_type,
        price: row.get(5),
        balance_before: row.get(6),
        balance_after: row.get(7),
        created_at: row.get(8),
    })
}

fn price_from_row(row: &Row) -> PriceRecord {
    PriceRecord {
        ticker: row.get(0),
        close_price: row.get(1),
        date: row.get(2),
        user_id: row.get(3),
    }
}

fn holding_from_row(row: &Row) -> Holding {
    Holding {
        user_id: row.get(0),
        ticker: row.get(1),
        quantity: row.get(2),
        price: row.get(3),
        price_average: row.get(4),
        total: row.get(5),
    }
}

fn read_latest_price(
    client: &mut impl GenericClient,
    ticker: &str,
) -> Result<Option<PriceRecord>, WalletError> {
    let row = client
        .query_opt(
            "SELECT ticker, close_price, date, user_id FROM price_records
             WHERE ticker = $1
             ORDER BY date DESC, id DESC
             LIMIT 1",
            &[&ticker],
        )
        .map_err(query_err)?;
    Ok(row.as_ref().map(price_from_row))
}

fn read_ledger(
    client: &mut impl GenericClient,
    user_id: i64,
    ticker: &str,
) -> Result<Vec<Operation>, WalletError> {
    let query = format!(
        "SELECT {OPERATION_COLUMNS} FROM operations WHERE user_id = $1 AND ticker = $2 ORDER BY id ASC"
    );
    client
        .query(&query, &[&user_id, &ticker])
        .map_err(query_err)?
        .iter()
        .map(operation_from_row)
        .collect()
}

fn lock_balance(client: &mut impl GenericClient, user_id: i64) -> Result<Decimal, WalletError> {
    let row = client
        .query_opt(
            "SELECT balance FROM profiles WHERE user_id = $1 FOR UPDATE",
            &[&user_id],
        )
        .map_err(query_err)?
        .ok_or_else(|| WalletError::NotFound {
            entity: "profile",
            key: user_id.to_string(),
        })?;
    Ok(row.get(0))
}

fn apply_holding(client: &mut impl GenericClient, update: &HoldingUpdate) -> Result<(), WalletError> {
    match update {
        HoldingUpdate::Upsert(h) => {
            client
                .execute(
                    "INSERT INTO holdings (user_id, ticker, quantity, price, price_average, total)
                     VALUES ($1, $2, $3, $4, $5, $6)
                     ON CONFLICT (user_id, ticker) DO UPDATE SET
                        quantity = EXCLUDED.quantity,
                        price = EXCLUDED.price,
                        price_average = EXCLUDED.price_average,
                        total = EXCLUDED.total",
                    &[
                        &h.user_id,
                        &h.ticker,
                        &h.quantity,
                        &h.price,
                        &h.price_average,
                        &h.total,
                    ],
                )
                .map_err(query_err)?;
        }
        HoldingUpdate::Remove { user_id, ticker } => {
            client
                .execute(
                    "DELETE FROM holdings WHERE user_id = $1 AND ticker = $2",
                    &[user_id, ticker],
                )
                .map_err(query_err)?;
        }
    }
    Ok(())
}

impl AccountPort for PostgresAdapter {
    fn create_account(
        &self,
        account: &NewAccount,
        starting_balance: Decimal,
    ) -> Result<Account, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let mut tx = conn.transaction().map_err(query_err)?;

            let taken: bool = tx
                .query_one(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE username = $1)",
                    &[&account.username],
                )
                .map_err(query_err)?
                .get(0);
            if taken {
                return Err(WalletError::DuplicateUsername {
                    username: account.username.clone(),
                });
            }
            let taken: bool = tx
                .query_one(
                    "SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)",
                    &[&account.email],
                )
                .map_err(query_err)?
                .get(0);
            if taken {
                return Err(WalletError::DuplicateEmail {
                    email: account.email.clone(),
                });
            }

            let row = tx
                .query_one(
                    "INSERT INTO users (username, email, password_hash)
                     VALUES ($1, $2, $3)
                     RETURNING id, username, email, password_hash, created_at",
                    &[&account.username, &account.email, &account.password_hash],
                )
                .map_err(|e| insert_user_err(e, account))?;
            let created = account_from_row(&row);

            tx.execute(
                "INSERT INTO profiles (user_id, balance) VALUES ($1, $2)",
                &[&created.id, &starting_balance],
            )
            .map_err(query_err)?;

            tx.commit().map_err(query_err)?;
            info!(user_id = created.id, username = %created.username, "account created");
            Ok(created)
        })
    }

    fn find_account(&self, user_id: i64) -> Result<Option<Account>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let row = conn
                .query_opt(
                    "SELECT id, username, email, password_hash, created_at FROM users WHERE id = $1",
                    &[&user_id],
                )
                .map_err(query_err)?;
            Ok(row.as_ref().map(account_from_row))
        })
    }

    fn find_account_by_username(&self, username: &str) -> Result<Option<Account>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let row = conn
                .query_opt(
                    "SELECT id, username, email, password_hash, created_at FROM users WHERE username = $1",
                    &[&username],
                )
                .map_err(query_err)?;
            Ok(row.as_ref().map(account_from_row))
        })
    }

    fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let row = conn
                .query_opt(
                    "SELECT id, username, email, password_hash, created_at FROM users WHERE email = $1",
                    &[&email],
                )
                .map_err(query_err)?;
            Ok(row.as_ref().map(account_from_row))
        })
    }

    fn get_profile(&self, user_id: i64) -> Result<Profile, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let row = conn
                .query_opt("SELECT balance FROM profiles WHERE user_id = $1", &[&user_id])
                .map_err(query_err)?
                .ok_or_else(|| WalletError::NotFound {
                    entity: "profile",
                    key: user_id.to_string(),
                })?;
            Ok(Profile {
                user_id,
                balance: row.get(0),
            })
        })
    }

    fn list_accounts(&self) -> Result<Vec<(Account, Profile)>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let rows = conn
                .query(
                    "SELECT u.id, u.username, u.email, u.password_hash, u.created_at, p.balance
                     FROM users u JOIN profiles p ON p.user_id = u.id
                     ORDER BY u.username",
                    &[],
                )
                .map_err(query_err)?;
            Ok(rows
                .iter()
                .map(|row| {
                    let account = account_from_row(row);
                    let profile = Profile {
                        user_id: account.id,
                        balance: row.get(5),
                    };
                    (account, profile)
                })
                .collect())
        })
    }
}

impl PricePort for PostgresAdapter {
    fn upsert_price(&self, record: &PriceRecord) -> Result<(), WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let mut tx = conn.transaction().map_err(query_err)?;

            let updated = tx
                .execute(
                    "UPDATE price_records SET close_price = $1, date = $2
                     WHERE ticker = $3 AND user_id IS NOT DISTINCT FROM $4",
                    &[&record.close_price, &record.date, &record.ticker, &record.user_id],
                )
                .map_err(query_err)?;

            if updated == 0 {
                tx.execute(
                    "INSERT INTO price_records (ticker, close_price, date, user_id)
                     VALUES ($1, $2, $3, $4)",
                    &[&record.ticker, &record.close_price, &record.date, &record.user_id],
                )
                .map_err(query_err)?;
            }

            tx.commit().map_err(query_err)?;
            debug!(ticker = %record.ticker, close = %record.close_price, "price stored");
            Ok(())
        })
    }

    fn latest_price(&self, ticker: &str) -> Result<Option<PriceRecord>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            read_latest_price(&mut *conn, ticker)
        })
    }
}

impl LedgerPort for PostgresAdapter {
    fn execute_trade(&self, user_id: i64, order: &TradeOrder) -> Result<TradeReceipt, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let mut tx = conn.transaction().map_err(query_err)?;

            let balance = lock_balance(&mut tx, user_id)?;
            let latest_price = read_latest_price(&mut tx, &order.ticker)?.map(|p| p.close_price);
            let mut ledger = read_ledger(&mut tx, user_id, &order.ticker)?;
            let net_held = holding::net_quantity(&ledger);

            let settlement = trading::settle(order, latest_price, balance, net_held)?;

            tx.execute(
                "UPDATE profiles SET balance = $1 WHERE user_id = $2",
                &[&settlement.balance_after, &user_id],
            )
            .map_err(query_err)?;

            let row = tx
                .query_one(
                    "INSERT INTO operations
                        (user_id, ticker, quantity, operation_type, price, balance_before, balance_after)
                     VALUES ($1, $2, $3, $4, $5, $6, $7)
                     RETURNING id, created_at",
                    &[
                        &user_id,
                        &order.ticker,
                        &order.quantity,
                        &order.side.as_str(),
                        &settlement.price,
                        &settlement.balance_before,
                        &settlement.balance_after,
                    ],
                )
                .map_err(query_err)?;
            let created_at: DateTime<Utc> = row.get(1);

            let operation = Operation {
                id: row.get(0),
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
            apply_holding(&mut tx, &update)?;

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
        })
    }

    fn rebuild_holding(&self, user_id: i64, ticker: &str) -> Result<HoldingUpdate, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let mut tx = conn.transaction().map_err(query_err)?;

            lock_balance(&mut tx, user_id)?;
            let ledger = read_ledger(&mut tx, user_id, ticker)?;
            let latest_price = read_latest_price(&mut tx, ticker)?.map(|p| p.close_price);
            let update = holding::rebuild_holding(user_id, ticker, &ledger, latest_price);
            apply_holding(&mut tx, &update)?;

            tx.commit().map_err(query_err)?;
            Ok(update)
        })
    }

    fn traded_tickers(&self, user_id: i64) -> Result<Vec<String>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let rows = conn
                .query(
                    "SELECT DISTINCT ticker FROM operations WHERE user_id = $1 ORDER BY ticker",
                    &[&user_id],
                )
                .map_err(query_err)?;
            Ok(rows.iter().map(|row| row.get(0)).collect())
        })
    }

    fn count_operations(&self, user_id: i64) -> Result<usize, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let count: i64 = conn
                .query_one(
                    "SELECT COUNT(*) FROM operations WHERE user_id = $1",
                    &[&user_id],
                )
                .map_err(query_err)?
                .get(0);
            Ok(count as usize)
        })
    }

    fn list_operations(
        &self,
        user_id: i64,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Operation>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let query = format!(
                "SELECT {OPERATION_COLUMNS} FROM operations WHERE user_id = $1
                 ORDER BY id DESC LIMIT $2 OFFSET $3"
            );
            conn.query(&query, &[&user_id, &(limit as i64), &(offset as i64)])
                .map_err(query_err)?
                .iter()
                .map(operation_from_row)
                .collect()
        })
    }

    fn recent_operations(
        &self,
        user_id: i64,
        side: OperationType,
        limit: usize,
    ) -> Result<Vec<Operation>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let query = format!(
                "SELECT {OPERATION_COLUMNS} FROM operations WHERE user_id = $1 AND operation_type = $2
                 ORDER BY id DESC LIMIT $3"
            );
            conn.query(&query, &[&user_id, &side.as_str(), &(limit as i64)])
                .map_err(query_err)?
                .iter()
                .map(operation_from_row)
                .collect()
        })
    }

    fn list_holdings(&self, user_id: i64) -> Result<Vec<Holding>, WalletError> {
        blocking(|| {
            let mut conn = self.conn()?;
            let rows = conn
                .query(
                    "SELECT user_id, ticker, quantity, price, price_average, total
                     FROM holdings WHERE user_id = $1 ORDER BY ticker",
                    &[&user_id],
                )
                .map_err(query_err)?;
            Ok(rows.iter().map(holding_from_row).collect())
        })
    }
}
