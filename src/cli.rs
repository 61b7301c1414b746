//! CLI definition and dispatch.

use chrono::Utc;
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

use crate::adapters::backup::{self, BackupError, DatabaseInfo};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::adapters::web::{AppState, build_router};
use crate::adapters::yahoo_adapter::YahooAdapter;
use crate::domain::error::WalletError;
use crate::domain::market;
use crate::domain::money::format_money;
use crate::domain::settings::WalletSettings;
use crate::ports::WalletStore;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataPort;

const DEFAULT_LISTEN: &str = "127.0.0.1:8000";

#[derive(Parser, Debug)]
#[command(name = "papertrade", about = "Stock trading simulator with virtual balances")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the web server
    Serve {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Create the database schema
    InitDb {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Fetch the latest close for every configured ticker
    RefreshPrices {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// List accounts with their balances
    ListAccounts {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Rebuild a user's holdings from their operations
    RebuildHoldings {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(short, long)]
        username: String,
    },
    /// Dump the database and encrypt it with gpg
    Backup {
        #[arg(short, long)]
        config: PathBuf,
        /// Directory for the backup file (defaults to [backup] dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// gpg recipient, repeatable (defaults to [backup] recipients)
        #[arg(short, long = "recipient")]
        recipients: Vec<String>,
    },
    /// Decrypt a backup into an empty database
    Restore {
        #[arg(short, long)]
        config: PathBuf,
        /// Backup file path or file:// URL
        #[arg(short, long)]
        from: String,
    },
}

pub fn run(cli: Cli) -> ExitCode {
    let result = match cli.command {
        Command::Serve { config } => run_serve(&config),
        Command::InitDb { config } => run_init_db(&config),
        Command::RefreshPrices { config } => run_refresh_prices(&config),
        Command::ListAccounts { config } => run_list_accounts(&config),
        Command::RebuildHoldings { config, username } => run_rebuild_holdings(&config, &username),
        Command::Backup {
            config,
            dir,
            recipients,
        } => return run_backup(&config, dir, recipients),
        Command::Restore { config, from } => return run_restore(&config, &from),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &Path) -> Result<FileConfigAdapter, WalletError> {
    eprintln!("Loading config from {}", path.display());
    FileConfigAdapter::from_file(path)
}

/// Opens the store named by `[database] backend` and makes sure its schema exists.
pub fn open_store(config: &dyn ConfigPort) -> Result<Arc<dyn WalletStore>, WalletError> {
    let backend = config
        .get_string("database", "backend")
        .unwrap_or_else(|| "sqlite".to_string())
        .trim()
        .to_lowercase();

    match backend.as_str() {
        #[cfg(feature = "sqlite")]
        "sqlite" | "sqlite3" => {
            let store = crate::adapters::sqlite_adapter::SqliteAdapter::from_config(config)?;
            store.initialize_schema()?;
            Ok(Arc::new(store))
        }
        #[cfg(feature = "postgres")]
        "postgres" | "postgresql" => {
            let store = crate::adapters::postgres_adapter::PostgresAdapter::from_config(config)?;
            store.initialize_schema()?;
            Ok(Arc::new(store))
        }
        other => Err(WalletError::ConfigInvalid {
            section: "database".into(),
            key: "backend".into(),
            reason: format!("'{other}' is not a backend this build supports"),
        }),
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, WalletError> {
    Ok(tokio::runtime::Runtime::new()?)
}

pub fn listen_addr(config: &dyn ConfigPort) -> Result<SocketAddr, WalletError> {
    config
        .get_string("web", "listen")
        .unwrap_or_else(|| DEFAULT_LISTEN.to_string())
        .trim()
        .parse()
        .map_err(|e: std::net::AddrParseError| WalletError::ConfigInvalid {
            section: "web".into(),
            key: "listen".into(),
            reason: e.to_string(),
        })
}

fn run_serve(config_path: &Path) -> Result<(), WalletError> {
    let config = load_config(config_path)?;
    let addr = listen_addr(&config)?;
    let store = open_store(&config)?;
    let market: Arc<dyn MarketDataPort> = Arc::new(YahooAdapter::new()?);

    let state = AppState::new(store, market, Arc::new(config))?;
    let router = build_router(state)?;

    eprintln!("Starting web server on {addr}");
    runtime()?.block_on(async {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "listening");
        axum::serve(listener, router).await
    })?;
    Ok(())
}

fn run_init_db(config_path: &Path) -> Result<(), WalletError> {
    let config = load_config(config_path)?;
    open_store(&config)?;
    eprintln!("Database schema is ready");
    Ok(())
}

fn run_refresh_prices(config_path: &Path) -> Result<(), WalletError> {
    let config = load_config(config_path)?;
    let settings = WalletSettings::from_config(&config)?;
    let store = open_store(&config)?;
    let market = YahooAdapter::new()?;

    let today = Utc::now().date_naive();
    let summary = runtime()?.block_on(market::refresh_prices(
        &market,
        store.as_ref(),
        &settings.tickers,
        today,
    ))?;

    for ticker in &summary.updated {
        if let Some(record) = store.latest_price(ticker)? {
            println!("{:<10} {:>12}", record.ticker, format_money(record.close_price));
        }
    }
    for ticker in &summary.skipped {
        eprintln!("warning: no price for {ticker}");
    }
    Ok(())
}

fn run_list_accounts(config_path: &Path) -> Result<(), WalletError> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let accounts = store.list_accounts()?;

    println!("{:<20} {:<30} {:>15}  {}", "USERNAME", "EMAIL", "BALANCE", "JOINED");
    for (account, profile) in &accounts {
        println!(
            "{:<20} {:<30} {:>15}  {}",
            account.username,
            account.email,
            format_money(profile.balance),
            account.created_at.format("%Y-%m-%d"),
        );
    }
    eprintln!("{} account(s)", accounts.len());
    Ok(())
}

fn run_rebuild_holdings(config_path: &Path, username: &str) -> Result<(), WalletError> {
    let config = load_config(config_path)?;
    let store = open_store(&config)?;
    let account = store
        .find_account_by_username(username)?
        .ok_or_else(|| WalletError::NotFound {
            entity: "user",
            key: username.to_string(),
        })?;

    for ticker in store.traded_tickers(account.id)? {
        match store.rebuild_holding(account.id, &ticker)?.quantity() {
            Some(quantity) => println!("{ticker:<10} {quantity:>8}"),
            None => println!("{ticker:<10} removed"),
        }
    }
    Ok(())
}

fn backup_failed(err: &BackupError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

fn config_failed(err: &WalletError) -> ExitCode {
    eprintln!("error: {err}");
    err.into()
}

/// Recipients from the command line, else the `[backup] recipients` list.
pub fn resolve_recipients(cli: Vec<String>, config: &dyn ConfigPort) -> Vec<String> {
    if !cli.is_empty() {
        return cli;
    }
    config
        .get_string("backup", "recipients")
        .map(|list| {
            list.split([',', ' '])
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

fn gpg_home(config: &dyn ConfigPort) -> Option<PathBuf> {
    config
        .get_string("backup", "gpg_home")
        .filter(|h| !h.trim().is_empty())
        .map(PathBuf::from)
}

fn run_backup(config_path: &Path, dir: Option<PathBuf>, recipients: Vec<String>) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => return config_failed(&e),
    };
    let info = match DatabaseInfo::from_config(&config) {
        Ok(i) => i,
        Err(e) => return config_failed(&e),
    };

    let recipients = resolve_recipients(recipients, &config);
    let dir = dir
        .or_else(|| config.get_string("backup", "dir").map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("."));

    match backup::backup(&info, &recipients, &dir, gpg_home(&config)) {
        Ok(path) => {
            println!("{}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => backup_failed(&e),
    }
}

fn run_restore(config_path: &Path, from: &str) -> ExitCode {
    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => return config_failed(&e),
    };
    let info = match DatabaseInfo::from_config(&config) {
        Ok(i) => i,
        Err(e) => return config_failed(&e),
    };

    match backup::restore(&info, from, gpg_home(&config)) {
        Ok(()) => {
            eprintln!("Restored {} from {from}", info.name);
            ExitCode::SUCCESS
        }
        Err(e) => backup_failed(&e),
    }
}
