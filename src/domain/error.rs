//! Domain error types.

use rust_decimal::Decimal;

/// Reasons a trade order is refused. The `Display` text is what the user sees.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TradeRejection {
    #[error("Ticker doesn't exist or invalid quantity!")]
    InvalidOrder,

    #[error("Select an operation: buy or sell.")]
    UnknownOperation { operation: String },

    #[error("Ticker not found in stock data.")]
    NoPriceForBuy { ticker: String },

    #[error("Stock data not found or invalid quantity.")]
    NoPriceForSell { ticker: String },

    #[error("Insufficient balance to make the purchase.")]
    InsufficientBalance { needed: Decimal, available: Decimal },

    #[error("Insufficient tickets to make the sale.")]
    InsufficientHoldings { held: i64, requested: i64 },
}

/// Top-level error type for papertrade.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("database error: {reason}")]
    Database { reason: String },

    #[error("database query error: {reason}")]
    DatabaseQuery { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error(transparent)]
    Rejected(#[from] TradeRejection),

    #[error("Please fill all the fields")]
    MissingFields,

    #[error("This username already exists!")]
    DuplicateUsername { username: String },

    #[error("This e-mail already in use!")]
    DuplicateEmail { email: String },

    #[error("The passwords are different!")]
    PasswordMismatch,

    #[error("password hashing failed: {reason}")]
    PasswordHash { reason: String },

    #[error("no {entity} found for {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("market data error for {ticker}: {reason}")]
    MarketData { ticker: String, reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl WalletError {
    /// True for failures caused by what the user typed rather than by the system.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            WalletError::Rejected(_)
                | WalletError::MissingFields
                | WalletError::DuplicateUsername { .. }
                | WalletError::DuplicateEmail { .. }
                | WalletError::PasswordMismatch
        )
    }
}

impl From<&WalletError> for std::process::ExitCode {
    fn from(err: &WalletError) -> Self {
        let code: u8 = match err {
            WalletError::Io(_) => 1,
            WalletError::ConfigParse { .. }
            | WalletError::ConfigMissing { .. }
            | WalletError::ConfigInvalid { .. } => 2,
            WalletError::Database { .. }
            | WalletError::DatabaseQuery { .. }
            | WalletError::NotFound { .. } => 3,
            WalletError::Rejected(_)
            | WalletError::MissingFields
            | WalletError::DuplicateUsername { .. }
            | WalletError::DuplicateEmail { .. }
            | WalletError::PasswordMismatch
            | WalletError::PasswordHash { .. } => 4,
            WalletError::MarketData { .. } => 5,
        };
        std::process::ExitCode::from(code)
    }
}
