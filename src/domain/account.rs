//! User accounts and their cash profiles.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use super::error::WalletError;

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The single cash balance owned by an account.
#[derive(Debug, Clone, PartialEq)]
pub struct Profile {
    pub user_id: i64,
    pub balance: Decimal,
}

/// A validated registration, password already hashed.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Registration form as submitted.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct Registration {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub password2: String,
}

impl Registration {
    /// Every field must be filled in.
    pub fn validate(&self) -> Result<(), WalletError> {
        if self.username.trim().is_empty()
            || self.email.trim().is_empty()
            || self.password.is_empty()
        {
            return Err(WalletError::MissingFields);
        }
        Ok(())
    }

    /// Checked after the username and e-mail lookups.
    pub fn check_passwords(&self) -> Result<(), WalletError> {
        if self.password != self.password2 {
            return Err(WalletError::PasswordMismatch);
        }
        Ok(())
    }

    pub fn normalized_username(&self) -> String {
        self.username.trim().to_string()
    }

    pub fn normalized_email(&self) -> String {
        self.email.trim().to_lowercase()
    }

    pub fn into_new_account(self, password_hash: String) -> NewAccount {
        NewAccount {
            username: self.normalized_username(),
            email: self.normalized_email(),
            password_hash,
        }
    }
}
