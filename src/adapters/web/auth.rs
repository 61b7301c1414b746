//! Authentication backend for axum-login.
//!
//! Accounts live in the wallet store; passwords are Argon2id PHC strings.

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use axum_login::{AuthUser, AuthnBackend, UserId};
use rand::rngs::OsRng;
use std::sync::Arc;

use crate::domain::account::Account;
use crate::domain::error::WalletError;
use crate::ports::WalletStore;

/// Authenticated user as stored in the session.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    /// Changing the password hash invalidates existing sessions.
    pw_hash_bytes: Vec<u8>,
}

impl From<Account> for User {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            username: account.username,
            pw_hash_bytes: account.password_hash.into_bytes(),
        }
    }
}

impl AuthUser for User {
    type Id = i64;

    fn id(&self) -> i64 {
        self.id
    }

    fn session_auth_hash(&self) -> &[u8] {
        &self.pw_hash_bytes
    }
}

/// Login form fields. `next` carries the page the user was bounced from.
#[derive(Clone, serde::Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    pub next: Option<String>,
}

pub fn hash_password(password: &str) -> Result<String, WalletError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| WalletError::PasswordHash {
            reason: e.to_string(),
        })
}

/// False for a wrong password and for a hash that does not parse.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Clone)]
pub struct Backend {
    store: Arc<dyn WalletStore>,
}

impl Backend {
    pub fn new(store: Arc<dyn WalletStore>) -> Self {
        Self { store }
    }
}

impl AuthnBackend for Backend {
    type User = User;
    type Credentials = Credentials;
    type Error = WalletError;

    async fn authenticate(
        &self,
        creds: Self::Credentials,
    ) -> Result<Option<Self::User>, Self::Error> {
        let Some(account) = self.store.find_account_by_username(creds.username.trim())? else {
            return Ok(None);
        };

        if verify_password(&creds.password, &account.password_hash) {
            Ok(Some(User::from(account)))
        } else {
            Ok(None)
        }
    }

    async fn get_user(&self, user_id: &UserId<Self>) -> Result<Option<Self::User>, Self::Error> {
        Ok(self.store.find_account(*user_id)?.map(User::from))
    }
}
