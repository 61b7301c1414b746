//! Web server adapter.
//!
//! Axum router with askama pages, axum-login sessions and HTMX fragments for
//! the transaction history pager.

mod auth;
mod error;
mod flash;
mod handlers;
mod templates;

pub use auth::{Backend, Credentials, User, hash_password, verify_password};
pub use error::WebError;
pub use flash::{Flash, FlashLevel};

use axum::{Router, http::HeaderMap, routing::get};
use axum_login::{AuthManagerLayerBuilder, login_required};
use std::sync::Arc;
use tower_http::{services::ServeDir, trace::TraceLayer};
use tower_sessions::{Expiry, MemoryStore, SessionManagerLayer, cookie::Key};
use tracing::warn;

use crate::domain::error::WalletError;
use crate::domain::settings::WalletSettings;
use crate::ports::WalletStore;
use crate::ports::config_port::ConfigPort;
use crate::ports::market_data_port::MarketDataPort;

/// Two weeks, the usual cookie lifetime for a logged-in session.
pub const DEFAULT_SESSION_LIFETIME: i64 = 1_209_600;

pub type AuthSession = axum_login::AuthSession<Backend>;

pub struct AppState {
    pub store: Arc<dyn WalletStore>,
    pub market: Arc<dyn MarketDataPort>,
    pub config: Arc<dyn ConfigPort + Send + Sync>,
    pub settings: WalletSettings,
    /// Fetch fresh closes before rendering the home page and before trading.
    pub refresh_on_request: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn WalletStore>,
        market: Arc<dyn MarketDataPort>,
        config: Arc<dyn ConfigPort + Send + Sync>,
    ) -> Result<Self, WalletError> {
        let settings = WalletSettings::from_config(&*config)?;
        let refresh_on_request = config.get_bool("market", "refresh_on_request", true);
        Ok(Self {
            store,
            market,
            config,
            settings,
            refresh_on_request,
        })
    }
}

fn session_key(config: &dyn ConfigPort) -> Result<Key, WalletError> {
    let Some(secret) = config.get_string("auth", "session_secret") else {
        warn!("no [auth] session_secret configured, sessions will not survive a restart");
        return Ok(Key::generate());
    };

    let invalid = |reason: String| WalletError::ConfigInvalid {
        section: "auth".into(),
        key: "session_secret".into(),
        reason,
    };
    let bytes = hex::decode(secret.trim()).map_err(|e| invalid(e.to_string()))?;
    Key::try_from(bytes.as_slice()).map_err(|_| invalid("expected at least 64 bytes of hex".into()))
}

pub fn build_router(state: AppState) -> Result<Router, WalletError> {
    let key = session_key(&*state.config)?;
    let lifetime = state
        .config
        .get_int("auth", "session_lifetime", DEFAULT_SESSION_LIFETIME)
        .max(60);
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(false)
        .with_expiry(Expiry::OnInactivity(time::Duration::seconds(lifetime)))
        .with_signed(key);

    let backend = Backend::new(state.store.clone());
    let auth_layer = AuthManagerLayerBuilder::new(backend, session_layer).build();

    let static_dir = state
        .config
        .get_string("web", "static_dir")
        .unwrap_or_else(|| "static".to_string());

    let protected = Router::new()
        .route("/", get(handlers::home).post(handlers::trade))
        .route("/transaction_history/", get(handlers::transaction_history))
        .route("/wallet_details/", get(handlers::wallet_details))
        .route("/ticker/{ticker}/", get(handlers::ticker_detail))
        .route_layer(login_required!(Backend, login_url = "/login/"));

    let public = Router::new()
        .route(
            "/register/",
            get(handlers::register_form).post(handlers::register),
        )
        .route("/login/", get(handlers::login_form).post(handlers::login))
        .route("/logout/", get(handlers::logout).post(handlers::logout));

    Ok(protected
        .merge(public)
        .nest_service("/static", ServeDir::new(static_dir))
        .fallback(handlers::not_found)
        .layer(auth_layer)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state)))
}

fn is_htmx_request(headers: &HeaderMap) -> bool {
    headers.get("HX-Request").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::file_config_adapter::FileConfigAdapter;

    #[test]
    fn session_key_accepts_64_byte_hex() {
        let secret = "ab".repeat(64);
        let config =
            FileConfigAdapter::from_string(&format!("[auth]\nsession_secret = {secret}\n")).unwrap();
        assert!(session_key(&config).is_ok());
    }

    #[test]
    fn session_key_rejects_short_or_bad_hex() {
        for secret in ["abcd", "zz"] {
            let config =
                FileConfigAdapter::from_string(&format!("[auth]\nsession_secret = {secret}\n"))
                    .unwrap();
            assert!(matches!(
                session_key(&config),
                Err(WalletError::ConfigInvalid { .. })
            ));
        }
    }

    #[test]
    fn session_key_generated_when_unset() {
        let config = FileConfigAdapter::from_string("[web]\nlisten = 127.0.0.1:8000\n").unwrap();
        assert!(session_key(&config).is_ok());
    }

    #[test]
    fn htmx_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_htmx_request(&headers));
        headers.insert("HX-Request", "true".parse().unwrap());
        assert!(is_htmx_request(&headers));
    }
}
