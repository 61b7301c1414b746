//! HTTP error responses for the web adapter.

use askama::Template;
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use tracing::error;

use crate::domain::error::WalletError;

#[derive(Debug)]
pub struct WebError {
    pub status: StatusCode,
    pub message: String,
}

impl WebError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

pub fn status_from_error(err: &WalletError) -> StatusCode {
    match err {
        e if e.is_user_facing() => StatusCode::BAD_REQUEST,
        WalletError::NotFound { .. } => StatusCode::NOT_FOUND,
        WalletError::MarketData { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<WalletError> for WebError {
    fn from(err: WalletError) -> Self {
        let status = status_from_error(&err);
        if status.is_server_error() {
            error!(error = %err, "request failed");
        }
        Self::new(status, err.to_string())
    }
}

impl From<tower_sessions::session::Error> for WebError {
    fn from(err: tower_sessions::session::Error) -> Self {
        error!(error = %err, "session store failure");
        Self::internal("session error")
    }
}

impl From<axum_login::Error<super::Backend>> for WebError {
    fn from(err: axum_login::Error<super::Backend>) -> Self {
        match err {
            axum_login::Error::Backend(e) => e.into(),
            axum_login::Error::Session(e) => e.into(),
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let template = super::templates::ErrorTemplate {
            message: &self.message,
            status: self.status.as_u16(),
        };
        match template.render() {
            Ok(html) => (self.status, Html(html)).into_response(),
            Err(_) => (self.status, self.message).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::error::TradeRejection;

    #[test]
    fn user_errors_are_bad_requests() {
        let err: WebError = WalletError::Rejected(TradeRejection::InvalidOrder).into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.message, "Ticker doesn't exist or invalid quantity!");
    }

    #[test]
    fn missing_rows_are_not_found() {
        let err = WalletError::NotFound {
            entity: "profile",
            key: "7".into(),
        };
        assert_eq!(status_from_error(&err), StatusCode::NOT_FOUND);
    }

    #[test]
    fn infrastructure_errors_are_internal() {
        let err = WalletError::Database {
            reason: "timeout".into(),
        };
        assert_eq!(status_from_error(&err), StatusCode::INTERNAL_SERVER_ERROR);
        let err = WalletError::MarketData {
            ticker: "AAPL".into(),
            reason: "503".into(),
        };
        assert_eq!(status_from_error(&err), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn renders_error_page() {
        let response = WebError::not_found("Unknown ticker: XYZ").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
