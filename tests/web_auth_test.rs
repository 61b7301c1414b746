#![cfg(feature = "sqlite")]
//! Registration, login and logout through the full router.

mod common;

use axum::http::StatusCode;
use papertrade::ports::account_port::AccountPort;
use rust_decimal_macros::dec;

use common::*;

mod auth_tests {
    use super::*;

    #[tokio::test]
    async fn unauthenticated_access_redirects_to_login_with_next() {
        let app = test_app(StaticMarketData::new());
        let mut client = Client::new(app.router);

        let response = client.get("/wallet_details/").await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
        let to = location(&response);
        assert!(to.starts_with("/login/"), "redirected to {to}");
        assert!(to.contains("next="), "redirected to {to}");
    }

    #[tokio::test]
    async fn registration_creates_profile_and_logs_in() {
        let app = test_app(StaticMarketData::new());
        let store = app.store.clone();
        let mut client = Client::new(app.router);

        let response = client.register("alice", "Alice@Example.com").await;
        assert_redirect(&response, "/");

        let account = store.find_account_by_username("alice").unwrap().unwrap();
        assert_eq!(account.email, "alice@example.com");
        assert_ne!(account.password_hash, TEST_PASSWORD);
        assert_eq!(store.get_profile(account.id).unwrap().balance, dec!(1000.00));

        let response = client.get("/wallet_details/").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("Cash balance: 1000.00"));
        assert!(html.contains("Log out (alice)"));
    }

    #[tokio::test]
    async fn duplicate_username_re_renders_form() {
        let app = test_app(StaticMarketData::new());
        let mut client = Client::new(app.router.clone());
        client.register("alice", "alice@example.com").await;

        let mut other = Client::new(app.router);
        let response = other.register("alice", "second@example.com").await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("This username already exists!"));
        assert!(html.contains("second@example.com"));
    }

    #[tokio::test]
    async fn duplicate_email_is_rejected() {
        let app = test_app(StaticMarketData::new());
        let store = app.store.clone();
        Client::new(app.router.clone())
            .register("alice", "shared@example.com")
            .await;

        let response = Client::new(app.router)
            .register("bob", "shared@example.com")
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("This e-mail already in use!"));
        assert!(store.find_account_by_username("bob").unwrap().is_none());
    }

    #[tokio::test]
    async fn mismatched_passwords_are_rejected() {
        let app = test_app(StaticMarketData::new());
        let mut client = Client::new(app.router);

        let response = client
            .post_form(
                "/register/",
                &[
                    ("username", "carol"),
                    ("email", "carol@example.com"),
                    ("password", "one"),
                    ("password2", "two"),
                ],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("The passwords are different!"));
    }

    #[tokio::test]
    async fn taken_username_is_reported_before_password_mismatch() {
        let app = test_app(StaticMarketData::new());
        Client::new(app.router.clone())
            .register("alice", "alice@example.com")
            .await;

        let response = Client::new(app.router.clone())
            .post_form(
                "/register/",
                &[
                    ("username", "alice"),
                    ("email", "other@example.com"),
                    ("password", "one"),
                    ("password2", "two"),
                ],
            )
            .await;
        let html = body_text(response).await;
        assert!(html.contains("This username already exists!"));
        assert!(!html.contains("The passwords are different!"));

        let response = Client::new(app.router)
            .post_form(
                "/register/",
                &[
                    ("username", "bob"),
                    ("email", "ALICE@example.com"),
                    ("password", "one"),
                    ("password2", "two"),
                ],
            )
            .await;
        assert!(body_text(response).await.contains("This e-mail already in use!"));
    }

    #[tokio::test]
    async fn missing_fields_are_rejected() {
        let app = test_app(StaticMarketData::new());
        let response = Client::new(app.router)
            .post_form("/register/", &[("username", "dave")])
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Please fill all the fields"));
    }

    #[tokio::test]
    async fn login_follows_next() {
        let app = test_app(StaticMarketData::new());
        Client::new(app.router.clone())
            .register("alice", "alice@example.com")
            .await;

        let mut client = Client::new(app.router);
        let response = client
            .post_form(
                "/login/",
                &[
                    ("username", "alice"),
                    ("password", TEST_PASSWORD),
                    ("next", "/transaction_history/"),
                ],
            )
            .await;
        assert_redirect(&response, "/transaction_history/");

        let response = client.get("/transaction_history/").await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_have_distinct_messages() {
        let app = test_app(StaticMarketData::new());
        Client::new(app.router.clone())
            .register("alice", "alice@example.com")
            .await;

        let mut client = Client::new(app.router);
        let response = client
            .post_form("/login/", &[("username", "alice"), ("password", "nope")])
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("Wrong password!"));

        let response = client
            .post_form("/login/", &[("username", "nobody"), ("password", "nope")])
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("User not registered"));

        let response = client.get("/").await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[tokio::test]
    async fn logout_ends_the_session() {
        let app = test_app(StaticMarketData::new());
        let mut client = Client::new(app.router);
        client.register("alice", "alice@example.com").await;
        assert_eq!(client.get("/wallet_details/").await.status(), StatusCode::OK);

        let response = client.post_form("/logout/", &[]).await;
        assert_redirect(&response, "/login/");

        let response = client.get("/wallet_details/").await;
        assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    }

    #[tokio::test]
    async fn logged_in_user_skips_login_page() {
        let app = test_app(StaticMarketData::new());
        let mut client = Client::new(app.router);
        client.register("alice", "alice@example.com").await;

        assert_redirect(&client.get("/login/").await, "/");
        assert_redirect(&client.get("/register/").await, "/");
    }
}
