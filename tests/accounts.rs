//! Account Lifecycle Tests
//!
//! Registration, email verification, login, refresh rotation and logout against a real
//! Postgres database. Run with `cargo test -- --ignored` and `TEST_DATABASE_URL` set.

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use common::{TestApp, DEFAULT_PASSWORD};
use poster::app::tokens::TokenKind;
use serde_json::json;
use uuid::Uuid;

fn fresh_email(prefix: &str) -> String {
    format!("{}_{}@example.com", prefix, Uuid::new_v4().simple())
}

async fn count_users(app: &TestApp, email: &str) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(app.state.db.pool())
        .await
        .unwrap()
}

async fn register(app: &TestApp, email: &str) -> common::TestResponse {
    app.post_json(
        "/auth/register",
        json!({ "username": "someone", "email": email, "password": DEFAULT_PASSWORD }),
        None,
    )
    .await
}

// ===========================================================================
// Registration
// ===========================================================================

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn register_creates_unverified_user_and_sends_code() {
    let app = TestApp::with_database().await;
    let email = fresh_email("register");

    let resp = register(&app, &email).await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["status"], "ok");
    assert_eq!(resp.message(), "user is registered, please verify your email");

    let verified: bool = sqlx::query_scalar("SELECT is_verified FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(app.state.db.pool())
        .await
        .unwrap();
    assert!(!verified);

    let code = app.mailer.last_code_for(&email).expect("code was mailed");
    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn re_registering_unverified_email_replaces_the_row() {
    let app = TestApp::with_database().await;
    let email = fresh_email("reregister");

    assert_eq!(register(&app, &email).await.status, StatusCode::OK);
    let first_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(app.state.db.pool())
        .await
        .unwrap();

    assert_eq!(register(&app, &email).await.status, StatusCode::OK);
    let second_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE email = $1")
        .bind(&email)
        .fetch_one(app.state.db.pool())
        .await
        .unwrap();

    assert_eq!(count_users(&app, &email).await, 1);
    assert_ne!(first_id, second_id);
    assert_eq!(app.mailer.sent().iter().filter(|m| m.to == email).count(), 2);
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn registering_a_verified_email_conflicts() {
    let app = TestApp::with_database().await;
    let user = app.create_user("taken").await;

    let resp = register(&app, &user.email).await;

    assert_eq!(resp.status, StatusCode::CONFLICT);
    assert_eq!(resp.message(), "user is already registered");
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn mail_failure_leaves_no_account_behind() {
    let app = TestApp::with_database().await;
    let email = fresh_email("mailfail");
    app.mailer.set_failing(true);

    let resp = register(&app, &email).await;

    assert_eq!(resp.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.message(), "internal server error");
    assert_eq!(count_users(&app, &email).await, 0);
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn emails_are_matched_case_insensitively() {
    let app = TestApp::with_database().await;
    let user = app.create_user("casing").await;

    let resp = register(&app, &user.email.to_uppercase()).await;

    assert_eq!(resp.status, StatusCode::CONFLICT);
}

// ===========================================================================
// Verification
// ===========================================================================

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn wrong_verification_code_is_rejected() {
    let app = TestApp::with_database().await;
    let email = fresh_email("wrongcode");
    register(&app, &email).await;
    let code = app.mailer.last_code_for(&email).unwrap();
    let wrong = if code == "000000" { "111111" } else { "000000" };

    let resp = app
        .post_json("/auth/verify", json!({ "email": email, "code": wrong }), None)
        .await;

    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    assert_eq!(resp.message(), "invalid verification code");
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn verification_code_is_single_use() {
    let app = TestApp::with_database().await;
    let email = fresh_email("singleuse");
    register(&app, &email).await;
    let code = app.mailer.last_code_for(&email).unwrap();

    let first = app
        .post_json("/auth/verify", json!({ "email": email, "code": code }), None)
        .await;
    let second = app
        .post_json("/auth/verify", json!({ "email": email, "code": code }), None)
        .await;

    assert_eq!(first.status, StatusCode::OK);
    assert_eq!(second.status, StatusCode::BAD_REQUEST);
}

// ===========================================================================
// Login
// ===========================================================================

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn unverified_user_cannot_login() {
    let app = TestApp::with_database().await;
    let email = fresh_email("unverified");
    register(&app, &email).await;

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "email": email, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::FORBIDDEN);
    assert_eq!(resp.message(), "user is not verified, please check your email");
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn wrong_password_and_unknown_email_look_the_same() {
    let app = TestApp::with_database().await;
    let user = app.create_user("badpw").await;

    let wrong_password = app
        .post_json(
            "/auth/login",
            json!({ "email": user.email, "password": "wrong_password" }),
            None,
        )
        .await;
    let unknown = app
        .post_json(
            "/auth/login",
            json!({ "email": fresh_email("nobody"), "password": "whatever" }),
            None,
        )
        .await;

    assert_eq!(wrong_password.status, StatusCode::UNAUTHORIZED);
    assert_eq!(unknown.status, StatusCode::UNAUTHORIZED);
    assert_eq!(wrong_password.message(), "invalid email or password");
    assert_eq!(unknown.message(), wrong_password.message());
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn login_returns_tokens_and_sets_cookies() {
    let app = TestApp::with_database().await;
    let user = app.create_user("login").await;

    let resp = app
        .post_json(
            "/auth/login",
            json!({ "email": user.email, "password": DEFAULT_PASSWORD }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.message(), "logged in successfully");
    let data = &resp.json()["data"];
    let access = data["access_token"].as_str().unwrap().to_string();
    let refresh = data["refresh_token"].as_str().unwrap().to_string();
    assert!(data["access_expires_at"].is_string());
    assert!(data["refresh_expires_at"].is_string());

    let access_claims = app.state.tokens.verify_kind(&access, TokenKind::Access).unwrap();
    let refresh_claims = app.state.tokens.verify_kind(&refresh, TokenKind::Refresh).unwrap();
    assert_eq!(access_claims.user_id, user.id);
    assert_eq!(refresh_claims.user_id, user.id);

    assert_eq!(resp.cookie("access_token"), Some(access));
    assert_eq!(resp.cookie("refresh_token"), Some(refresh));
    for cookie in resp.set_cookies() {
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Path=/"));
    }
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn refresh_token_is_stored_hashed() {
    let app = TestApp::with_database().await;
    let user = app.create_user("hashed").await;

    let stored: Option<String> =
        sqlx::query_scalar("SELECT refresh_token_hash FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(app.state.db.pool())
            .await
            .unwrap();

    let stored = stored.expect("refresh token hash is set after login");
    assert_ne!(stored, user.refresh_token);
    assert_eq!(stored.len(), 64);
}

// ===========================================================================
// Refresh & logout
// ===========================================================================

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn refresh_via_cookie_rotates_the_pair() {
    let app = TestApp::with_database().await;
    let user = app.create_user("rotate").await;

    let request = Request::builder()
        .method(Method::POST)
        .uri("/auth/refresh-token")
        .header(header::COOKIE, format!("refresh_token={}", user.refresh_token))
        .body(Body::empty())
        .unwrap();
    let resp = app.send(request).await;

    assert_eq!(resp.status, StatusCode::OK);
    let new_refresh = resp.json()["data"]["refresh_token"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(new_refresh, user.refresh_token);
    assert_eq!(resp.cookie("refresh_token"), Some(new_refresh));

    // The rotated-away token cannot be replayed.
    let replay = app
        .post_json(
            "/auth/refresh-token",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(replay.status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        replay.message(),
        "refresh token has been revoked, please login again"
    );
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn refresh_via_body_for_cookieless_clients() {
    let app = TestApp::with_database().await;
    let user = app.create_user("bodyrefresh").await;

    let resp = app
        .post_json(
            "/auth/refresh-token",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;

    assert_eq!(resp.status, StatusCode::OK);
    let access = resp.json()["data"]["access_token"]
        .as_str()
        .unwrap()
        .to_string();
    let me = app.get("/auth/me", Some(&access)).await;
    assert_eq!(me.status, StatusCode::OK);
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn logout_clears_cookies_and_stored_token() {
    let app = TestApp::with_database().await;
    let user = app.create_user("logout").await;

    let resp = app.get("/auth/logout", Some(&user.access_token)).await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.message(), "successfully logged out");
    assert_eq!(resp.cookie("access_token").as_deref(), Some(""));
    assert_eq!(resp.cookie("refresh_token").as_deref(), Some(""));

    let stored: Option<String> =
        sqlx::query_scalar("SELECT refresh_token_hash FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(app.state.db.pool())
            .await
            .unwrap();
    assert!(stored.is_none());

    let refresh = app
        .post_json(
            "/auth/refresh-token",
            json!({ "refresh_token": user.refresh_token }),
            None,
        )
        .await;
    assert_eq!(refresh.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn me_returns_public_profile() {
    let app = TestApp::with_database().await;
    let user = app.create_user("me").await;

    let resp = app.get("/auth/me", Some(&user.access_token)).await;

    assert_eq!(resp.status, StatusCode::OK);
    let data = &resp.json()["data"];
    assert_eq!(data["id"], user.id.to_string());
    assert_eq!(data["username"], user.username);
    assert_eq!(data["email"], user.email);
    assert!(data.get("password_hash").is_none());
}

#[tokio::test]
#[ignore = "requires a Postgres database (TEST_DATABASE_URL)"]
async fn health_reports_ok_with_database() {
    let app = TestApp::with_database().await;

    let resp = app.get("/health", None).await;

    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json()["status"], "ok");
}
