//! Integration tests for braggly-web routes that need no live backend
//!
//! The backend URL points at a closed local port, so anything that reaches
//! the backend fails fast with a 502.

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    response::Response,
};
use braggly_common::api::compute_stripe_signature;
use braggly_common::config::GatewayConfig;
use serde_json::Value;
use std::path::Path;
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method
use braggly_web::{build_router, AppState};

const WEBHOOK_SECRET: &str = "whsec_integration";

/// Test helper: config pointing at an unreachable backend
fn test_config(locales: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::for_backend("http://127.0.0.1:9");
    config.locales_dir = locales.to_path_buf();
    config.stripe.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    config
}

fn setup_app(locales: &Path) -> axum::Router {
    let state = AppState::new(test_config(locales)).expect("state should build");
    build_router(state)
}

fn locales_fixture() -> TempDir {
    let dir = TempDir::new().unwrap();
    for (locale, json) in [
        ("en", r#"{"title": "Braggly", "search": "Search"}"#),
        ("pl", r#"{"title": "Braggly", "search": "Szukaj"}"#),
    ] {
        std::fs::create_dir_all(dir.path().join(locale)).unwrap();
        std::fs::write(dir.path().join(locale).join("common.json"), json).unwrap();
    }
    dir
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

fn location(response: &Response) -> Option<&str> {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

// =============================================================================
// Health and build info
// =============================================================================

#[tokio::test]
async fn test_health_endpoint_no_auth_required() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    let response = app.oneshot(test_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "braggly-web");
    assert!(body["version"].is_string());
    assert_eq!(body["cod_sessions"], 0);
}

#[tokio::test]
async fn test_buildinfo() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    let response = app.oneshot(test_request("GET", "/api/buildinfo")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert!(body["git_hash"].is_string());
    assert!(body["build_profile"].is_string());
}

// =============================================================================
// Authentication
// =============================================================================

#[tokio::test]
async fn test_api_requires_token() {
    let locales = locales_fixture();

    for uri in ["/api/whoami", "/api/cod/results", "/api/xrd/files", "/api/admin/users"] {
        let app = setup_app(locales.path());
        let response = app.oneshot(test_request("GET", uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);

        let body = extract_json(response.into_body()).await;
        assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    }
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    let request = Request::builder()
        .uri("/api/whoami")
        .header(header::AUTHORIZATION, "Bearer abc")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_logout_clears_cookies() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    let request = Request::builder()
        .method("POST")
        .uri("/api/auth/logout")
        .header(header::COOKIE, "token=abc; Role=USER")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    assert!(cookies.iter().any(|c| c.starts_with("token=")));
    assert!(cookies.iter().any(|c| c.starts_with("Role=")));
}

// =============================================================================
// Page gate without a token
// =============================================================================

#[tokio::test]
async fn test_signed_out_pages() {
    let locales = locales_fixture();

    let app = setup_app(locales.path());
    let response = app.oneshot(test_request("GET", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    for uri in ["/user", "/user/files", "/admin", "/admin/users"] {
        let app = setup_app(locales.path());
        let response = app.oneshot(test_request("GET", uri)).await.unwrap();
        assert!(response.status().is_redirection(), "{}", uri);
        assert_eq!(location(&response), Some("/"), "{}", uri);
    }
}

#[tokio::test]
async fn test_rejected_token_treated_as_signed_out() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    // whoami cannot succeed against the closed port
    let request = Request::builder()
        .uri("/admin")
        .header(header::COOKIE, "token=stale")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(location(&response), Some("/"));
}

// =============================================================================
// Translations
// =============================================================================

#[tokio::test]
async fn test_i18n_locale_resolution() {
    let locales = locales_fixture();

    let app = setup_app(locales.path());
    let response = app.oneshot(test_request("GET", "/api/i18n?locale=pl")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_json(response.into_body()).await["search"], "Szukaj");

    // Cookie, then configured default
    let app = setup_app(locales.path());
    let request = Request::builder()
        .uri("/api/i18n")
        .header(header::COOKIE, "locale=pl")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(extract_json(response.into_body()).await["search"], "Szukaj");

    let app = setup_app(locales.path());
    let response = app.oneshot(test_request("GET", "/api/i18n")).await.unwrap();
    assert_eq!(extract_json(response.into_body()).await["search"], "Search");
}

#[tokio::test]
async fn test_i18n_errors() {
    let locales = locales_fixture();

    let app = setup_app(locales.path());
    let response = app.oneshot(test_request("GET", "/api/i18n?locale=de")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let app = setup_app(locales.path());
    let response = app
        .oneshot(test_request("GET", "/api/i18n?locale=..%2Fetc"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_set_locale_cookie() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    let response = app
        .oneshot(json_request("POST", "/api/locale", serde_json::json!({"locale": "pl"})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let cookies = set_cookies(&response);
    let cookie = cookies
        .iter()
        .find(|c| c.starts_with("locale=pl"))
        .expect("locale cookie set");
    assert!(cookie.contains("Max-Age=31536000"));
}

// =============================================================================
// Stripe webhook
// =============================================================================

fn webhook_request(payload: &str, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/payments/webhook")
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(signature) = signature {
        builder = builder.header("Stripe-Signature", signature);
    }
    builder.body(Body::from(payload.to_string())).unwrap()
}

const SUCCEEDED_EVENT: &str =
    r#"{"id":"evt_1","type":"payment_intent.succeeded","data":{"object":{"id":"pi_1"}}}"#;

#[tokio::test]
async fn test_webhook_with_valid_signature() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    let now = chrono::Utc::now().timestamp();
    let v1 = compute_stripe_signature(WEBHOOK_SECRET, now, SUCCEEDED_EVENT.as_bytes());
    let response = app
        .oneshot(webhook_request(SUCCEEDED_EVENT, Some(format!("t={},v1={}", now, v1))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_json(response.into_body()).await["received"], true);
}

#[tokio::test]
async fn test_webhook_missing_or_bad_signature() {
    let locales = locales_fixture();

    let app = setup_app(locales.path());
    let response = app.oneshot(webhook_request(SUCCEEDED_EVENT, None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let app = setup_app(locales.path());
    let now = chrono::Utc::now().timestamp();
    let v1 = compute_stripe_signature("whsec_other", now, SUCCEEDED_EVENT.as_bytes());
    let response = app
        .oneshot(webhook_request(SUCCEEDED_EVENT, Some(format!("t={},v1={}", now, v1))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Outside the tolerance window
    let app = setup_app(locales.path());
    let stale = now - 3600;
    let v1 = compute_stripe_signature(WEBHOOK_SECRET, stale, SUCCEEDED_EVENT.as_bytes());
    let response = app
        .oneshot(webhook_request(SUCCEEDED_EVENT, Some(format!("t={},v1={}", stale, v1))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_payment_intent_without_stripe_key() {
    let locales = locales_fixture();
    let app = setup_app(locales.path());

    let request = Request::builder()
        .method("POST")
        .uri("/api/payments/create-payment-intent")
        .header(header::AUTHORIZATION, "Bearer abc")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"amount": 1000}"#))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}
