//! Middleware module unit tests

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use batchapi::config::{ApiKeyConfig, AppConfig, Settings};
use batchapi::handlers::{build_router, AppState};
use batchapi::middleware::auth::*;
use batchapi::middleware::logging::get_client_ip;
use batchapi::storage::MemoryLedger;
use batchapi::AppError;
use std::collections::HashMap;
use tower::ServiceExt;

fn app_config() -> AppConfig {
    let mut keys = HashMap::new();
    keys.insert(
        "teller-key-000001".to_string(),
        ApiKeyConfig {
            user: "teller".to_string(),
            permissions: vec!["REPAYMENT_LOAN".to_string(), "READ_LOAN".to_string()],
        },
    );
    AppConfig::with_keys(keys).unwrap()
}

#[test]
fn test_validate_token_format() {
    assert!(validate_token_format("teller-key-000001"));
    assert!(validate_token_format("api_key_with_underscores"));

    assert!(!validate_token_format(""));
    assert!(!validate_token_format("short"));
    assert!(!validate_token_format("key with spaces"));
    assert!(!validate_token_format("key\nwith\nnewlines"));
    assert!(!validate_token_format("key\twith\ttabs"));
}

#[test]
fn test_extract_token() {
    assert_eq!(extract_token("Bearer teller-key-000001"), "teller-key-000001");
    assert_eq!(extract_token("teller-key-000001"), "teller-key-000001");
    assert_eq!(extract_token("Bearer "), "");
}

#[test]
fn test_authenticate_resolves_user() {
    let user = authenticate(&app_config(), "Bearer teller-key-000001").unwrap();
    assert_eq!(user.username, "teller");
    assert!(user.has_permission("REPAYMENT_LOAN"));
    assert!(!user.has_permission("DISBURSE_LOAN"));
}

#[test]
fn test_authenticate_rejects_unknown_and_malformed_keys() {
    let config = app_config();
    for header in ["Bearer ", "short", "Bearer teller-key-999999", "teller key 000001"] {
        assert!(
            matches!(authenticate(&config, header), Err(AppError::Authentication(_))),
            "header {:?} should be rejected",
            header
        );
    }
}

#[test]
fn test_get_client_ip() {
    let mut headers = HeaderMap::new();
    headers.insert("x-forwarded-for", "10.1.1.1, 10.0.0.1".parse().unwrap());
    assert_eq!(get_client_ip(&headers), Some("10.1.1.1".to_string()));

    headers.clear();
    headers.insert("x-forwarded-for", "unknown".parse().unwrap());
    assert_eq!(get_client_ip(&headers), None);
}

#[tokio::test]
async fn test_custom_api_key_header() {
    let mut settings = Settings::default();
    settings.security.api_key_header = "X-Api-Key".to_string();
    let app = build_router(AppState::new(settings, app_config(), MemoryLedger::new_shared()));

    let request = Request::builder()
        .method("POST")
        .uri("/batches")
        .header("x-api-key", "teller-key-000001")
        .body(Body::from("[]"))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // The default header is no longer consulted
    let request = Request::builder()
        .method("POST")
        .uri("/batches")
        .header("authorization", "Bearer teller-key-000001")
        .body(Body::from("[]"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_health_does_not_require_key() {
    let app = build_router(AppState::new(Settings::default(), app_config(), MemoryLedger::new_shared()));
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
