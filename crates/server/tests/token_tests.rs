//! Tests for the client-credentials token supplier.

mod common;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use common::*;
use hydra_consent::error::{ConsentError, TokenError};
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// acquire()
// =============================================================================

#[tokio::test]
async fn test_acquire_sends_client_credentials_grant() {
    let server = MockServer::start().await;
    let credentials = STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}"));
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .and(header("authorization", format!("Basic {credentials}").as_str()))
        .and(body_string_contains("grant_type=client_credentials"))
        .and(body_string_contains("scope=hydra.consent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(3600)))
        .expect(1)
        .mount(&server)
        .await;

    let supplier = token_supplier(&server);
    let token = supplier.acquire().await.expect("token");
    assert!(token.expires_at() > time::OffsetDateTime::now_utc());
}

#[tokio::test]
async fn test_concurrent_acquire_issues_single_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body(3600))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let supplier = token_supplier(&server);
    let (a, b) = tokio::join!(supplier.acquire(), supplier.acquire());
    let (a, b) = (a.expect("first caller"), b.expect("second caller"));
    assert_eq!(a.expires_at(), b.expires_at());
}

#[tokio::test]
async fn test_fresh_token_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(3600)))
        .expect(1)
        .mount(&server)
        .await;

    let supplier = token_supplier(&server);
    for _ in 0..3 {
        supplier.acquire().await.expect("token");
    }
}

#[tokio::test]
async fn test_token_within_expiry_margin_is_refreshed() {
    let server = MockServer::start().await;
    // 10s lifetime is inside the 30s margin, so every call refreshes
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(10)))
        .expect(2)
        .mount(&server)
        .await;

    let supplier = token_supplier(&server);
    supplier.acquire().await.expect("first");
    supplier.acquire().await.expect("second");
}

#[tokio::test]
async fn test_acquire_does_not_retry_and_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let err = token_supplier(&server).acquire().await.unwrap_err();
    assert_eq!(err, TokenError::Status(401));
}

#[tokio::test]
async fn test_failed_refresh_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    mount_token_endpoint(&server).await;

    let supplier = token_supplier(&server);
    assert!(supplier.acquire().await.is_err());
    assert!(supplier.acquire().await.is_ok());
}

#[tokio::test]
async fn test_invalid_token_response_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "",
            "token_type": "bearer",
            "expires_in": 3600
        })))
        .mount(&server)
        .await;

    let err = token_supplier(&server).acquire().await.unwrap_err();
    assert!(matches!(err, TokenError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_unrepresentable_expires_in_is_rejected() {
    for expires_in in [u64::MAX, i64::MAX as u64] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/oauth2/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(expires_in)))
            .expect(1)
            .mount(&server)
            .await;

        let err = token_supplier(&server).acquire().await.unwrap_err();
        assert_eq!(
            err,
            TokenError::InvalidResponse("expires_in out of range".into()),
            "expires_in = {expires_in}"
        );
    }
}

// =============================================================================
// initialize()
// =============================================================================

#[tokio::test]
async fn test_initialize_gives_up_after_five_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    let err = token_supplier(&server).initialize().await.unwrap_err();
    match err {
        ConsentError::FatalStartup { attempts, source } => {
            assert_eq!(attempts, 5);
            assert_eq!(source, TokenError::Status(500));
        }
        other => panic!("expected FatalStartup, got {other:?}"),
    }
}

#[tokio::test]
async fn test_initialize_recovers_from_transient_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    mount_token_endpoint(&server).await;

    let supplier = token_supplier(&server);
    supplier.initialize().await.expect("initialize");
    // The initial token is cached for request handling.
    supplier.acquire().await.expect("cached token");
}

#[tokio::test]
async fn test_initialize_against_unreachable_server_fails() {
    let server = MockServer::start().await;
    let supplier = token_supplier(&server);
    drop(server);

    let err = supplier.initialize().await.unwrap_err();
    assert!(matches!(
        err,
        ConsentError::FatalStartup {
            attempts: 5,
            source: TokenError::Transport(_)
        }
    ));
}
