//! Shared fixtures: configuration and a mocked Hydra administrative API.

#![allow(dead_code)]

use hydra_consent::config::{AppConfig, HydraConfig, ValidatorMode};
use hydra_consent::hydra::{ConsentGateway, RetryPolicy, TokenSupplier, http_client};
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "consent-app";
pub const CLIENT_SECRET: &str = "consent-secret";
pub const SESSION_SECRET: &str = "0123456789abcdef0123456789abcdef";
pub const SERVICE_TOKEN: &str = "service-token";
pub const REDIRECT_URL: &str = "http://hydra.localhost/oauth2/auth?consent=done";

pub fn hydra_config(url: &str) -> HydraConfig {
    HydraConfig {
        url: url.to_string(),
        client_id: CLIENT_ID.to_string(),
        client_secret: CLIENT_SECRET.to_string(),
        scope: "hydra.consent".to_string(),
        request_timeout_secs: 5,
        token_expiry_margin_secs: 30,
    }
}

pub fn app_config(url: &str, validator_mode: ValidatorMode) -> AppConfig {
    AppConfig {
        listen_addr: "127.0.0.1:0".to_string(),
        hydra: hydra_config(url),
        session_secret: SESSION_SECRET.to_string(),
        callback_url: String::new(),
        login_url: "/auth/login".to_string(),
        validator_mode,
    }
}

/// Retry policy with the production attempt budget but millisecond delays.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        min_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        ..RetryPolicy::default()
    }
}

pub fn token_supplier(server: &MockServer) -> TokenSupplier {
    let config = hydra_config(&server.uri());
    let http = http_client(&config).expect("http client");
    TokenSupplier::new(http, &config)
        .expect("token supplier")
        .with_retry_policy(fast_retry())
}

pub fn gateway(server: &MockServer) -> ConsentGateway {
    let config = hydra_config(&server.uri());
    let http = http_client(&config).expect("http client");
    ConsentGateway::new(http, &server.uri(), token_supplier(server)).expect("gateway")
}

pub fn token_body(expires_in: u64) -> Value {
    json!({
        "access_token": SERVICE_TOKEN,
        "token_type": "bearer",
        "expires_in": expires_in,
        "scope": "hydra.consent"
    })
}

pub async fn mount_token_endpoint(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/oauth2/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(3600)))
        .mount(server)
        .await;
}

pub fn consent_request(id: &str, scopes: &[&str]) -> Value {
    json!({
        "id": id,
        "clientId": "example-app",
        "expiresAt": "2099-01-01T00:00:00Z",
        "redirectUrl": REDIRECT_URL,
        "requestedScopes": scopes,
        "requestedAcr": []
    })
}

pub async fn mount_consent_request(server: &MockServer, body: Value) {
    let id = body["id"].as_str().expect("consent id").to_string();
    Mock::given(method("GET"))
        .and(path(format!("/oauth2/consent/requests/{id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}
