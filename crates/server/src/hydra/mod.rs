//! ORY Hydra integration: service token supply and the consent-request API.

pub mod gateway;
pub mod token;
pub mod types;

pub use gateway::ConsentGateway;
pub use token::{RetryPolicy, TokenSupplier};
pub use types::{
    AcceptConsentRequest, ClaimsPayload, ConsentRequest, FORCE_CONSENT_SCOPE, Prompt,
    ServiceToken,
};

use crate::config::HydraConfig;
use url::Url;

/// Parse the configured Hydra URL so relative joins keep any path prefix.
pub(crate) fn base_url(raw: &str) -> Result<Url, url::ParseError> {
    if raw.ends_with('/') {
        Url::parse(raw)
    } else {
        Url::parse(&format!("{raw}/"))
    }
}

/// HTTP client shared by the token supplier and the gateway. The request
/// timeout bounds every accept/reject so it cannot hang indefinitely.
pub fn http_client(config: &HydraConfig) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(config.request_timeout())
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
}
