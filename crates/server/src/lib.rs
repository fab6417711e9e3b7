//! Consent provider for ORY Hydra.
//!
//! Hydra delegates the OAuth2/OIDC consent decision to this service. The
//! browser arrives at `/consent` with a consent request id, the resource
//! owner grants or denies the requested scopes on `/consent-ui`, and the
//! decision is reported back to Hydra's administrative API using a service
//! token obtained through the client-credentials grant.

use std::sync::Arc;

use crate::api::ConsentState;
use crate::config::{AppConfig, ConfigError};
use crate::consent::{ConsentOrchestrator, ConsentValidator};
use crate::hydra::{ConsentGateway, TokenSupplier};
use crate::session_store::{DEFAULT_SESSION_TTL, MemorySessionStore};

pub mod api;
pub mod config;
pub mod consent;
pub mod error;
pub mod hydra;
pub mod session_store;

/// Long-lived collaborators shared by every request.
#[derive(Clone, Debug)]
pub struct AppResources {
    pub tokens: TokenSupplier,
    pub gateway: ConsentGateway,
    pub sessions: MemorySessionStore,
    pub config: Arc<AppConfig>,
}

impl AppResources {
    pub fn from_config(config: AppConfig) -> Result<Self, ConfigError> {
        let http = hydra::http_client(&config.hydra)
            .map_err(|e| ConfigError::Validation(format!("unable to build HTTP client: {e}")))?;
        let tokens = TokenSupplier::new(http.clone(), &config.hydra)
            .map_err(|e| ConfigError::Validation(format!("hydra.url is not a valid base: {e}")))?;
        let gateway = ConsentGateway::new(http, &config.hydra.url, tokens.clone())
            .map_err(|e| ConfigError::Validation(format!("hydra.url is not a valid base: {e}")))?;
        let sessions = MemorySessionStore::new(&config.session_secret, DEFAULT_SESSION_TTL);

        Ok(Self {
            tokens,
            gateway,
            sessions,
            config: Arc::new(config),
        })
    }

    /// State for the consent endpoints with the default renderer and hydrator.
    pub fn consent_state(&self) -> ConsentState {
        ConsentState {
            validator: Arc::new(ConsentValidator::for_mode(
                self.config.validator_mode,
                self.gateway.clone(),
            )),
            orchestrator: ConsentOrchestrator::new(self.gateway.clone()),
            sessions: self.sessions.clone(),
            login_redirect: login_redirect(&self.config.login_url, &self.config.callback_url),
        }
    }
}

/// Login URL carrying the identity-provider callback as `redirect_uri`.
pub fn login_redirect(login_url: &str, callback_url: &str) -> String {
    if callback_url.is_empty() {
        return login_url.to_string();
    }
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("redirect_uri", callback_url)
        .finish();
    let separator = if login_url.contains('?') { '&' } else { '?' };
    format!("{login_url}{separator}{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_redirect_appends_callback() {
        assert_eq!(
            login_redirect("/auth/login", "http://localhost:3000/auth/callback"),
            "/auth/login?redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fcallback"
        );
        assert_eq!(
            login_redirect("/auth/login?connection=github", "http://cb"),
            "/auth/login?connection=github&redirect_uri=http%3A%2F%2Fcb"
        );
        assert_eq!(login_redirect("/auth/login", ""), "/auth/login");
    }
}
