use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration build error: {0}")]
    Build(#[from] config::ConfigError),
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

/// Connection settings for the ORY Hydra administrative API.
#[derive(Clone, Deserialize)]
pub struct HydraConfig {
    pub url: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_scope")]
    pub scope: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_token_expiry_margin_secs")]
    pub token_expiry_margin_secs: u64,
}

impl HydraConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn token_expiry_margin(&self) -> Duration {
        Duration::from_secs(self.token_expiry_margin_secs)
    }
}

impl fmt::Debug for HydraConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HydraConfig")
            .field("url", &self.url)
            .field("client_id", &self.client_id)
            .field("client_secret_set", &!self.client_secret.is_empty())
            .field("scope", &self.scope)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("token_expiry_margin_secs", &self.token_expiry_margin_secs)
            .finish()
    }
}

/// Whether the validator also fetches the consent request to apply
/// `prompt` / `max_age` re-authentication policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValidatorMode {
    Basic,
    #[default]
    Extended,
}

#[derive(Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    pub hydra: HydraConfig,
    /// Secret used to sign the session cookie.
    pub session_secret: String,
    /// Identity-provider callback URL, handed to the login integration.
    pub callback_url: String,
    /// Where unauthenticated sessions are sent after consent validation.
    #[serde(default = "default_login_url")]
    pub login_url: String,
    #[serde(default)]
    pub validator_mode: ValidatorMode,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("listen_addr", &self.listen_addr)
            .field("hydra", &self.hydra)
            .field("session_secret_set", &!self.session_secret.is_empty())
            .field("callback_url", &self.callback_url)
            .field("login_url", &self.login_url)
            .field("validator_mode", &self.validator_mode)
            .finish()
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_scope() -> String {
    "hydra.consent".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_token_expiry_margin_secs() -> u64 {
    30
}

fn default_login_url() -> String {
    "/auth/login".to_string()
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hydra.client_id.is_empty() || self.hydra.client_secret.is_empty() {
            return Err(ConfigError::Validation(
                "hydra.client_id and hydra.client_secret must be set".into(),
            ));
        }
        let url = url::Url::parse(&self.hydra.url)
            .map_err(|e| ConfigError::Validation(format!("hydra.url is not a valid URL: {e}")))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ConfigError::Validation(
                "hydra.url must use http or https".into(),
            ));
        }
        if self.session_secret.len() < 32 {
            return Err(ConfigError::Validation(
                "session_secret must be at least 32 characters".into(),
            ));
        }
        if self.hydra.request_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "hydra.request_timeout_secs must be > 0".into(),
            ));
        }
        Ok(())
    }
}

/// Load application configuration from `config.yaml` (or the file named by
/// `HYDRA_CONSENT_CONFIG`) plus environment overrides.
///
/// Environment variables matching the key path separated by double
/// underscores (e.g. `HYDRA__CLIENT_SECRET`) override file values.
pub fn load_config() -> Result<AppConfig, ConfigError> {
    let path = std::env::var("HYDRA_CONSENT_CONFIG").unwrap_or_else(|_| "config.yaml".into());
    load_config_from(&path)
}

pub fn load_config_from(path: &str) -> Result<AppConfig, ConfigError> {
    use config::{Config, Environment, File};
    let cfg = Config::builder()
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::default().separator("__"))
        .build()?;

    let app: AppConfig = cfg.try_deserialize()?;
    app.validate()?;
    Ok(app)
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, FileFormat};

    const YAML: &str = r#"
hydra:
  url: "http://hydra.localhost:4444"
  client_id: "consent-app"
  client_secret: "consent-secret"
session_secret: "0123456789abcdef0123456789abcdef"
callback_url: "http://localhost:3000/auth/callback"
"#;

    fn parse(yaml: &str) -> AppConfig {
        Config::builder()
            .add_source(config::File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let cfg = parse(YAML);
        assert_eq!(cfg.listen_addr, "0.0.0.0:3000");
        assert_eq!(cfg.hydra.scope, "hydra.consent");
        assert_eq!(cfg.hydra.request_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.hydra.token_expiry_margin(), Duration::from_secs(30));
        assert_eq!(cfg.login_url, "/auth/login");
        assert_eq!(cfg.validator_mode, ValidatorMode::Extended);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn basic_validator_mode_parses() {
        let cfg = parse(&format!("{YAML}validator_mode: basic\n"));
        assert_eq!(cfg.validator_mode, ValidatorMode::Basic);
    }

    #[test]
    fn rejects_short_session_secret() {
        let mut cfg = parse(YAML);
        cfg.session_secret = "short".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn rejects_non_http_hydra_url() {
        let mut cfg = parse(YAML);
        cfg.hydra.url = "ftp://hydra.localhost".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let cfg = parse(YAML);
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("consent-secret"));
        assert!(!rendered.contains("0123456789abcdef"));
        assert!(rendered.contains("client_secret_set: true"));
    }
}
