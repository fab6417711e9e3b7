//! Client-credentials token supplier for the Hydra administrative API.
//!
//! The supplier caches the last service token and refreshes it when it is
//! about to expire. Concurrent callers that miss the cache share a single
//! in-flight token request.

use crate::config::HydraConfig;
use crate::error::{ConsentError, TokenError};
use crate::hydra::types::{ServiceToken, TokenResponse};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use rand::Rng;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use time::OffsetDateTime;
use url::Url;

type RefreshFuture = Shared<BoxFuture<'static, Result<ServiceToken, TokenError>>>;

/// Bounded, randomized exponential backoff used while validating the
/// configuration at startup.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub randomize: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            min_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(3000),
            factor: 2.0,
            randomize: true,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after the `attempt`-th failed attempt (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let jitter = if self.randomize {
            rand::thread_rng().gen_range(1.0_f64..2.0_f64)
        } else {
            1.0
        };
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis = self.min_delay.as_millis() as f64 * jitter * self.factor.powi(exponent);
        Duration::from_millis(millis.min(self.max_delay.as_millis() as f64) as u64)
    }
}

struct Inner {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
    scope: String,
    expiry_margin: Duration,
    cache: RwLock<Option<ServiceToken>>,
    inflight: Mutex<Option<RefreshFuture>>,
}

impl Inner {
    fn cached(&self) -> Option<ServiceToken> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache
            .as_ref()
            .filter(|token| token.is_fresh_at(OffsetDateTime::now_utc(), self.expiry_margin))
            .cloned()
    }

    async fn refresh(self: Arc<Self>) -> Result<ServiceToken, TokenError> {
        let result = self.request_token().await;
        if let Ok(token) = &result {
            *self.cache.write().unwrap_or_else(PoisonError::into_inner) = Some(token.clone());
        }
        *self.inflight.lock().unwrap_or_else(PoisonError::into_inner) = None;
        result
    }

    #[tracing::instrument(name = "hydra_token_request", skip(self), fields(scope = %self.scope))]
    async fn request_token(&self) -> Result<ServiceToken, TokenError> {
        tracing::debug!("requesting service token from hydra");
        let response = self
            .http
            .post(self.token_url.clone())
            .basic_auth(
                form_escape(&self.client_id),
                Some(form_escape(&self.client_secret)),
            )
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", self.scope.as_str()),
            ])
            .send()
            .await
            .map_err(|e| TokenError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "token endpoint rejected the request");
            return Err(TokenError::Status(status.as_u16()));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenError::InvalidResponse(e.without_url().to_string()))?;

        if body.access_token.is_empty() {
            return Err(TokenError::InvalidResponse("empty access_token".into()));
        }
        if let Some(token_type) = &body.token_type {
            if !token_type.eq_ignore_ascii_case("bearer") {
                return Err(TokenError::InvalidResponse(format!(
                    "unsupported token_type \"{token_type}\""
                )));
            }
        }

        let lifetime = Duration::from_secs(body.expires_in.unwrap_or(0));
        let expires_at = time::Duration::try_from(lifetime)
            .ok()
            .and_then(|lifetime| OffsetDateTime::now_utc().checked_add(lifetime))
            .ok_or_else(|| TokenError::InvalidResponse("expires_in out of range".into()))?;
        tracing::info!(expires_in = lifetime.as_secs(), "obtained hydra service token");
        Ok(ServiceToken::new(body.access_token, expires_at))
    }
}

/// HTTP basic credentials are form-urlencoded first (RFC 6749 section 2.3.1).
fn form_escape(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// Acquires and caches the service token used on every consent API call.
#[derive(Clone)]
pub struct TokenSupplier {
    inner: Arc<Inner>,
    retry: RetryPolicy,
}

impl std::fmt::Debug for TokenSupplier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSupplier")
            .field("token_url", &self.inner.token_url.as_str())
            .field("client_id", &self.inner.client_id)
            .field("scope", &self.inner.scope)
            .finish()
    }
}

impl TokenSupplier {
    pub fn new(http: reqwest::Client, config: &HydraConfig) -> Result<Self, url::ParseError> {
        let token_url = super::base_url(&config.url)?.join("oauth2/token")?;
        Ok(Self {
            inner: Arc::new(Inner {
                http,
                token_url,
                client_id: config.client_id.clone(),
                client_secret: config.client_secret.clone(),
                scope: config.scope.clone(),
                expiry_margin: config.token_expiry_margin(),
                cache: RwLock::new(None),
                inflight: Mutex::new(None),
            }),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Return the cached token, or fetch a new one if it is missing or about
    /// to expire. Failures are not retried here.
    pub async fn acquire(&self) -> Result<ServiceToken, TokenError> {
        if let Some(token) = self.inner.cached() {
            return Ok(token);
        }

        let refresh = {
            let mut inflight = self
                .inner
                .inflight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            // A refresh may have completed between the cache check and the lock.
            if let Some(token) = self.inner.cached() {
                return Ok(token);
            }
            match inflight.as_ref() {
                Some(pending) => pending.clone(),
                None => {
                    let pending = self.inner.clone().refresh().boxed().shared();
                    *inflight = Some(pending.clone());
                    pending
                }
            }
        };

        refresh.await
    }

    /// Fetch the first token with bounded retries. Exhausting the retry
    /// budget is fatal for the process.
    pub async fn initialize(&self) -> Result<(), ConsentError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            tracing::debug!(attempt, "attempting to fetch initial hydra access token");
            match self.acquire().await {
                Ok(_) => {
                    tracing::info!(attempt, "successfully fetched initial hydra access token");
                    return Ok(());
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        attempt,
                        error = %err,
                        backoff_ms = delay.as_millis() as u64,
                        "initial token fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    tracing::error!(attempt, error = %err, "unable to fetch initial hydra access token");
                    return Err(ConsentError::FatalStartup {
                        attempts: attempt,
                        source: err,
                    });
                }
            }
        }
    }
}
