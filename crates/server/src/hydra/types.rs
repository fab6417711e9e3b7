//! Wire types of the Hydra token endpoint and consent-request API.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;

/// Scope that makes the consent screen grant every requested scope without
/// asking the resource owner.
pub const FORCE_CONSENT_SCOPE: &str = "force-consent";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Prompt {
    Login,
    None,
    Consent,
}

impl FromStr for Prompt {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login" => Ok(Prompt::Login),
            "none" => Ok(Prompt::None),
            "consent" => Ok(Prompt::Consent),
            other => Err(format!("unknown prompt value \"{other}\"")),
        }
    }
}

fn deserialize_prompt<'de, D>(deserializer: D) -> Result<Option<Prompt>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value.parse().map(Some).map_err(serde::de::Error::custom),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// A pending consent request as returned by `GET /oauth2/consent/requests/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRequest {
    pub id: String,
    pub client_id: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    pub redirect_url: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub requested_scopes: Vec<String>,
    #[serde(default)]
    pub requested_max_age: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_prompt")]
    pub requested_prompt: Option<Prompt>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub requested_acr: Vec<String>,
}

impl ConsentRequest {
    pub fn requests_scope(&self, scope: &str) -> bool {
        self.requested_scopes.iter().any(|s| s == scope)
    }

    pub fn forces_consent(&self) -> bool {
        self.requests_scope(FORCE_CONSENT_SCOPE)
    }
}

/// Validated claims produced by a hydrator, ready to be attached to an
/// accept call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimsPayload {
    pub subject: String,
    pub id_token_extra: Map<String, Value>,
    pub access_token_extra: Map<String, Value>,
}

/// Body of `PATCH /oauth2/consent/requests/{id}/accept`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptConsentRequest {
    pub subject: String,
    pub grant_scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    pub id_token_extra: Map<String, Value>,
    pub access_token_extra: Map<String, Value>,
}

impl AcceptConsentRequest {
    pub fn new(claims: ClaimsPayload, granted_scopes: Vec<String>) -> Self {
        Self {
            subject: claims.subject,
            grant_scopes: granted_scopes,
            auth_time: None,
            id_token_extra: claims.id_token_extra,
            access_token_extra: claims.access_token_extra,
        }
    }

    pub fn with_auth_time(mut self, auth_time: Option<i64>) -> Self {
        self.auth_time = auth_time;
        self
    }
}

/// Body of `PATCH /oauth2/consent/requests/{id}/reject`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectConsentRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Service-level bearer token obtained through the client-credentials grant.
#[derive(Clone)]
pub struct ServiceToken {
    value: String,
    expires_at: OffsetDateTime,
}

impl ServiceToken {
    pub(crate) fn new(value: String, expires_at: OffsetDateTime) -> Self {
        Self { value, expires_at }
    }

    pub(crate) fn value(&self) -> &str {
        &self.value
    }

    pub fn expires_at(&self) -> OffsetDateTime {
        self.expires_at
    }

    /// Whether the token is still usable at `now` with `margin` to spare.
    pub fn is_fresh_at(&self, now: OffsetDateTime, margin: Duration) -> bool {
        self.expires_at - margin > now
    }
}

impl fmt::Debug for ServiceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceToken")
            .field("value", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
