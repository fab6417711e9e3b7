//! Mapping of granted scopes onto token claims.

use crate::consent::session::Principal;
use crate::error::ConsentError;
use crate::hydra::{ClaimsPayload, ConsentRequest};
use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Everything a hydrator may look at to produce claims.
#[derive(Debug, Clone, Copy)]
pub struct HydrationContext<'a> {
    pub subject: &'a str,
    pub consent_id: &'a str,
    pub consent_request: &'a ConsentRequest,
    pub granted_scopes: &'a [String],
    pub principal: &'a Principal,
}

/// Raw hydrator output. Nothing here is trusted until
/// [`HydratedClaims::into_payload`] has checked it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydratedClaims {
    pub subject: Option<String>,
    pub id_token_extra: Option<Value>,
    pub access_token_extra: Option<Value>,
}

impl HydratedClaims {
    pub fn new(subject: impl Into<String>, claims: Map<String, Value>) -> Self {
        Self {
            subject: Some(subject.into()),
            id_token_extra: Some(Value::Object(claims.clone())),
            access_token_extra: Some(Value::Object(claims)),
        }
    }

    pub fn into_payload(self, consent: &str) -> Result<ClaimsPayload, ConsentError> {
        let contract = |reason: &str| {
            tracing::debug!(consent, reason, "hydrator returned an invalid payload");
            ConsentError::HydratorContract {
                consent: Some(consent.to_owned()),
                reason: reason.to_owned(),
            }
        };

        let subject = match self.subject {
            Some(subject) if !subject.is_empty() => subject,
            _ => return Err(contract("no subject identifier was given")),
        };
        let Some(Value::Object(id_token_extra)) = self.id_token_extra else {
            return Err(contract("id token payload is missing or not an object"));
        };
        let Some(Value::Object(access_token_extra)) = self.access_token_extra else {
            return Err(contract("access token payload is missing or not an object"));
        };

        Ok(ClaimsPayload {
            subject,
            id_token_extra,
            access_token_extra,
        })
    }
}

#[async_trait]
pub trait Hydrator: Send + Sync {
    async fn hydrate(&self, ctx: HydrationContext<'_>) -> Result<HydratedClaims, ConsentError>;
}

const OPENID_CLAIMS: &[&str] = &["name"];
const PROFILE_CLAIMS: &[&str] = &[
    "picture",
    "name",
    "nickname",
    "created_at",
    "updated_at",
    "gender",
    "given_name",
    "family_name",
    "locale",
];
const EMAIL_CLAIMS: &[&str] = &["email", "email_verified"];
const TIMESTAMP_CLAIMS: &[&str] = &["created_at", "updated_at"];

/// Default hydrator for the standard OpenID Connect scopes.
///
/// `openid` contributes `name`, `profile` the profile claims and `email` the
/// address and its verification flag. Claims the principal does not carry
/// are left out. Other scopes contribute nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenIdConnectHydrator;

impl OpenIdConnectHydrator {
    fn claim_value(principal: &Principal, key: &str) -> Option<Value> {
        let value = principal.claim(key)?;
        if value.is_null() {
            return None;
        }
        if TIMESTAMP_CLAIMS.contains(&key) {
            return epoch_seconds(value);
        }
        Some(value.clone())
    }

    pub fn claims(principal: &Principal, granted_scopes: &[String]) -> Map<String, Value> {
        let mut data = Map::new();
        for (scope, keys) in [
            ("openid", OPENID_CLAIMS),
            ("profile", PROFILE_CLAIMS),
            ("email", EMAIL_CLAIMS),
        ] {
            if !granted_scopes.iter().any(|s| s == scope) {
                continue;
            }
            tracing::debug!(scope, "granting scope claims");
            for key in keys {
                if let Some(value) = Self::claim_value(principal, key) {
                    data.insert((*key).to_owned(), value);
                }
            }
        }
        data
    }
}

/// Profile timestamps arrive as RFC 3339 strings and leave as epoch seconds.
fn epoch_seconds(value: &Value) -> Option<Value> {
    match value {
        Value::Number(_) => Some(value.clone()),
        Value::String(raw) => match OffsetDateTime::parse(raw, &Rfc3339) {
            Ok(ts) => Some(Value::from(ts.unix_timestamp())),
            Err(e) => {
                tracing::warn!(value = %raw, error = %e, "dropping unparseable profile timestamp");
                None
            }
        },
        _ => None,
    }
}

#[async_trait]
impl Hydrator for OpenIdConnectHydrator {
    async fn hydrate(&self, ctx: HydrationContext<'_>) -> Result<HydratedClaims, ConsentError> {
        Ok(HydratedClaims::new(
            ctx.subject,
            Self::claims(ctx.principal, ctx.granted_scopes),
        ))
    }
}
