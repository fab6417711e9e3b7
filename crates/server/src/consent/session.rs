//! Session state read by the consent flow and the patches it produces.

use crate::consent::csrf::CsrfSecret;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The authenticated resource owner, as established by the identity provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    #[serde(default)]
    pub claims: Map<String, Value>,
    /// Epoch seconds at which the principal authenticated.
    pub auth_time: i64,
}

impl Principal {
    pub fn new(subject: impl Into<String>, claims: Map<String, Value>, auth_time: i64) -> Self {
        Self {
            subject: subject.into(),
            claims,
            auth_time,
        }
    }

    pub fn claim(&self, key: &str) -> Option<&Value> {
        self.claims.get(key)
    }

    /// Name shown on the consent screen.
    pub fn display_name(&self) -> &str {
        ["name", "nickname", "email"]
            .iter()
            .find_map(|key| self.claim(key).and_then(Value::as_str))
            .unwrap_or(&self.subject)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Session {
    /// In-flight consent request id.
    pub consent_id: Option<String>,
    pub principal: Option<Principal>,
    pub csrf_secret: Option<CsrfSecret>,
    /// Consent request whose `prompt` / `max_age` policy already ran. A
    /// principal present afterwards logged in after the policy forced it out.
    pub reauthenticated_for: Option<String>,
}

impl Session {
    pub fn is_authenticated(&self) -> bool {
        self.principal.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConsentIdChange {
    #[default]
    Keep,
    Set(String),
    Clear,
}

/// Session mutations requested by a consent transition. Applying them is
/// the caller's job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    pub consent_id: ConsentIdChange,
    /// Drop the authenticated principal (forced re-authentication).
    pub logout: bool,
    /// Record that the re-authentication policy of this consent request ran.
    pub reauthenticated_for: Option<String>,
}

impl SessionPatch {
    pub fn set_consent(id: impl Into<String>) -> Self {
        Self {
            consent_id: ConsentIdChange::Set(id.into()),
            ..Self::default()
        }
    }

    pub fn clear_consent() -> Self {
        Self {
            consent_id: ConsentIdChange::Clear,
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.consent_id == ConsentIdChange::Keep
            && !self.logout
            && self.reauthenticated_for.is_none()
    }

    pub fn apply(&self, session: &mut Session) {
        match &self.consent_id {
            ConsentIdChange::Keep => {}
            ConsentIdChange::Set(id) => session.consent_id = Some(id.clone()),
            ConsentIdChange::Clear => {
                session.consent_id = None;
                session.reauthenticated_for = None;
            }
        }
        if self.logout {
            session.principal = None;
        }
        if let Some(id) = &self.reauthenticated_for {
            session.reauthenticated_for = Some(id.clone());
        }
    }
}
