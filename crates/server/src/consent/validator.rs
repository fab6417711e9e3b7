//! Gatekeeper run on every request entering the consent flow.
//!
//! Resolves the consent request id from the query or the session, refuses
//! flows the authorization server reported as failed and, in extended mode,
//! applies the request's `prompt` / `max_age` re-authentication policy.

use crate::config::ValidatorMode;
use crate::consent::session::{Session, SessionPatch};
use crate::error::ConsentError;
use crate::hydra::{ConsentGateway, ConsentRequest, Prompt};
use serde::Deserialize;
use time::OffsetDateTime;
use utoipa::IntoParams;

pub const MISSING_CONSENT_ID: &str = "missing consent request id";
pub const AUTHENTICATION_REQUIRED: &str = "authentication required";

#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConsentQuery {
    /// Consent request id issued by Hydra.
    pub consent: Option<String>,
    /// Error code reported by the authorization server.
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// Immutable snapshot the validator decides on.
#[derive(Debug, Clone, Copy)]
pub struct ValidatorInput<'a> {
    pub query: &'a ConsentQuery,
    pub session: &'a Session,
    pub now: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validated {
    pub consent_id: String,
    pub patch: SessionPatch,
    /// Present in extended mode only.
    pub consent_request: Option<ConsentRequest>,
}

/// A failed validation. The patch still has to be applied before the error
/// is reported, so a forced logout sticks even when the flow stops.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct Rejection {
    pub error: ConsentError,
    pub patch: SessionPatch,
}

impl From<ConsentError> for Rejection {
    fn from(error: ConsentError) -> Self {
        Self {
            error,
            patch: SessionPatch::default(),
        }
    }
}

/// Outcome of the `prompt` / `max_age` policy for one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Reauthentication {
    /// The current principal must be dropped.
    pub logout: bool,
    /// `prompt=none` was requested but no principal remains.
    pub authentication_required: bool,
}

enum Mode {
    Basic,
    Extended(ConsentGateway),
}

pub struct ConsentValidator {
    mode: Mode,
}

impl ConsentValidator {
    pub fn basic() -> Self {
        Self { mode: Mode::Basic }
    }

    pub fn extended(gateway: ConsentGateway) -> Self {
        Self {
            mode: Mode::Extended(gateway),
        }
    }

    pub fn for_mode(mode: ValidatorMode, gateway: ConsentGateway) -> Self {
        match mode {
            ValidatorMode::Basic => Self::basic(),
            ValidatorMode::Extended => Self::extended(gateway),
        }
    }

    pub fn mode(&self) -> ValidatorMode {
        match self.mode {
            Mode::Basic => ValidatorMode::Basic,
            Mode::Extended(_) => ValidatorMode::Extended,
        }
    }

    /// Run the validator. On error the caller must not proceed, but must
    /// still apply the rejection's patch.
    #[tracing::instrument(
        name = "consent_validate",
        skip(self, input),
        fields(mode = ?self.mode(), consent = tracing::field::Empty)
    )]
    pub async fn validate(&self, input: ValidatorInput<'_>) -> Result<Validated, Rejection> {
        let consent_id = resolve_consent_id(input.query, input.session)?;
        tracing::Span::current().record("consent", consent_id.as_str());

        let mut patch = SessionPatch::set_consent(consent_id.clone());

        let consent_request = match &self.mode {
            Mode::Basic => None,
            Mode::Extended(gateway) => {
                let request = gateway.fetch(&consent_id).await?;
                let policy = reauthentication_required(&request, input.session, input.now);
                patch.logout = policy.logout;
                patch.reauthenticated_for = Some(consent_id.clone());
                if policy.authentication_required {
                    return Err(Rejection {
                        error: ConsentError::validation(Some(&consent_id), AUTHENTICATION_REQUIRED),
                        patch,
                    });
                }
                Some(request)
            }
        };

        tracing::debug!(logout = patch.logout, "consent request validated");
        Ok(Validated {
            consent_id,
            patch,
            consent_request,
        })
    }
}

/// Steps shared by both modes: surface upstream errors, then pick the
/// consent id from the query, falling back to the session.
pub fn resolve_consent_id(query: &ConsentQuery, session: &Session) -> Result<String, ConsentError> {
    if let Some(error) = query.error.as_deref() {
        tracing::error!(
            error,
            error_description = ?query.error_description,
            "the consent flow resulted in an error"
        );
        let message = query
            .error_description
            .clone()
            .unwrap_or_else(|| error.to_string());
        return Err(ConsentError::validation(session.consent_id.as_deref(), message));
    }

    query
        .consent
        .as_deref()
        .filter(|id| !id.is_empty())
        .or(session.consent_id.as_deref().filter(|id| !id.is_empty()))
        .map(str::to_owned)
        .ok_or_else(|| {
            tracing::error!("the consent flow was requested without a consent request id");
            ConsentError::validation(None, MISSING_CONSENT_ID)
        })
}

/// Apply the `prompt` / `max_age` policy of `request` to the session.
///
/// The policy forces at most one logout per consent request. Once the
/// session records it ran for `request`, the principal present has logged in
/// since and is accepted as is.
pub fn reauthentication_required(
    request: &ConsentRequest,
    session: &Session,
    now: OffsetDateTime,
) -> Reauthentication {
    let already_applied = session.reauthenticated_for.as_deref() == Some(request.id.as_str());
    let mut logout = false;

    if !already_applied && request.requested_prompt == Some(Prompt::Login) {
        tracing::debug!(consent = %request.id, "logging principal out because prompt is login");
        logout = true;
    }

    if let (Some(principal), Some(max_age)) = (&session.principal, request.requested_max_age) {
        if !already_applied && principal.auth_time.saturating_add(max_age) < now.unix_timestamp() {
            tracing::debug!(
                consent = %request.id,
                auth_time = principal.auth_time,
                max_age,
                "logging principal out because max_age was exceeded"
            );
            logout = true;
        }
    }

    let authenticated = session.is_authenticated() && !logout;
    Reauthentication {
        logout,
        authentication_required: request.requested_prompt == Some(Prompt::None) && !authenticated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consent::session::{ConsentIdChange, Principal};
    use serde_json::Map;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2030-01-01 12:00:00 UTC);

    fn query(consent: Option<&str>) -> ConsentQuery {
        ConsentQuery {
            consent: consent.map(str::to_owned),
            ..ConsentQuery::default()
        }
    }

    fn authenticated(auth_time: i64) -> Session {
        Session {
            principal: Some(Principal::new("user-1", Map::new(), auth_time)),
            ..Session::default()
        }
    }

    fn request(prompt: Option<Prompt>, max_age: Option<i64>) -> ConsentRequest {
        ConsentRequest {
            id: "c1".into(),
            client_id: "app".into(),
            expires_at: None,
            redirect_url: "http://hydra.localhost/cb".into(),
            requested_scopes: vec!["openid".into()],
            requested_max_age: max_age,
            requested_prompt: prompt,
            requested_acr: vec![],
        }
    }

    #[test]
    fn missing_id_everywhere_fails() {
        let err = resolve_consent_id(&query(None), &Session::default()).unwrap_err();
        assert_eq!(err.to_string(), MISSING_CONSENT_ID);
        let err = resolve_consent_id(&query(Some("")), &Session::default()).unwrap_err();
        assert_eq!(err.to_string(), MISSING_CONSENT_ID);
    }

    #[test]
    fn upstream_error_wins_over_valid_id() {
        let q = ConsentQuery {
            consent: Some("c1".into()),
            error: Some("foo".into()),
            error_description: Some("bar".into()),
        };
        let session = Session {
            consent_id: Some("c0".into()),
            ..Session::default()
        };
        let err = resolve_consent_id(&q, &session).unwrap_err();
        assert!(matches!(err, ConsentError::Validation { .. }));
        assert_eq!(err.to_string(), "bar");
    }

    #[test]
    fn query_takes_precedence_over_session() {
        let session = Session {
            consent_id: Some("from-session".into()),
            ..Session::default()
        };
        assert_eq!(
            resolve_consent_id(&query(Some("from-query")), &session).unwrap(),
            "from-query"
        );
        assert_eq!(
            resolve_consent_id(&query(None), &session).unwrap(),
            "from-session"
        );
    }

    #[tokio::test]
    async fn basic_mode_persists_consent_id() {
        let validator = ConsentValidator::basic();
        let session = Session::default();
        let q = query(Some("X"));
        let validated = validator
            .validate(ValidatorInput {
                query: &q,
                session: &session,
                now: NOW,
            })
            .await
            .unwrap();
        assert_eq!(validated.consent_id, "X");
        assert_eq!(validated.patch.consent_id, ConsentIdChange::Set("X".into()));
        assert!(!validated.patch.logout);
        assert!(validated.consent_request.is_none());

        let mut session = session;
        validated.patch.apply(&mut session);
        assert_eq!(session.consent_id.as_deref(), Some("X"));
    }

    fn logs_out(request: &ConsentRequest, session: &Session) -> bool {
        reauthentication_required(request, session, NOW).logout
    }

    #[test]
    fn prompt_login_logs_out_once_per_consent() {
        let fresh = NOW.unix_timestamp();
        let login = request(Some(Prompt::Login), None);
        assert!(logs_out(&login, &authenticated(fresh)));
        assert!(logs_out(&login, &Session::default()));

        let relogged = Session {
            reauthenticated_for: Some("c1".into()),
            ..authenticated(fresh)
        };
        assert!(!logs_out(&login, &relogged));

        let other_consent = Session {
            reauthenticated_for: Some("c0".into()),
            ..authenticated(fresh)
        };
        assert!(logs_out(&login, &other_consent));
    }

    #[test]
    fn exceeded_max_age_logs_out() {
        let auth_time = NOW.unix_timestamp() - 120;
        assert!(logs_out(&request(None, Some(60)), &authenticated(auth_time)));
        assert!(!logs_out(&request(None, Some(600)), &authenticated(auth_time)));
        assert!(!logs_out(&request(None, None), &authenticated(auth_time)));
    }

    #[test]
    fn prompt_none_requires_authentication() {
        let none = request(Some(Prompt::None), None);
        let policy = reauthentication_required(&none, &Session::default(), NOW);
        assert!(policy.authentication_required);
        assert!(!policy.logout);

        let auth_time = NOW.unix_timestamp() - 120;
        assert_eq!(
            reauthentication_required(&none, &authenticated(auth_time), NOW),
            Reauthentication::default()
        );
    }

    #[test]
    fn prompt_none_with_exceeded_max_age_logs_out_and_fails() {
        let auth_time = NOW.unix_timestamp() - 120;
        let policy = reauthentication_required(
            &request(Some(Prompt::None), Some(60)),
            &authenticated(auth_time),
            NOW,
        );
        assert_eq!(
            policy,
            Reauthentication {
                logout: true,
                authentication_required: true,
            }
        );
    }
}
