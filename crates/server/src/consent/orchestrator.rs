//! Consent decision state machine.
//!
//! A run fetches the consent request, then either auto-grants it
//! (`force-consent`), renders the consent screen (GET) or applies the
//! submitted decision (POST). Granting hydrates claims before the request is
//! accepted. Every terminal redirect carries a [`SessionPatch`] clearing the
//! consent id; the caller applies it.

use crate::consent::csrf::CsrfTokenSource;
use crate::consent::hydrator::{HydrationContext, Hydrator, OpenIdConnectHydrator};
use crate::consent::render::{HtmlScopeRenderer, RenderContext, ScopeRenderer};
use crate::consent::session::{Principal, SessionPatch};
use crate::consent::validator::AUTHENTICATION_REQUIRED;
use crate::error::ConsentError;
use crate::hydra::{AcceptConsentRequest, ConsentGateway, ConsentRequest};
use axum::http::Method;
use serde::Deserialize;
use std::sync::Arc;

pub const DENY_REASON: &str = "resource owner denied authorization";

/// Decision fields submitted from the consent screen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecisionForm {
    pub granted_scopes: Vec<String>,
    pub grant_authorization: Option<String>,
    pub deny_authorization: Option<String>,
    pub csrf_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JsonDecisionForm {
    #[serde(default, alias = "grantedScopes[]")]
    granted_scopes: Option<OneOrMany>,
    #[serde(default)]
    grant_authorization: Option<String>,
    #[serde(default)]
    deny_authorization: Option<String>,
    #[serde(default, rename = "_csrf")]
    csrf_token: Option<String>,
}

impl DecisionForm {
    /// Parse an `application/x-www-form-urlencoded` body. Repeated
    /// `grantedScopes` (or `grantedScopes[]`) keys accumulate.
    pub fn from_urlencoded(body: &[u8]) -> Self {
        let mut form = DecisionForm::default();
        for (key, value) in url::form_urlencoded::parse(body) {
            match key.as_ref() {
                "grantedScopes" | "grantedScopes[]" => form.granted_scopes.push(value.into_owned()),
                "grantAuthorization" => form.grant_authorization = Some(value.into_owned()),
                "denyAuthorization" => form.deny_authorization = Some(value.into_owned()),
                "_csrf" => form.csrf_token = Some(value.into_owned()),
                _ => {}
            }
        }
        form
    }

    /// Parse a JSON body. `grantedScopes` may be a string or an array.
    pub fn from_json(body: &[u8]) -> Result<Self, ConsentError> {
        let raw: JsonDecisionForm = serde_json::from_slice(body).map_err(|e| {
            ConsentError::validation(None, format!("malformed decision body: {e}"))
        })?;
        let granted_scopes = match raw.granted_scopes {
            None => Vec::new(),
            Some(OneOrMany::One(scope)) => vec![scope],
            Some(OneOrMany::Many(scopes)) => scopes,
        };
        Ok(Self {
            granted_scopes,
            grant_authorization: raw.grant_authorization,
            deny_authorization: raw.deny_authorization,
            csrf_token: raw.csrf_token,
        })
    }
}

/// Outcome of interpreting a submitted [`DecisionForm`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentDecision {
    pub granted_scopes: Vec<String>,
    pub denied: bool,
    /// Present iff `denied`.
    pub deny_reason: Option<String>,
}

impl ConsentDecision {
    pub fn deny() -> Self {
        Self {
            granted_scopes: Vec::new(),
            denied: true,
            deny_reason: Some(DENY_REASON.to_string()),
        }
    }

    pub fn grant(scopes: Vec<String>) -> Self {
        Self {
            granted_scopes: normalize_scopes(scopes),
            denied: false,
            deny_reason: None,
        }
    }

    /// Deny wins when both buttons were submitted.
    pub fn from_form(consent: &str, form: &DecisionForm) -> Result<Self, ConsentError> {
        let non_empty = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.is_empty());

        if non_empty(&form.deny_authorization) {
            Ok(Self::deny())
        } else if non_empty(&form.grant_authorization) {
            Ok(Self::grant(form.granted_scopes.clone()))
        } else {
            tracing::error!(
                consent,
                "authorization was neither granted nor denied, the form must include grantAuthorization or denyAuthorization"
            );
            Err(ConsentError::AuthorizationUndecided {
                consent: Some(consent.to_owned()),
            })
        }
    }
}

/// Drop empty entries and duplicates, keeping first-seen order.
fn normalize_scopes(scopes: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(scopes.len());
    for scope in scopes {
        if !scope.is_empty() && !out.contains(&scope) {
            out.push(scope);
        }
    }
    out
}

/// Immutable snapshot a run decides on.
pub struct DecisionInput<'a> {
    pub consent_id: &'a str,
    /// Reused instead of fetching again when the validator already did.
    pub consent_request: Option<ConsentRequest>,
    pub method: &'a Method,
    pub principal: Option<&'a Principal>,
    pub form: Option<&'a DecisionForm>,
    pub csrf: Option<&'a dyn CsrfTokenSource>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsentOutcome {
    /// Consent screen to show. The session is left untouched.
    Render { page: String },
    /// Terminal redirect back to the authorization server.
    Redirect {
        location: String,
        patch: SessionPatch,
    },
}

#[derive(Clone)]
pub struct ConsentOrchestrator {
    gateway: ConsentGateway,
    renderer: Arc<dyn ScopeRenderer>,
    hydrator: Arc<dyn Hydrator>,
}

impl ConsentOrchestrator {
    pub fn new(gateway: ConsentGateway) -> Self {
        Self {
            gateway,
            renderer: Arc::new(HtmlScopeRenderer),
            hydrator: Arc::new(OpenIdConnectHydrator),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ScopeRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_hydrator(mut self, hydrator: Arc<dyn Hydrator>) -> Self {
        self.hydrator = hydrator;
        self
    }

    #[tracing::instrument(
        name = "consent_decide",
        skip(self, input),
        fields(consent = %input.consent_id, method = %input.method)
    )]
    pub async fn run(&self, input: DecisionInput<'_>) -> Result<ConsentOutcome, ConsentError> {
        let consent = input.consent_id;
        let request = match input.consent_request {
            Some(request) => request,
            None => self.gateway.fetch(consent).await?,
        };

        if request.forces_consent() {
            tracing::debug!("consent is forced, granting every requested scope");
            let granted = request.requested_scopes.clone();
            return self
                .grant(consent, &request, input.principal, granted)
                .await;
        }

        if input.method != Method::POST {
            return self.render(consent, &request, input.principal, input.csrf);
        }

        let default_form = DecisionForm::default();
        let form = input.form.unwrap_or(&default_form);
        let decision = ConsentDecision::from_form(consent, form)?;

        if let Some(reason) = decision.deny_reason.as_deref() {
            tracing::debug!("resource owner denied authorization");
            self.gateway.reject(consent, reason).await?;
            tracing::info!(client_id = %request.client_id, "consent request rejected");
            return Ok(finish(&request));
        }

        tracing::debug!(granted_scopes = ?decision.granted_scopes, "resource owner granted authorization");
        self.grant(consent, &request, input.principal, decision.granted_scopes)
            .await
    }

    fn render(
        &self,
        consent: &str,
        request: &ConsentRequest,
        principal: Option<&Principal>,
        csrf: Option<&dyn CsrfTokenSource>,
    ) -> Result<ConsentOutcome, ConsentError> {
        let Some(csrf) = csrf else {
            tracing::error!("csrf protection is required to render the consent screen");
            return Err(ConsentError::CsrfMissing {
                consent: Some(consent.to_owned()),
            });
        };
        let csrf_token = csrf.mint();
        let page = self.renderer.render(RenderContext {
            principal,
            consent_request: request,
            csrf_token: &csrf_token,
        })?;
        Ok(ConsentOutcome::Render { page })
    }

    async fn grant(
        &self,
        consent: &str,
        request: &ConsentRequest,
        principal: Option<&Principal>,
        granted_scopes: Vec<String>,
    ) -> Result<ConsentOutcome, ConsentError> {
        let Some(principal) = principal else {
            return Err(ConsentError::validation(Some(consent), AUTHENTICATION_REQUIRED));
        };

        let claims = self
            .hydrator
            .hydrate(HydrationContext {
                subject: &principal.subject,
                consent_id: consent,
                consent_request: request,
                granted_scopes: &granted_scopes,
                principal,
            })
            .await?
            .into_payload(consent)?;

        let body = AcceptConsentRequest::new(claims, granted_scopes)
            .with_auth_time(Some(principal.auth_time));
        self.gateway.accept(consent, &body).await?;
        tracing::info!(
            client_id = %request.client_id,
            subject = %body.subject,
            "consent request accepted"
        );
        Ok(finish(request))
    }
}

fn finish(request: &ConsentRequest) -> ConsentOutcome {
    ConsentOutcome::Redirect {
        location: request.redirect_url.clone(),
        patch: SessionPatch::clear_consent(),
    }
}
