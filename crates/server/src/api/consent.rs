//! Consent endpoints.
//!
//! - `GET /consent` - entry point Hydra redirects the browser to
//! - `GET /consent-ui` - consent screen
//! - `POST /consent-ui` - decision submission

use crate::consent::{
    ConsentOrchestrator, ConsentOutcome, ConsentQuery, ConsentValidator, CsrfTokenSource,
    DecisionForm, DecisionInput, Rejection, Session, Validated, ValidatorInput,
};
use crate::error::ConsentError;
use crate::session_store::{LoadedSession, MemorySessionStore};
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, Method, header},
    response::{Html, IntoResponse, Redirect, Response},
};
use std::sync::Arc;
use time::OffsetDateTime;
use utoipa_axum::{router::OpenApiRouter, routes};

/// Tag for OpenAPI documentation.
pub const CONSENT_TAG: &str = "Consent";

pub const CONSENT_UI_PATH: &str = "/consent-ui";
pub const CSRF_HEADER: &str = "x-csrf-token";
pub const INVALID_CSRF_TOKEN: &str = "invalid csrf token";

/// Shared state for the consent endpoints.
#[derive(Clone)]
pub struct ConsentState {
    pub validator: Arc<ConsentValidator>,
    pub orchestrator: ConsentOrchestrator,
    pub sessions: MemorySessionStore,
    /// Where unauthenticated sessions are sent.
    pub login_redirect: String,
}

/// Creates the consent router.
pub fn router(state: ConsentState) -> OpenApiRouter {
    OpenApiRouter::new()
        .routes(routes!(consent_entry))
        .routes(routes!(consent_screen, consent_decision))
        .with_state(state)
}

/// Persist the session and attach its cookie to `response`.
fn with_session(sessions: &MemorySessionStore, loaded: LoadedSession, response: impl IntoResponse) -> Response {
    let mut response = response.into_response();
    if let Some(cookie) = sessions.commit(loaded) {
        response.headers_mut().insert(header::SET_COOKIE, cookie);
    }
    response
}

async fn validate(
    state: &ConsentState,
    query: &ConsentQuery,
    loaded: &mut LoadedSession,
) -> Result<Validated, Rejection> {
    let validated = state
        .validator
        .validate(ValidatorInput {
            query,
            session: &loaded.session,
            now: OffsetDateTime::now_utc(),
        })
        .await?;
    validated.patch.apply(&mut loaded.session);
    Ok(validated)
}

/// Report a failed validation, persisting the session changes it carries.
fn reject(sessions: &MemorySessionStore, mut loaded: LoadedSession, rejection: Rejection) -> Response {
    if rejection.patch.is_empty() {
        return rejection.error.into_response();
    }
    rejection.patch.apply(&mut loaded.session);
    with_session(sessions, loaded, rejection.error)
}

fn csrf_source(session: &Session) -> Option<&dyn CsrfTokenSource> {
    session
        .csrf_secret
        .as_ref()
        .map(|secret| secret as &dyn CsrfTokenSource)
}

#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/consent",
    params(ConsentQuery),
    tag = CONSENT_TAG,
    operation_id = "Consent Entry",
    summary = "Start the consent flow",
    description = "Validates the consent request Hydra redirected the browser with and stores its id in the session. \
                   Authenticated sessions continue to the consent screen, others are sent to the login page.",
    responses(
        (status = 303, description = "Redirect to the consent screen or the login page"),
        (status = 400, description = "Missing consent request id or upstream authorization error", content_type = "application/json"),
        (status = 502, description = "Hydra request failed", content_type = "application/json")
    )
)]
async fn consent_entry(
    State(state): State<ConsentState>,
    Query(query): Query<ConsentQuery>,
    headers: HeaderMap,
) -> Result<Response, ConsentError> {
    let mut loaded = state.sessions.load_or_create(&headers);
    if let Err(rejection) = validate(&state, &query, &mut loaded).await {
        return Ok(reject(&state.sessions, loaded, rejection));
    }

    let location = if loaded.session.is_authenticated() {
        CONSENT_UI_PATH
    } else {
        tracing::debug!("session is not authenticated, redirecting to login");
        state.login_redirect.as_str()
    };
    let redirect = Redirect::to(location);
    Ok(with_session(&state.sessions, loaded, redirect))
}

#[tracing::instrument(skip(state, headers))]
#[utoipa::path(
    get,
    path = "/consent-ui",
    params(ConsentQuery),
    tag = CONSENT_TAG,
    operation_id = "Consent Screen",
    summary = "Render the consent screen",
    description = "Shows the requested scopes to the resource owner together with a CSRF token. \
                   Requests carrying the `force-consent` scope are accepted without user interaction.",
    responses(
        (status = 200, description = "Consent screen", body = str, content_type = "text/html"),
        (status = 303, description = "Redirect to the login page or back to Hydra"),
        (status = 400, description = "Invalid consent request", content_type = "application/json"),
        (status = 502, description = "Hydra request failed", content_type = "application/json")
    )
)]
async fn consent_screen(
    State(state): State<ConsentState>,
    Query(query): Query<ConsentQuery>,
    headers: HeaderMap,
) -> Result<Response, ConsentError> {
    let loaded = state.sessions.load_or_create(&headers);
    run(&state, &query, loaded, &Method::GET, None).await
}

#[tracing::instrument(skip(state, headers, body))]
#[utoipa::path(
    post,
    path = "/consent-ui",
    params(ConsentQuery),
    tag = CONSENT_TAG,
    operation_id = "Consent Decision",
    summary = "Submit the consent decision",
    request_body(
        content = String,
        content_type = "application/x-www-form-urlencoded",
        description = "Decision form, e.g. `grantedScopes=openid&grantAuthorization=accept&_csrf=<token>`"
    ),
    description = "Accepts `application/x-www-form-urlencoded` or `application/json` bodies with the fields \
                   `grantedScopes`, `grantAuthorization`, `denyAuthorization` and `_csrf`. \
                   The CSRF token may also be sent in the `x-csrf-token` header. \
                   Denying takes precedence over granting.",
    responses(
        (status = 303, description = "Redirect back to Hydra"),
        (status = 400, description = "Invalid CSRF token, consent request or undecided authorization", content_type = "application/json"),
        (status = 500, description = "Hydrator returned an invalid payload", content_type = "application/json"),
        (status = 502, description = "Hydra request failed", content_type = "application/json")
    )
)]
async fn consent_decision(
    State(state): State<ConsentState>,
    Query(query): Query<ConsentQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ConsentError> {
    let loaded = state.sessions.load_or_create(&headers);

    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/json"));
    let form = if is_json {
        DecisionForm::from_json(&body)?
    } else {
        DecisionForm::from_urlencoded(&body)
    };

    let token = form.csrf_token.as_deref().or_else(|| {
        headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
    });
    let verified = match (&loaded.session.csrf_secret, token) {
        (Some(secret), Some(token)) => secret.verify(token),
        _ => false,
    };
    if !verified {
        return Err(ConsentError::validation(
            loaded.session.consent_id.as_deref(),
            INVALID_CSRF_TOKEN,
        ));
    }

    run(&state, &query, loaded, &Method::POST, Some(&form)).await
}

/// Validator then orchestrator, shared by both consent screen methods.
async fn run(
    state: &ConsentState,
    query: &ConsentQuery,
    mut loaded: LoadedSession,
    method: &Method,
    form: Option<&DecisionForm>,
) -> Result<Response, ConsentError> {
    let validated = match validate(state, query, &mut loaded).await {
        Ok(validated) => validated,
        Err(rejection) => return Ok(reject(&state.sessions, loaded, rejection)),
    };

    if !loaded.session.is_authenticated() {
        tracing::debug!(consent = %validated.consent_id, "session is not authenticated, redirecting to login");
        let redirect = Redirect::to(&state.login_redirect);
        return Ok(with_session(&state.sessions, loaded, redirect));
    }

    let outcome = state
        .orchestrator
        .run(DecisionInput {
            consent_id: &validated.consent_id,
            consent_request: validated.consent_request,
            method,
            principal: loaded.session.principal.as_ref(),
            form,
            csrf: csrf_source(&loaded.session),
        })
        .await?;

    let response = match outcome {
        ConsentOutcome::Render { page } => Html(page).into_response(),
        ConsentOutcome::Redirect { location, patch } => {
            patch.apply(&mut loaded.session);
            Redirect::to(&location).into_response()
        }
    };
    Ok(with_session(&state.sessions, loaded, response))
}
