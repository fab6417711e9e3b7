use crate::consent::session::Principal;
use crate::error::ConsentError;
use crate::hydra::ConsentRequest;
use askama::Template;

/// Inputs of the consent screen.
#[derive(Debug, Clone, Copy)]
pub struct RenderContext<'a> {
    pub principal: Option<&'a Principal>,
    pub consent_request: &'a ConsentRequest,
    pub csrf_token: &'a str,
}

/// Produces the consent screen shown to the resource owner.
pub trait ScopeRenderer: Send + Sync {
    fn render(&self, ctx: RenderContext<'_>) -> Result<String, ConsentError>;
}

/// Scope information for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeInfo {
    pub scope: String,
    pub name: String,
    pub description: String,
}

/// Get human-readable scope information.
pub fn scope_info(scope: &str) -> ScopeInfo {
    let (name, description) = match scope {
        "openid" => (
            "OpenID",
            "Application will authenticate using your current account",
        ),
        "email" => ("Email", "Application has access to your email address"),
        "profile" => (
            "Profile",
            "Application can access your basic profile information",
        ),
        "offline" => (
            "Offline access",
            "Application does not have to ask for these permissions again",
        ),
        _ => {
            return ScopeInfo {
                scope: scope.to_string(),
                name: scope.to_string(),
                description: format!("Access to {scope}"),
            };
        }
    };
    ScopeInfo {
        scope: scope.to_string(),
        name: name.to_string(),
        description: description.to_string(),
    }
}

/// Consent page template.
#[derive(Template)]
#[template(path = "consent.html")]
struct ConsentTemplate<'a> {
    user_name: &'a str,
    client_id: &'a str,
    scopes: Vec<ScopeInfo>,
    csrf_token: &'a str,
}

/// Default renderer: an HTML form posting back to the consent screen.
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlScopeRenderer;

impl ScopeRenderer for HtmlScopeRenderer {
    fn render(&self, ctx: RenderContext<'_>) -> Result<String, ConsentError> {
        let template = ConsentTemplate {
            user_name: ctx.principal.map(Principal::display_name).unwrap_or(""),
            client_id: &ctx.consent_request.client_id,
            scopes: ctx
                .consent_request
                .requested_scopes
                .iter()
                .map(|s| scope_info(s))
                .collect(),
            csrf_token: ctx.csrf_token,
        };

        template.render().map_err(|e| {
            tracing::error!("Failed to render consent template: {}", e);
            ConsentError::Render {
                consent: Some(ctx.consent_request.id.clone()),
                message: e.to_string(),
            }
        })
    }
}
