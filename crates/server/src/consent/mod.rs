//! The consent flow: validation, decision, claims hydration and rendering.

pub mod csrf;
pub mod hydrator;
pub mod orchestrator;
pub mod render;
pub mod session;
pub mod validator;

pub use csrf::{CsrfSecret, CsrfTokenSource};
pub use hydrator::{HydratedClaims, HydrationContext, Hydrator, OpenIdConnectHydrator};
pub use orchestrator::{
    ConsentDecision, ConsentOrchestrator, ConsentOutcome, DENY_REASON, DecisionForm, DecisionInput,
};
pub use render::{HtmlScopeRenderer, RenderContext, ScopeInfo, ScopeRenderer, scope_info};
pub use session::{ConsentIdChange, Principal, Session, SessionPatch};
pub use validator::{
    AUTHENTICATION_REQUIRED, ConsentQuery, ConsentValidator, MISSING_CONSENT_ID, Reauthentication,
    Rejection, Validated, ValidatorInput,
};
