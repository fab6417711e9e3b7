//! OpenAPI/Utoipa configuration.

use crate::api::{consent::CONSENT_TAG, health::MISC_TAG};
use utoipa::OpenApi;

/// OpenAPI documentation configuration.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Hydra Consent API",
        version = "1.0.0",
        description = "Consent screen and decision endpoints mediating ORY Hydra consent requests."
    ),
    tags(
        (name = MISC_TAG, description = "Miscellaneous endpoints"),
        (name = CONSENT_TAG, description = "OAuth2 consent flow endpoints")
    )
)]
pub struct ApiDoc;
