//! HTTP surface of the consent service.
//!
//! - `consent` - consent flow endpoints (/consent, /consent-ui)
//! - `health` - health check endpoint (/healthz)
//! - `openapi` - OpenAPI/Utoipa configuration

pub mod consent;
pub mod health;
pub mod openapi;

pub use consent::{CONSENT_TAG, ConsentState};
pub use health::MISC_TAG;

use axum::Router;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_axum::{router::OpenApiRouter, routes};
use utoipa_redoc::{Redoc, Servable};

/// The application routes together with the OpenAPI document describing them.
pub fn api_router(state: ConsentState) -> (Router, utoipa::openapi::OpenApi) {
    OpenApiRouter::with_openapi(openapi::ApiDoc::openapi())
        .merge(consent::router(state))
        .routes(routes!(health::health))
        .layer(TraceLayer::new_for_http())
        .split_for_parts()
}

/// Builds the application router with OpenAPI docs mounted at `/api-docs`.
pub fn build_router(state: ConsentState) -> Router {
    let (router, api) = api_router(state);
    router.merge(Redoc::with_url("/api-docs", api))
}

/// Starts the web server on `listen_addr`.
#[tracing::instrument(skip(state))]
pub async fn start_webserver(listen_addr: &str, state: ConsentState) -> color_eyre::Result<()> {
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Server running");
    axum::serve(listener, router)
        .await
        .map_err(|e| color_eyre::Report::msg(format!("Failed to start server: {e}")))?;

    Ok(())
}
