use hydra_consent::AppResources;
use hydra_consent::api::start_webserver;
use hydra_consent::config::load_config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

fn initialize_standard_tracing() {
    let default_directives = "hydra_consent=info,hyper=warn,reqwest=warn";
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    let registry = tracing_subscriber::registry().with(env_filter);
    let layer = fmt::layer().with_target(true).with_level(true);

    registry.with(layer).init();
}

#[tokio::main]
async fn main() -> color_eyre::eyre::Result<()> {
    color_eyre::install()?;
    dotenvy::dotenv().ok();

    initialize_standard_tracing();

    let config = load_config()?;
    tracing::info!(?config, "configuration loaded");

    let resources = AppResources::from_config(config)?;

    // No request is served before Hydra hands out a service token.
    if let Err(e) = resources.tokens.initialize().await {
        tracing::error!(error = %e, "unable to obtain the initial hydra access token");
        return Err(e.into());
    }

    let listen_addr = resources.config.listen_addr.clone();
    start_webserver(&listen_addr, resources.consent_state()).await
}
