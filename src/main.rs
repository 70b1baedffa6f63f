//! toolchat - HTTP Server Entry Point
//!
//! Starts the HTTP server that exposes chat sessions.

use toolchat::config::{Config, API_KEY_CREDENTIAL};
use toolchat::credentials::{CredentialStore, EnvCredentialStore};
use toolchat::api;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolchat=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    info!(
        "Loaded configuration: model={}, max_tool_rounds={}, model_timeout={}s",
        config.model,
        config.max_tool_rounds,
        config.model_timeout.as_secs()
    );

    // Asks fail with missing_credential until the key is set; the server still starts.
    if EnvCredentialStore.get(API_KEY_CREDENTIAL).is_none() {
        warn!("{} is not set", API_KEY_CREDENTIAL);
    }

    info!("Starting server on {}:{}", config.host, config.port);
    api::serve(config).await?;

    Ok(())
}
