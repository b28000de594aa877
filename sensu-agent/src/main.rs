//! Sensu Agent daemon
//!
//! Loads the configuration, connects to the bus and runs until SIGINT or
//! SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sensu_agent::config::AGENT_VERSION;
use sensu_agent::{AgentConfig, CheckRegistry, Client, MqttTransport};

fn init_logging() {
    let verbose = std::env::var("SENSU_VERBOSE")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let default_level = if verbose { "sensu_agent=debug" } else { "sensu_agent=info" };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Interrupt received"),
        _ = terminate => info!("Termination requested"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_logging();

    info!(version = AGENT_VERSION, "Sensu agent starting");

    let settings = AgentConfig::load()
        .context("Failed to load configuration")?
        .resolve()
        .context("Invalid configuration")?;
    info!(
        client = %settings.identity.name(),
        subscriptions = ?settings.identity.subscriptions(),
        endpoints = settings.endpoints.len(),
        "Configuration loaded"
    );

    let settings = Arc::new(settings);
    let transport = Arc::new(MqttTransport::new(
        settings.endpoints.clone(),
        settings.identity.name(),
    ));
    let client = Client::new(transport, settings, Arc::new(CheckRegistry::new()));

    client
        .start(shutdown_signal())
        .await
        .context("Failed to close the bus connection")?;

    info!("Sensu agent stopped");
    Ok(())
}
