//! Trove gateway binary.

use anyhow::{Context, Result};
use clap::Parser;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trove_core::config::AppConfig;
use trove_server::{AppState, create_router};
use trove_storage::LocalPusher;

/// Trove - gateway for a content-addressed storage network
#[derive(Parser, Debug)]
#[command(name = "troved")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        env = "TROVE_CONFIG",
        default_value = "config/server.toml"
    )]
    config: String,

    /// Listen address, overriding `server.bind`
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,trove_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Trove v{}", env!("CARGO_PKG_VERSION"));

    let mut figment = Figment::new();
    if std::path::Path::new(&args.config).exists() {
        tracing::info!(config_path = %args.config, "Loading configuration from file");
        figment = figment.merge(Toml::file(&args.config));
    } else {
        tracing::info!(
            config_path = %args.config,
            "No config file found, using defaults and environment"
        );
    }

    let mut config: AppConfig = figment
        .merge(Env::prefixed("TROVE_").split("__"))
        .extract()
        .context("failed to load configuration")?;
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    config
        .validate()
        .map_err(anyhow::Error::msg)
        .context("invalid configuration")?;

    trove_server::metrics::register_metrics();
    tracing::info!("Prometheus metrics registered");

    let storage = trove_storage::from_config(&config.storage)
        .await
        .context("failed to initialize storage")?;
    storage
        .health_check()
        .await
        .context("storage health check failed")?;
    tracing::info!(backend = storage.backend_name(), "Storage backend initialized");

    let bind = config.server.bind.clone();
    let state = AppState::new(config, storage, Arc::new(LocalPusher))
        .context("failed to initialize application state")?;
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    tracing::info!(bind = %bind, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown requested, cancelling in-flight resolutions");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
