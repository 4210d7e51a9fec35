//! nlq-server: HTTP service exposing the natural-language-to-SQL pipeline.
//!
//! Loads configuration (base file, optional local override, then
//! environment variables), opens a Postgres connection pool and an LLM
//! client, and serves the JSON-RPC + REST surface described in the pipeline
//! configuration's `server.port`.

mod dispatch;
mod protocol;
mod router;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use nlq_core::config::Config;
use nlq_core::llm::LlmClient;

use crate::state::AppState;

#[derive(Parser)]
#[command(name = "nlq-server")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "HTTP service for the natural-language-to-SQL pipeline")]
struct Cli {
    /// Base configuration file (defaults are used for anything it omits).
    #[arg(long, default_value = "config/base.json")]
    config: PathBuf,

    /// Local configuration override, applied on top of --config.
    #[arg(long)]
    local_config: Option<PathBuf>,

    /// Override `server.port` from the loaded configuration.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_target(false)
        .init();

    let base_path = cli.config.exists().then_some(cli.config.as_path());
    let local_path = cli.local_config.as_deref();
    let mut config = Config::load(base_path, local_path)?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    info!(model = %config.llm.model, base_url = %config.llm.base_url, "configuration loaded");

    let pool = PgPoolOptions::new()
        .max_connections(16)
        .connect(&config.database.url)
        .await?;
    info!("connected to database");

    let llm = LlmClient::new(config.llm.clone());
    if !llm.health_check().await {
        tracing::warn!("LLM endpoint did not respond to health check at startup");
    }

    let port = config.server.port;
    let state = Arc::new(AppState::new(pool, llm, config));
    let app = router::build(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "nlq-server listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server error: {}", err);
        return Err(err.into());
    }

    info!("nlq-server shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
