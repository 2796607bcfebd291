//! callgate-ingest - Call event webhook gatekeeper
//!
//! Admits signed call-event webhooks per tenant and drives each accepted
//! call through download, transcription, extraction, persistence and CRM
//! lead creation.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use callgate_ingest::AppState;

/// Command-line arguments for callgate-ingest
#[derive(Parser, Debug)]
#[command(name = "callgate-ingest")]
#[command(about = "Multi-tenant call event webhook gatekeeper")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, env = "CALLGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration file
    #[arg(short, long, env = "CALLGATE_BIND_ADDR")]
    bind_addr: Option<String>,

    /// SQLite database file, overrides the configuration file
    #[arg(short, long, env = "CALLGATE_DATABASE")]
    database: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "callgate_ingest=info,callgate_common=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting callgate-ingest {}", env!("CARGO_PKG_VERSION"));

    // CLI path wins; clap already folded CALLGATE_CONFIG into it
    let mut config = callgate_common::config::load_service_config(args.config.as_deref(), "CALLGATE_CONFIG")
        .context("Failed to load configuration")?;
    if let Some(bind_addr) = args.bind_addr {
        config.bind_addr = bind_addr;
    }
    if let Some(database) = args.database {
        config.database_path = database;
    }
    config.validate().context("Invalid configuration")?;

    info!("Database: {}", config.database_path.display());
    let db_pool = callgate_ingest::db::init_database_pool(&config.database_path)
        .await
        .context("Failed to open database")?;
    info!("Database connection established");

    let state = AppState::from_config(db_pool, &config).context("Failed to build services")?;
    let orchestrator = state.orchestrator.clone();
    let app = callgate_ingest::build_router(state);

    let addr: SocketAddr = config
        .bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address: {}", config.bind_addr))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    orchestrator.shutdown().await;
    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
