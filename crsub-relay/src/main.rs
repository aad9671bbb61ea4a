//! crsub-relay - CRCA/CRFM report relay
//!
//! Receives report submissions from the browser form, maps them to the Grist
//! document's columns and inserts them, keeping failed submissions as drafts.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crsub_common::config::{ConfigOverrides, RelayConfig, TomlConfig};
use crsub_common::upstream::GristClient;
use crsub_common::{DraftStore, MemoryDraftStore, SqliteDraftStore, SubmissionDispatcher};
use crsub_relay::{build_router, AppState};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for crsub-relay
#[derive(Parser, Debug)]
#[command(name = "crsub-relay")]
#[command(about = "CRCA/CRFM report relay to Grist")]
#[command(version)]
struct Args {
    /// Port to listen on
    #[arg(short, long, env = "CRSUB_PORT")]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "CRSUB_HOST")]
    host: Option<String>,

    /// TOML config file (default: ~/.config/crsub/config.toml)
    #[arg(short, long, env = "CRSUB_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite file holding drafts
    #[arg(long, env = "CRSUB_DRAFTS_DB")]
    drafts_db: Option<PathBuf>,

    /// Keep drafts in memory only (lost on restart)
    #[arg(long)]
    ephemeral_drafts: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is read before tracing exists so its log level can apply
    let (toml_config, config_path) = TomlConfig::load_or_default(args.config.as_deref())
        .context("Failed to load configuration file")?;

    let default_filter = format!(
        "crsub_relay={level},crsub_common={level},tower_http={level}",
        level = toml_config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting crsub-relay v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    match &config_path {
        Some(path) => info!("Configuration file: {}", path.display()),
        None => warn!("No configuration file found, using environment and defaults"),
    }

    let overrides = ConfigOverrides {
        host: args.host,
        port: args.port,
        drafts_path: args.drafts_db,
    };
    let config =
        RelayConfig::resolve(&toml_config, &overrides).context("Invalid configuration")?;
    config.log_summary();

    let drafts: Arc<dyn DraftStore> = if args.ephemeral_drafts {
        warn!("Drafts kept in memory only");
        Arc::new(MemoryDraftStore::new())
    } else {
        info!("Drafts database: {}", config.drafts_path.display());
        Arc::new(
            SqliteDraftStore::open(&config.drafts_path)
                .await
                .context("Failed to open drafts database")?,
        )
    };

    let client = Arc::new(
        GristClient::new(
            &config.grist.server,
            &config.grist.doc_id,
            config.grist.request_timeout,
        )
        .context("Failed to build Grist client")?,
    );

    let dispatcher = Arc::new(SubmissionDispatcher::new(
        config.grist.clone(),
        client.clone(),
        drafts,
        config.retry,
    ));

    let state = AppState::new(dispatcher, client, config.grist.clone());
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("crsub-relay listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
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
