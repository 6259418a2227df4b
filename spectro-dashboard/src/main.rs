//! spectro-dashboard - Spectrometer result dashboard service
//!
//! Serves the latest samples of every configured spectrometer to wall
//! displays and keeps the reporting database up to date.

use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use spectro_common::config::{load_config, resolve_config_path, DashboardConfig};
use spectro_dashboard::service::Service;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Command-line arguments for spectro-dashboard
#[derive(Parser, Debug)]
#[command(name = "spectro-dashboard")]
#[command(about = "Spectrometer result aggregation and dashboard service")]
#[command(version)]
struct Args {
    /// Configuration file (falls back to SPECTRO_DASHBOARD_CONFIG, then ./spectro-dashboard.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on, overriding the configuration file
    #[arg(short, long, env = "SPECTRO_DASHBOARD_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config is needed before tracing to know the level and log file
    let config_path = resolve_config_path(args.config.as_deref());
    let mut config = load_config(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    if let Some(port) = args.port {
        config.http_port = port;
    }

    init_tracing(&config)?;

    info!(
        "Starting spectro-dashboard v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Configuration: {}", config_path.display());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let service = Service::build(config)
        .await
        .context("Failed to start spectro-dashboard")?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    service.run(listener, shutdown_signal()).await?;
    Ok(())
}

fn init_tracing(config: &DashboardConfig) -> Result<()> {
    let level = config.effective_log_level();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "spectro_dashboard={level},spectro_common={level},tower_http={level},warn"
        ))
    });

    let file_layer = match &config.logging.file {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Arc::new(open_log_file(path)?)),
        ),
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    Ok(())
}

fn open_log_file(path: &Path) -> Result<std::fs::File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
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
