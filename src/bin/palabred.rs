//! palabre server - line-oriented TCP chat relay
//!
//! Clients connect, send a display name as their first line, then every
//! line they send is relayed to everyone connected.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (0.0.0.0:1234)
//! palabred
//!
//! # Listen elsewhere
//! palabred --listen 127.0.0.1:4000
//!
//! # Use an explicit config file
//! palabred --config ./palabre.toml
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use palabred::config::ServerConfig;
use palabred::registry::spawn_registry;
use palabred::server::ChatServer;

/// Used when `RUST_LOG` is unset, empty or unparsable.
const DEFAULT_LOG_FILTER: &str = "palabred=info,palabre_core=info,palabre_protocol=info";

/// palabre chat relay server
#[derive(Parser, Debug)]
#[command(name = "palabred", version, about)]
struct Args {
    /// Address to listen on (overrides config file and PALABRE_LISTEN)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(rust_log.as_deref()))
        .init();

    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        listen = %config.listen,
        "palabre server starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry();
    info!("Chat registry started");

    let server = ChatServer::bind(&config, registry, cancel_token)
        .await
        .context("Failed to start chat server")?;

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("palabre server stopped");
    Ok(())
}

/// `RUST_LOG` wins outright when set; the defaults never override it.
fn log_filter(rust_log: Option<&str>) -> EnvFilter {
    rust_log
        .filter(|directives| !directives.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

/// Defaults, then the config file, then the environment, then CLI flags.
fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = ServerConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?
        .with_env_overrides(|key| std::env::var(key).ok())
        .context("Invalid environment override")?;

    if let Some(listen) = args.listen {
        config.listen = listen;
    }

    Ok(config)
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
