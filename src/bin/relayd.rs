//! Relay Daemon - WebSocket chat relay
//!
//! Accepts WebSocket clients on `/send`, registers nicknames, and fans
//! chat messages out to every registered client.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default port (5000, or $PORT)
//! relayd
//!
//! # Override the port and bind address
//! relayd --port 8080 --bind 127.0.0.1
//!
//! # Load settings from a TOML file
//! relayd --config ./relayd.toml
//! ```

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use relayd::config::RelayConfig;
use relayd::registry::spawn_registry_with_prune;
use relayd::server::RelayServer;

/// Relay daemon - real-time WebSocket chat relay
#[derive(Parser, Debug)]
#[command(name = "relayd", version, about)]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config and $PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind (overrides config and $RELAY_BIND)
    #[arg(short, long)]
    bind: Option<IpAddr>,
}

fn load_config(args: &Args) -> Result<RelayConfig> {
    let mut config =
        RelayConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    config
        .apply_env()
        .context("Failed to apply environment overrides")?;

    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("relayd=info".parse()?)
                .add_directive("relay_protocol=info".parse()?),
        )
        .init();

    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = std::process::id(),
        "Relay daemon starting"
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

    let registry = spawn_registry_with_prune(config.prune_interval());
    info!("Session registry started");

    let addr = config.socket_addr();
    let server = RelayServer::new(config, registry, cancel_token);

    info!(addr = %addr, "Starting server");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Relay daemon stopped");
    Ok(())
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
