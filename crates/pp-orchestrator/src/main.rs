//! Proxy Pilot Orchestrator Daemon
//!
//! Keeps the modem, proxy and tunnel registry in sync with the host and
//! serves lifecycle operations to the dashboard and CLI over localhost IPC.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pp_core::config::{self, BackendMode, OrchestratorConfig, TunnelMode};
use pp_orchestrator::{daemon, OrchestratorState};

#[derive(Parser)]
#[command(name = "pp-orchestrator")]
#[command(about = "Proxy Pilot orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// IPC port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Use simulated modems, proxies and tunnels
    #[arg(long)]
    simulate: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Proxy Pilot orchestrator starting...");

    let mut config: OrchestratorConfig = config::load_or_default(args.config.as_deref())
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    if let Some(port) = args.port {
        config.ipc_port = port;
    }
    if args.simulate {
        config.backend.mode = BackendMode::Simulated;
        config.tunnel.mode = TunnelMode::Simulated;
    }

    let state = Arc::new(OrchestratorState::new(config));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    daemon::cancel_on_signals(cancel.clone());

    daemon::run(state, cancel).await
}
