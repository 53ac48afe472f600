//! Proxy Pilot CLI
//!
//! Single binary for running the orchestrator and driving it:
//! - Orchestrator daemon (`serve`, `stop`)
//! - Registry views (`status`, `list`, `refresh`)
//! - Lifecycle operations (`rotate`, `proxy`, `tunnel`, `rebind`)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pp_core::config::{self, BackendMode, OrchestratorConfig, TunnelMode};
use pp_core::types::{ProxyAction, ProxyConfigPatch, TunnelAction};
use proxy_pilot::commands;
use proxy_pilot::ipc::OrchestratorClient;
use proxy_pilot::output::{print_error, print_info, print_success, print_warning};

#[derive(Parser)]
#[command(name = "proxy-pilot")]
#[command(author, version, about = "Modem, proxy and tunnel lifecycle manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator daemon
    /// Alias: start
    #[command(alias = "start")]
    Serve {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
        /// Use simulated modems, proxies and tunnels
        #[arg(long)]
        simulate: bool,
        /// IPC port (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Stop the orchestrator daemon
    Stop,

    /// Show orchestrator status
    Status,

    /// List modems with their proxy and tunnel state
    List {
        /// Only show this interface
        interface: Option<String>,
        /// Show bind addresses, credentials and tunnel URLs
        #[arg(short, long)]
        long: bool,
    },

    /// Re-scan modems and reconcile proxy and tunnel state
    Refresh {
        /// Show bind addresses, credentials and tunnel URLs
        #[arg(short, long)]
        long: bool,
    },

    /// Rotate a modem's public IP
    Rotate {
        /// Modem interface (e.g. ppp0)
        interface: String,
    },

    /// Manage the proxy bound to a modem
    Proxy {
        #[command(subcommand)]
        action: ProxyCommand,
    },

    /// Manage the public tunnel in front of a proxy
    Tunnel {
        #[command(subcommand)]
        action: TunnelCommand,
    },

    /// Re-point a proxy at its modem's current IP
    Rebind {
        /// Modem interface (e.g. ppp0)
        interface: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ProxyCommand {
    /// Start the proxy
    Start { interface: String },
    /// Stop the proxy (and its tunnel)
    Stop { interface: String },
    /// Restart the proxy
    Restart { interface: String },
    /// Change proxy settings; applied on the next restart
    Set {
        interface: String,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        bind_ip: Option<String>,
        #[arg(long)]
        username: Option<String>,
        #[arg(long)]
        password: Option<String>,
    },
}

#[derive(Subcommand)]
enum TunnelCommand {
    /// Open a public tunnel to the proxy
    Start { interface: String },
    /// Close the tunnel
    Stop { interface: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli.config.as_deref();

    // Config commands work without a daemon or a valid config
    let command = match cli.command {
        Some(Commands::Config { action }) => return run_config(config_path, action),
        Some(Commands::Serve {
            foreground,
            simulate,
            port,
        }) => return run_orchestrator(foreground, simulate, port, config_path).await,
        Some(cmd) => cmd,
        None => {
            show_quick_status(config_path).await;
            return Ok(());
        }
    };

    let config: OrchestratorConfig = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    let mut client = OrchestratorClient::with_address(config.ipc_address());

    match command {
        Commands::Stop => {
            print_info("Stopping orchestrator...");
            match client.shutdown().await {
                Ok(()) => {
                    print_success("Orchestrator stopped");
                }
                Err(e) => {
                    // Connection refused likely means it's not running
                    if e.to_string().contains("Is it running") {
                        print_warning("Orchestrator is not running");
                    } else {
                        print_error(&format!("Failed to stop orchestrator: {}", e));
                        return Err(e);
                    }
                }
            }
        }

        Commands::Status => {
            ensure_orchestrator_running(&mut client).await?;
            commands::status_command(&mut client).await?;
        }

        Commands::List { interface, long } => {
            ensure_orchestrator_running(&mut client).await?;
            commands::list_command(&mut client, interface.as_deref(), long).await?;
        }

        Commands::Refresh { long } => {
            ensure_orchestrator_running(&mut client).await?;
            commands::refresh_command(&mut client, long).await?;
        }

        Commands::Rotate { interface } => {
            ensure_orchestrator_running(&mut client).await?;
            commands::rotate_command(&mut client, &interface).await?;
        }

        Commands::Proxy { action } => {
            ensure_orchestrator_running(&mut client).await?;
            match action {
                ProxyCommand::Start { interface } => {
                    commands::proxy_command(&mut client, &interface, ProxyAction::Start).await?
                }
                ProxyCommand::Stop { interface } => {
                    commands::proxy_command(&mut client, &interface, ProxyAction::Stop).await?
                }
                ProxyCommand::Restart { interface } => {
                    commands::proxy_command(&mut client, &interface, ProxyAction::Restart).await?
                }
                ProxyCommand::Set {
                    interface,
                    port,
                    bind_ip,
                    username,
                    password,
                } => {
                    let patch = ProxyConfigPatch {
                        port,
                        bind_ip,
                        username,
                        password,
                    };
                    commands::proxy_set_command(&mut client, &interface, patch).await?
                }
            }
        }

        Commands::Tunnel { action } => {
            ensure_orchestrator_running(&mut client).await?;
            let (interface, action) = match action {
                TunnelCommand::Start { interface } => (interface, TunnelAction::Start),
                TunnelCommand::Stop { interface } => (interface, TunnelAction::Stop),
            };
            commands::tunnel_command(&mut client, &interface, action).await?;
        }

        Commands::Rebind { interface } => {
            ensure_orchestrator_running(&mut client).await?;
            commands::rebind_command(&mut client, &interface).await?;
        }

        Commands::Serve { .. } | Commands::Config { .. } => {}
    }

    Ok(())
}

fn run_config(config_path: Option<&Path>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => commands::config_show(config_path),
        ConfigAction::Get { key } => commands::config_get(config_path, &key),
        ConfigAction::Set { key, value } => commands::config_set(config_path, &key, &value),
        ConfigAction::Init { force } => commands::config_init(config_path, force),
        ConfigAction::Path => {
            let path = config_path
                .map(Path::to_path_buf)
                .unwrap_or_else(config::default_config_path);
            println!("{}", path.display());
            Ok(())
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

async fn run_orchestrator(
    foreground: bool,
    simulate: bool,
    port: Option<u16>,
    config_path: Option<&Path>,
) -> Result<()> {
    if !foreground {
        // Daemonize by re-spawning ourselves
        let exe = std::env::current_exe()?;
        let mut cmd = std::process::Command::new(exe);
        cmd.arg("serve").arg("--foreground");
        if simulate {
            cmd.arg("--simulate");
        }
        if let Some(port) = port {
            cmd.arg("--port").arg(port.to_string());
        }
        if let Some(path) = config_path {
            cmd.arg("--config").arg(path);
        }

        let child = cmd
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        print_success(&format!("Orchestrator started (PID: {})", child.id()));
        return Ok(());
    }

    tracing::info!("Proxy Pilot orchestrator starting...");

    let mut config: OrchestratorConfig = config::load_or_default(config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    if let Some(port) = port {
        config.ipc_port = port;
    }
    if simulate {
        config.backend.mode = BackendMode::Simulated;
        config.tunnel.mode = TunnelMode::Simulated;
    }

    let state = Arc::new(pp_orchestrator::OrchestratorState::new(config));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();
    pp_orchestrator::daemon::cancel_on_signals(cancel.clone());

    pp_orchestrator::daemon::run(state, cancel).await
}

async fn show_quick_status(config_path: Option<&Path>) {
    println!();
    println!("  \x1b[1;34mProxy Pilot\x1b[0m - Modem proxies and tunnels");
    println!();

    let config = config::load_or_default(config_path).unwrap_or_default();
    let mut client = OrchestratorClient::with_address(config.ipc_address());

    match client.ping().await {
        Ok(true) => {
            println!("  Orchestrator: \x1b[32m●\x1b[0m Running ({})", client.address());

            if let Ok(status) = client.status().await {
                println!("  Modems: {}", status.interface_count);
                println!("  Proxies: {} running", status.running_proxies);
                println!("  Tunnels: {} active", status.active_tunnels);
            }
        }
        _ => {
            println!("  Orchestrator: \x1b[31m●\x1b[0m Not running");
        }
    }

    println!();
    println!("  Commands:");
    println!("    proxy-pilot serve                Start orchestrator");
    println!("    proxy-pilot list                 List modems");
    println!("    proxy-pilot rotate <if>          Rotate a modem's IP");
    println!("    proxy-pilot proxy start <if>     Start a proxy");
    println!("    proxy-pilot tunnel start <if>    Expose a proxy publicly");
    println!();
}

async fn ensure_orchestrator_running(client: &mut OrchestratorClient) -> Result<()> {
    if client.ping().await.unwrap_or(false) {
        return Ok(());
    }

    print_error(&format!("Orchestrator is not running at {}", client.address()));
    print_info("Try: proxy-pilot serve");
    anyhow::bail!("Orchestrator not running")
}
