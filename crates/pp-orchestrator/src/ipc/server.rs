//! IPC server implementation
//!
//! Listens on localhost TCP for requests from the dashboard and CLI.
//! Each line received is one JSON [`IpcRequest`]; each line sent back is
//! either the matching [`IpcResponse`] or an [`IpcEvent`] pushed when a
//! registry entry changes.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use pp_core::error::InvariantViolation;
use pp_core::ipc::{IpcEvent, IpcRequest, IpcResponse};
use pp_core::report::OperationReport;

use crate::registry::RegistryEvent;
use crate::state::OrchestratorState;

/// IPC server for dashboard/CLI communication
///
/// Listens on localhost (127.0.0.1) only - not accessible from network.
pub struct IpcServer {
    /// Address to bind (127.0.0.1:port)
    pub address: String,
    /// Orchestrator state
    state: Arc<OrchestratorState>,
    /// Event broadcast channel
    event_tx: broadcast::Sender<IpcEvent>,
    /// Cancellation token for shutdown
    shutdown_token: Option<CancellationToken>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(address: String, state: Arc<OrchestratorState>) -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            address,
            state,
            event_tx,
            shutdown_token: None,
        }
    }

    /// Set the shutdown token (call before run)
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = Some(token);
        self
    }

    /// Get a sender for broadcasting events
    pub fn event_sender(&self) -> broadcast::Sender<IpcEvent> {
        self.event_tx.clone()
    }

    /// Start the IPC server
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("Failed to bind IPC server to {}", self.address))?;

        tracing::info!("IPC server listening on {}", self.address);

        tokio::spawn(forward_registry_events(
            self.state.orchestrator.registry().subscribe(),
            self.event_tx.clone(),
        ));

        loop {
            match listener.accept().await {
                Ok((stream, peer_addr)) => {
                    // Only accept connections from localhost
                    if !peer_addr.ip().is_loopback() {
                        tracing::warn!("Rejected non-localhost connection from {}", peer_addr);
                        continue;
                    }

                    let state = Arc::clone(&self.state);
                    let event_tx = self.event_tx.clone();
                    let shutdown_token = self.shutdown_token.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, state, event_tx, shutdown_token).await
                        {
                            tracing::warn!("IPC client error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept IPC connection: {}", e);
                }
            }
        }
    }
}

/// Republish registry changes as IPC events
async fn forward_registry_events(
    mut registry_rx: broadcast::Receiver<RegistryEvent>,
    event_tx: broadcast::Sender<IpcEvent>,
) {
    loop {
        let event = match registry_rx.recv().await {
            Ok(RegistryEvent::Updated(entry)) => IpcEvent::InterfaceUpdated(entry),
            Ok(RegistryEvent::Removed(interface)) => IpcEvent::InterfaceRemoved { interface },
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!("Event forwarder lagged by {} registry events", n);
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        // No subscribers is fine
        let _ = event_tx.send(event);
    }
}

async fn handle_client(
    stream: TcpStream,
    state: Arc<OrchestratorState>,
    event_tx: broadcast::Sender<IpcEvent>,
    shutdown_token: Option<CancellationToken>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    // Subscribe to events
    let mut event_rx = event_tx.subscribe();

    loop {
        tokio::select! {
            // Handle incoming requests
            result = reader.read_line(&mut line) => {
                match result {
                    Ok(0) => break, // EOF
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            line.clear();
                            continue;
                        }

                        let response = match serde_json::from_str::<IpcRequest>(trimmed) {
                            Ok(request) => handle_request(request, &state, shutdown_token.as_ref()).await,
                            Err(e) => IpcResponse::Error {
                                message: format!("Invalid request: {}", e),
                            },
                        };

                        let mut response_json = serde_json::to_string(&response)?;
                        response_json.push('\n');
                        writer.write_all(response_json.as_bytes()).await?;

                        line.clear();
                    }
                    Err(e) => {
                        return Err(e.into());
                    }
                }
            }

            // Forward events to client
            result = event_rx.recv() => {
                match result {
                    Ok(event) => {
                        let mut event_json = serde_json::to_string(&event)?;
                        event_json.push('\n');
                        writer.write_all(event_json.as_bytes()).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("IPC client lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

async fn handle_request(
    request: IpcRequest,
    state: &OrchestratorState,
    shutdown_token: Option<&CancellationToken>,
) -> IpcResponse {
    let orchestrator = &state.orchestrator;

    match request {
        IpcRequest::GetStatus => IpcResponse::Status(state.status().await),

        IpcRequest::ListInterfaces => IpcResponse::Interfaces {
            interfaces: orchestrator.snapshot().await,
        },

        IpcRequest::GetInterface { interface } => match orchestrator.registry().get(&interface).await {
            Some(entry) => IpcResponse::Interface(entry),
            None => IpcResponse::Error {
                message: format!("Unknown interface: {}", interface),
            },
        },

        IpcRequest::Refresh => match orchestrator.refresh_all().await {
            Ok(summary) => IpcResponse::Refreshed {
                summary,
                interfaces: orchestrator.snapshot().await,
            },
            Err(e) => IpcResponse::Error {
                message: format!("Refresh failed: {}", e),
            },
        },

        IpcRequest::RotateIp { interface } => report(orchestrator.rotate_ip(&interface).await),

        IpcRequest::SetProxyState { interface, action } => {
            report(orchestrator.set_proxy_state(&interface, action).await)
        }

        IpcRequest::UpdateProxyConfig { interface, patch } => {
            report(orchestrator.update_proxy_config(&interface, &patch).await)
        }

        IpcRequest::SetTunnelState { interface, action } => {
            report(orchestrator.set_tunnel_state(&interface, action).await)
        }

        IpcRequest::AutoRebind { interface } => match orchestrator.auto_rebind(&interface).await {
            Ok(outcome) => IpcResponse::Rebind(outcome),
            Err(violation) => violation_response(violation),
        },

        IpcRequest::Ping => IpcResponse::Pong,

        IpcRequest::Shutdown => {
            tracing::info!("Shutdown requested via IPC");
            if let Some(token) = shutdown_token {
                token.cancel();
                IpcResponse::Ok
            } else {
                IpcResponse::Error {
                    message: "Shutdown not supported (no shutdown token configured)".to_string(),
                }
            }
        }
    }
}

fn report(result: Result<OperationReport, InvariantViolation>) -> IpcResponse {
    match result {
        Ok(report) => IpcResponse::Report(report),
        Err(violation) => violation_response(violation),
    }
}

fn violation_response(violation: InvariantViolation) -> IpcResponse {
    IpcResponse::Error {
        message: format!("Operation aborted, registry left unchanged: {}", violation),
    }
}
