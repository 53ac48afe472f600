//! IPC client for communicating with the orchestrator
//!
//! Uses TCP on localhost for cross-platform compatibility. The daemon pushes
//! registry events on the same connection as responses, so the client skips
//! event lines while it waits for the response to its request.

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use pp_core::ipc::{default_ipc_address, IpcEvent, IpcRequest, IpcResponse, OrchestratorStatus};
use pp_core::report::{OperationReport, RebindOutcome, RefreshSummary};
use pp_core::types::{
    InterfaceName, InterfaceSnapshot, ProxyAction, ProxyConfigPatch, TunnelAction,
};

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: BufWriter<OwnedWriteHalf>,
}

/// Client for communicating with the orchestrator daemon
pub struct OrchestratorClient {
    address: String,
    connection: Option<Connection>,
}

impl OrchestratorClient {
    /// Create a new client with default address
    pub fn new() -> Self {
        Self::with_address(default_ipc_address())
    }

    /// Create a new client with custom address
    pub fn with_address(address: String) -> Self {
        Self {
            address,
            connection: None,
        }
    }

    /// Get the address
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect to the orchestrator
    pub async fn connect(&mut self) -> Result<()> {
        if self.connection.is_some() {
            return Ok(());
        }

        tracing::debug!("Connecting to orchestrator at {}", self.address);

        let stream = TcpStream::connect(&self.address).await.with_context(|| {
            format!(
                "Failed to connect to orchestrator at {}. Is it running?",
                self.address
            )
        })?;

        let (reader, writer) = stream.into_split();
        self.connection = Some(Connection {
            reader: BufReader::new(reader),
            writer: BufWriter::new(writer),
        });
        Ok(())
    }

    /// Check if the orchestrator is running
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send_request(IpcRequest::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            Ok(_) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Get orchestrator status
    pub async fn status(&mut self) -> Result<OrchestratorStatus> {
        match self.send_request(IpcRequest::GetStatus).await? {
            IpcResponse::Status(status) => Ok(status),
            other => unexpected(other),
        }
    }

    /// Registry snapshot of every interface
    pub async fn list_interfaces(&mut self) -> Result<Vec<InterfaceSnapshot>> {
        match self.send_request(IpcRequest::ListInterfaces).await? {
            IpcResponse::Interfaces { interfaces } => Ok(interfaces),
            other => unexpected(other),
        }
    }

    /// Registry entry for one interface
    pub async fn get_interface(&mut self, interface: &str) -> Result<InterfaceSnapshot> {
        let request = IpcRequest::GetInterface {
            interface: InterfaceName::new(interface),
        };
        match self.send_request(request).await? {
            IpcResponse::Interface(entry) => Ok(entry),
            other => unexpected(other),
        }
    }

    /// Reconcile the registry with the host
    pub async fn refresh(&mut self) -> Result<(RefreshSummary, Vec<InterfaceSnapshot>)> {
        match self.send_request(IpcRequest::Refresh).await? {
            IpcResponse::Refreshed {
                summary,
                interfaces,
            } => Ok((summary, interfaces)),
            other => unexpected(other),
        }
    }

    /// Rotate a modem's public IP
    pub async fn rotate_ip(&mut self, interface: &str) -> Result<OperationReport> {
        let request = IpcRequest::RotateIp {
            interface: InterfaceName::new(interface),
        };
        self.report(request).await
    }

    /// Start, stop or restart a proxy
    pub async fn set_proxy_state(
        &mut self,
        interface: &str,
        action: ProxyAction,
    ) -> Result<OperationReport> {
        let request = IpcRequest::SetProxyState {
            interface: InterfaceName::new(interface),
            action,
        };
        self.report(request).await
    }

    /// Change stored proxy settings
    pub async fn update_proxy_config(
        &mut self,
        interface: &str,
        patch: ProxyConfigPatch,
    ) -> Result<OperationReport> {
        let request = IpcRequest::UpdateProxyConfig {
            interface: InterfaceName::new(interface),
            patch,
        };
        self.report(request).await
    }

    /// Start or stop a tunnel
    pub async fn set_tunnel_state(
        &mut self,
        interface: &str,
        action: TunnelAction,
    ) -> Result<OperationReport> {
        let request = IpcRequest::SetTunnelState {
            interface: InterfaceName::new(interface),
            action,
        };
        self.report(request).await
    }

    /// Re-point a proxy at its modem's current IP
    pub async fn auto_rebind(&mut self, interface: &str) -> Result<RebindOutcome> {
        let request = IpcRequest::AutoRebind {
            interface: InterfaceName::new(interface),
        };
        match self.send_request(request).await? {
            IpcResponse::Rebind(outcome) => Ok(outcome),
            other => unexpected(other),
        }
    }

    /// Shutdown the orchestrator
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.send_request(IpcRequest::Shutdown).await? {
            IpcResponse::Ok => Ok(()),
            other => unexpected(other),
        }
    }

    async fn report(&mut self, request: IpcRequest) -> Result<OperationReport> {
        match self.send_request(request).await? {
            IpcResponse::Report(report) => Ok(report),
            other => unexpected(other),
        }
    }

    /// Send a request and wait for its response
    async fn send_request(&mut self, request: IpcRequest) -> Result<IpcResponse> {
        self.connect().await?;
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;

        // Send request as JSON line
        let mut request_json = serde_json::to_string(&request)?;
        request_json.push('\n');
        connection.writer.write_all(request_json.as_bytes()).await?;
        connection.writer.flush().await?;

        loop {
            let mut line = String::new();
            let n = connection.reader.read_line(&mut line).await?;
            if n == 0 {
                anyhow::bail!("Orchestrator closed the connection");
            }

            if let Ok(response) = serde_json::from_str::<IpcResponse>(&line) {
                return Ok(response);
            }
            match serde_json::from_str::<IpcEvent>(&line) {
                Ok(event) => tracing::trace!("Skipping event while awaiting response: {:?}", event),
                Err(e) => anyhow::bail!("Malformed message from orchestrator: {}", e),
            }
        }
    }
}

impl Default for OrchestratorClient {
    fn default() -> Self {
        Self::new()
    }
}

fn unexpected<T>(response: IpcResponse) -> Result<T> {
    match response {
        IpcResponse::Error { message } => anyhow::bail!("{}", message),
        other => anyhow::bail!("Unexpected response: {:?}", other),
    }
}
