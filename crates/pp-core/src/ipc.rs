//! IPC protocol between the dashboard/CLI and the orchestrator daemon
//!
//! JSON-encoded messages, one per line, over TCP on 127.0.0.1.

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_IPC_PORT;
use crate::report::{OperationReport, RebindOutcome, RefreshSummary};
use crate::types::{InterfaceName, InterfaceSnapshot, ProxyAction, ProxyConfigPatch, TunnelAction};

/// Default IPC address
pub fn default_ipc_address() -> String {
    format!("127.0.0.1:{}", DEFAULT_IPC_PORT)
}

/// IPC request from client to orchestrator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Get daemon status
    GetStatus,

    /// Registry snapshot of every interface
    ListInterfaces,

    /// Registry entry for one interface
    GetInterface { interface: InterfaceName },

    /// Reconcile the registry with the collaborators
    Refresh,

    /// Rotate the modem IP and restart its proxy
    RotateIp { interface: InterfaceName },

    /// Start, stop or restart a proxy
    SetProxyState {
        interface: InterfaceName,
        action: ProxyAction,
    },

    /// Change stored proxy settings
    UpdateProxyConfig {
        interface: InterfaceName,
        patch: ProxyConfigPatch,
    },

    /// Start or stop a public tunnel
    SetTunnelState {
        interface: InterfaceName,
        action: TunnelAction,
    },

    /// Re-point a proxy at its modem's current IP
    AutoRebind { interface: InterfaceName },

    /// Ping (for keepalive)
    Ping,

    /// Shutdown the orchestrator
    Shutdown,
}

/// IPC response from orchestrator to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Daemon status
    Status(OrchestratorStatus),

    /// Snapshot of all interfaces
    Interfaces { interfaces: Vec<InterfaceSnapshot> },

    /// Single interface
    Interface(InterfaceSnapshot),

    /// Reconciliation finished
    Refreshed {
        summary: RefreshSummary,
        interfaces: Vec<InterfaceSnapshot>,
    },

    /// Result of a lifecycle operation
    Report(OperationReport),

    /// Result of an auto-rebind
    Rebind(RebindOutcome),

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },

    /// Pong response
    Pong,
}

/// IPC event pushed from orchestrator to connected clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    /// An interface's registry entry changed
    InterfaceUpdated(InterfaceSnapshot),

    /// An interface disappeared from the host
    InterfaceRemoved { interface: InterfaceName },
}

/// Daemon status information
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    /// Whether the daemon is running
    pub running: bool,
    /// Uptime in seconds
    pub uptime_secs: u64,
    /// Interfaces in the registry
    pub interface_count: usize,
    /// Proxies currently running
    pub running_proxies: usize,
    /// Tunnels currently active
    pub active_tunnels: usize,
    /// Daemon version
    pub version: String,
    /// Backend in use (`script` or `simulated`)
    pub backend: String,
    /// Tunnel provider label
    pub tunnel_provider: String,
}
