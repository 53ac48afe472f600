//! Core domain types
//!
//! Every modem interface owns exactly one proxy record and at most one
//! tunnel record. The interface name (`ppp0`, `ppp1`, ...) is the join key
//! across all three.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identifier for a modem network interface
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceName(pub String);

impl InterfaceName {
    /// Create a new interface name
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the raw interface name
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Tunnel id derived from this interface
    pub fn tunnel_id(&self) -> TunnelId {
        TunnelId(format!("tunnel_{}", self.0))
    }
}

impl fmt::Display for InterfaceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for InterfaceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InterfaceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of the public tunnel attached to an interface's proxy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TunnelId(pub String);

impl TunnelId {
    /// Get the raw tunnel id
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TunnelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Modem connectivity as observed by the modem collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Disconnected,
    Error,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Connected => write!(f, "connected"),
            Connectivity::Disconnected => write!(f, "disconnected"),
            Connectivity::Error => write!(f, "error"),
        }
    }
}

/// Proxy process status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyStatus {
    Running,
    Stopped,
    Error,
}

impl fmt::Display for ProxyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyStatus::Running => write!(f, "running"),
            ProxyStatus::Stopped => write!(f, "stopped"),
            ProxyStatus::Error => write!(f, "error"),
        }
    }
}

/// Tunnel status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    Active,
    Inactive,
    Error,
}

impl fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelStatus::Active => write!(f, "active"),
            TunnelStatus::Inactive => write!(f, "inactive"),
            TunnelStatus::Error => write!(f, "error"),
        }
    }
}

/// Proxy authentication credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// One modem interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemRecord {
    /// Device identifier reported by the modem collaborator
    pub id: String,
    /// Human-readable name
    pub display_name: String,
    pub interface_name: InterfaceName,
    pub connectivity: Connectivity,
    /// Present only while connected
    pub ip_address: Option<String>,
}

impl ModemRecord {
    /// Record for an interface that could not be queried
    pub fn unreachable(interface_name: InterfaceName) -> Self {
        Self {
            id: interface_name.to_string(),
            display_name: format!("Modem ({})", interface_name),
            interface_name,
            connectivity: Connectivity::Error,
            ip_address: None,
        }
    }

    /// Whether the modem can carry proxy traffic
    pub fn is_connected(&self) -> bool {
        self.connectivity == Connectivity::Connected && self.ip_address.is_some()
    }
}

/// The proxy bound to a modem interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyRecord {
    pub proxy_status: ProxyStatus,
    pub port: Option<u16>,
    pub credentials: Option<Credentials>,
    /// Outbound address the proxy was last configured to bind to
    pub bind_ip: Option<String>,
}

impl ProxyRecord {
    /// A stopped proxy with no assigned port
    pub fn stopped() -> Self {
        Self {
            proxy_status: ProxyStatus::Stopped,
            port: None,
            credentials: None,
            bind_ip: None,
        }
    }

    /// A proxy in the error state, keeping whatever config is still known
    pub fn errored(previous: &ProxyRecord) -> Self {
        Self {
            proxy_status: ProxyStatus::Error,
            port: previous.port,
            credentials: previous.credentials.clone(),
            bind_ip: previous.bind_ip.clone(),
        }
    }

    /// A running proxy described by its live config
    pub fn running(config: ProxyConfig) -> Self {
        let credentials = match (config.username, config.password) {
            (Some(username), Some(password)) => Some(Credentials { username, password }),
            _ => None,
        };
        Self {
            proxy_status: ProxyStatus::Running,
            port: Some(config.port),
            credentials,
            bind_ip: config.bind_ip,
        }
    }

    pub fn is_running(&self) -> bool {
        self.proxy_status == ProxyStatus::Running
    }
}

impl Default for ProxyRecord {
    fn default() -> Self {
        Self::stopped()
    }
}

/// The public tunnel forwarding to a proxy port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelRecord {
    pub tunnel_id: TunnelId,
    pub status: TunnelStatus,
    /// Present only while active
    pub public_url: Option<String>,
    /// Proxy port the tunnel was created against
    pub bound_local_port: u16,
}

/// Live proxy configuration as reported by the proxy collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    pub port: u16,
    #[serde(default)]
    pub bind_ip: Option<String>,
    #[serde(rename = "type", default = "default_proxy_type")]
    pub proxy_type: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_proxy_type() -> String {
    "3proxy".to_string()
}

/// Partial proxy configuration update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfigPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

impl ProxyConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.port.is_none()
            && self.bind_ip.is_none()
            && self.username.is_none()
            && self.password.is_none()
    }
}

/// Observed modem connectivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModemStatus {
    pub connectivity: Connectivity,
    pub ip_address: Option<String>,
}

/// Observed tunnel state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TunnelReport {
    pub status: TunnelStatus,
    pub public_url: Option<String>,
    pub local_port: Option<u16>,
}

impl TunnelReport {
    pub fn inactive() -> Self {
        Self {
            status: TunnelStatus::Inactive,
            public_url: None,
            local_port: None,
        }
    }
}

/// Point-in-time view of one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSnapshot {
    pub modem: ModemRecord,
    pub proxy: ProxyRecord,
    pub tunnel: Option<TunnelRecord>,
}

impl InterfaceSnapshot {
    pub fn interface_name(&self) -> &InterfaceName {
        &self.modem.interface_name
    }
}

/// Requested proxy transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyAction {
    Start,
    Stop,
    Restart,
}

impl fmt::Display for ProxyAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyAction::Start => write!(f, "start"),
            ProxyAction::Stop => write!(f, "stop"),
            ProxyAction::Restart => write!(f, "restart"),
        }
    }
}

/// Requested tunnel transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelAction {
    Start,
    Stop,
}

impl fmt::Display for TunnelAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelAction::Start => write!(f, "start"),
            TunnelAction::Stop => write!(f, "stop"),
        }
    }
}
