//! Orchestrator configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::types::InterfaceName;

/// Default IPC port for CLI/dashboard communication
pub const DEFAULT_IPC_PORT: u16 = 22240;

/// Configuration for the orchestrator daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// IPC port (bound on localhost only)
    pub ipc_port: u16,

    /// Modem and proxy backend
    pub backend: BackendConfig,

    /// Public tunnel provider
    pub tunnel: TunnelConfig,

    /// Per-call deadlines
    pub timeouts: TimeoutConfig,

    /// How often to reconcile the registry (0 disables)
    #[serde(with = "duration_secs")]
    pub refresh_interval: Duration,

    /// Automatic proxy rebinding after modem reconnects
    pub rebind: RebindConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ipc_port: DEFAULT_IPC_PORT,
            backend: BackendConfig::default(),
            tunnel: TunnelConfig::default(),
            timeouts: TimeoutConfig::default(),
            refresh_interval: Duration::from_secs(30),
            rebind: RebindConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }

    /// Configuration that runs entirely against simulated collaborators
    pub fn simulated() -> Self {
        Self {
            backend: BackendConfig {
                mode: BackendMode::Simulated,
                ..BackendConfig::default()
            },
            tunnel: TunnelConfig {
                mode: TunnelMode::Simulated,
                ..TunnelConfig::default()
            },
            ..Self::default()
        }
    }
}

/// How modem and proxy control is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendMode {
    /// External controller script invoked per call
    Script,
    /// In-memory simulation
    Simulated,
}

/// Modem/proxy backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub mode: BackendMode,

    /// Controller script
    pub script_path: PathBuf,

    /// Interpreter used to run the script
    pub interpreter: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            mode: BackendMode::Script,
            script_path: PathBuf::from("/usr/local/lib/proxy-pilot/backend_controller.py"),
            interpreter: "python3".to_string(),
        }
    }
}

/// How tunnels are established
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelMode {
    /// One tunnel client process per tunnel
    Process,
    /// In-memory simulation
    Simulated,
}

/// Tunnel provider configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub mode: TunnelMode,

    /// Provider label shown to operators
    pub provider: String,

    /// Tunnel client executable
    pub command: String,

    /// Arguments; `{port}` is replaced with the local proxy port
    pub args: Vec<String>,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            mode: TunnelMode::Process,
            provider: "Ngrok".to_string(),
            command: "ngrok".to_string(),
            args: vec![
                "tcp".to_string(),
                "{port}".to_string(),
                "--log".to_string(),
                "stdout".to_string(),
                "--log-format".to_string(),
                "json".to_string(),
            ],
        }
    }
}

impl TunnelConfig {
    /// Arguments with the port placeholder substituted
    pub fn args_for_port(&self, port: u16) -> Vec<String> {
        let port = port.to_string();
        self.args.iter().map(|a| a.replace("{port}", &port)).collect()
    }
}

/// Deadlines for each class of collaborator call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Status and config probes
    #[serde(with = "duration_secs")]
    pub status: Duration,

    /// Modem disconnect/reconnect
    #[serde(with = "duration_secs")]
    pub rotate: Duration,

    /// Proxy start/stop/restart/update
    #[serde(with = "duration_secs")]
    pub proxy: Duration,

    /// Tunnel negotiation and teardown
    #[serde(with = "duration_secs")]
    pub tunnel: Duration,

    /// How long a caller waits for another operation on the same interface
    #[serde(with = "duration_secs")]
    pub admission: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            status: Duration::from_secs(15),
            rotate: Duration::from_secs(90),
            proxy: Duration::from_secs(30),
            tunnel: Duration::from_secs(20),
            admission: Duration::from_secs(180),
        }
    }
}

/// Automatic rebind watcher configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RebindConfig {
    pub enabled: bool,

    /// How often the policy is evaluated
    #[serde(with = "duration_secs")]
    pub interval: Duration,

    /// Interfaces to watch (empty = all)
    pub interfaces: Vec<InterfaceName>,
}

impl Default for RebindConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(60),
            interfaces: Vec::new(),
        }
    }
}

impl RebindConfig {
    /// Whether an interface is covered by the watcher
    pub fn watches(&self, interface: &InterfaceName) -> bool {
        self.interfaces.is_empty() || self.interfaces.contains(interface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let toml_str = r#"
            ipc_port = 23000

            [timeouts]
            rotate = 120

            [rebind]
            enabled = true
            interfaces = ["ppp0"]
        "#;
        let config: OrchestratorConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.ipc_port, 23000);
        assert_eq!(config.timeouts.rotate, Duration::from_secs(120));
        assert_eq!(config.timeouts.status, Duration::from_secs(15));
        assert_eq!(config.backend.mode, BackendMode::Script);
        assert!(config.rebind.watches(&InterfaceName::new("ppp0")));
        assert!(!config.rebind.watches(&InterfaceName::new("ppp1")));
    }

    #[test]
    fn test_tunnel_args_substitute_port() {
        let tunnel = TunnelConfig::default();
        let args = tunnel.args_for_port(30002);
        assert_eq!(args[0], "tcp");
        assert_eq!(args[1], "30002");
    }

    #[test]
    fn test_simulated_config() {
        let config = OrchestratorConfig::simulated();
        assert_eq!(config.backend.mode, BackendMode::Simulated);
        assert_eq!(config.tunnel.mode, TunnelMode::Simulated);
        assert_eq!(config.ipc_address(), "127.0.0.1:22240");
    }

    #[test]
    fn test_empty_rebind_list_watches_everything() {
        let rebind = RebindConfig::default();
        assert!(rebind.watches(&InterfaceName::new("ppp7")));
    }
}
