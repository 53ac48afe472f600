//! Global orchestrator state

use std::sync::Arc;
use std::time::Instant;

use pp_core::config::{BackendMode, OrchestratorConfig};
use pp_core::ipc::OrchestratorStatus;
use pp_core::types::TunnelStatus;

use crate::backend::{self, ProcessTunnels};
use crate::lifecycle::{Collaborators, Orchestrator};

/// Global state for the orchestrator daemon
pub struct OrchestratorState {
    /// Configuration
    pub config: OrchestratorConfig,
    /// Lifecycle orchestrator and its registry
    pub orchestrator: Arc<Orchestrator>,
    started_at: Instant,
    tunnel_processes: Option<Arc<ProcessTunnels>>,
}

impl OrchestratorState {
    /// Create state with the collaborators named by the configuration
    pub fn new(config: OrchestratorConfig) -> Self {
        let backends = backend::from_config(&config);
        let orchestrator = Orchestrator::new(backends.collaborators, config.timeouts.clone());
        Self {
            config,
            orchestrator: Arc::new(orchestrator),
            started_at: Instant::now(),
            tunnel_processes: backends.tunnel_processes,
        }
    }

    /// Create state around explicit collaborators
    pub fn with_collaborators(config: OrchestratorConfig, collaborators: Collaborators) -> Self {
        let orchestrator = Orchestrator::new(collaborators, config.timeouts.clone());
        Self {
            config,
            orchestrator: Arc::new(orchestrator),
            started_at: Instant::now(),
            tunnel_processes: None,
        }
    }

    /// Daemon status summary
    pub async fn status(&self) -> OrchestratorStatus {
        let snapshot = self.orchestrator.snapshot().await;
        OrchestratorStatus {
            running: true,
            uptime_secs: self.started_at.elapsed().as_secs(),
            interface_count: snapshot.len(),
            running_proxies: snapshot.iter().filter(|e| e.proxy.is_running()).count(),
            active_tunnels: snapshot
                .iter()
                .filter(|e| {
                    e.tunnel
                        .as_ref()
                        .map(|t| t.status == TunnelStatus::Active)
                        .unwrap_or(false)
                })
                .count(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            backend: match self.config.backend.mode {
                BackendMode::Script => "script".to_string(),
                BackendMode::Simulated => "simulated".to_string(),
            },
            tunnel_provider: self.config.tunnel.provider.clone(),
        }
    }

    /// Release collaborator resources before exit
    pub async fn shutdown(&self) {
        if let Some(processes) = &self.tunnel_processes {
            tracing::info!("Stopping tunnel clients");
            processes.stop_all().await;
        }
    }
}
