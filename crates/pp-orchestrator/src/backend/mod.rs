//! Collaborator implementations
//!
//! - [`ScriptBackend`]: modems and proxies through the host controller script
//! - [`ProcessTunnels`]: one tunnel client process per tunnel
//! - [`SimulatedBackend`]: everything in memory

mod controller;
pub mod script;
mod simulated;
mod tunnel;

use std::sync::Arc;
use std::time::Duration;

pub use controller::ScriptBackend;
pub use simulated::{CallCounts, Fault, SimulatedBackend};
pub use tunnel::{extract_url, ProcessTunnels};

use pp_core::config::{BackendMode, OrchestratorConfig, TunnelMode};
use pp_core::traits::{ModemCollaborator, ProxyCollaborator, TunnelCollaborator};

use crate::lifecycle::Collaborators;

/// Latency the daemon's simulated backend applies to mutating calls
const SIMULATED_LATENCY: Duration = Duration::from_millis(250);

/// Collaborators selected by configuration
pub struct Backends {
    pub collaborators: Collaborators,
    /// Set when tunnel clients are real processes that need reaping on exit
    pub tunnel_processes: Option<Arc<ProcessTunnels>>,
}

/// Build the collaborators named by `config`
pub fn from_config(config: &OrchestratorConfig) -> Backends {
    let simulated = matches!(config.backend.mode, BackendMode::Simulated)
        || matches!(config.tunnel.mode, TunnelMode::Simulated);
    let sim = simulated
        .then(|| Arc::new(SimulatedBackend::seeded().with_latency(SIMULATED_LATENCY)));

    let (modem, proxy): (Arc<dyn ModemCollaborator>, Arc<dyn ProxyCollaborator>) =
        match (&config.backend.mode, &sim) {
            (BackendMode::Simulated, Some(sim)) => (sim.clone(), sim.clone()),
            _ => {
                tracing::info!(
                    "Using backend script {:?} via {}",
                    config.backend.script_path,
                    config.backend.interpreter
                );
                let script = Arc::new(ScriptBackend::new(&config.backend));
                (script.clone(), script)
            }
        };

    let (tunnel, tunnel_processes): (Arc<dyn TunnelCollaborator>, _) =
        match (&config.tunnel.mode, &sim) {
            (TunnelMode::Simulated, Some(sim)) => (sim.clone(), None),
            _ => {
                tracing::info!("Using tunnel client `{}`", config.tunnel.command);
                let processes = Arc::new(ProcessTunnels::new(config.tunnel.clone()));
                (processes.clone(), Some(processes))
            }
        };

    Backends {
        collaborators: Collaborators {
            modem,
            proxy,
            tunnel,
        },
        tunnel_processes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_config_uses_no_processes() {
        let backends = from_config(&OrchestratorConfig::simulated());
        assert!(backends.tunnel_processes.is_none());
    }

    #[test]
    fn test_default_config_spawns_tunnel_processes() {
        let backends = from_config(&OrchestratorConfig::default());
        assert!(backends.tunnel_processes.is_some());
    }
}
