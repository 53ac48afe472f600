//! Modem and proxy collaborators backed by the controller script

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use pp_core::config::BackendConfig;
use pp_core::error::CollaboratorError;
use pp_core::traits::{DiscoveredModem, ModemCollaborator, ProxyCollaborator};
use pp_core::types::{Connectivity, InterfaceName, ModemStatus, ProxyConfig, ProxyConfigPatch};

use super::script::{ScriptError, ScriptRunner};

/// One row of `get_all_modem_statuses`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRow {
    id: String,
    name: String,
    interface_name: String,
    status: String,
    #[serde(default)]
    ip_address: Option<String>,
    #[serde(default)]
    proxy_status: Option<String>,
}

/// ModemManager + 3proxy via the host controller script
pub struct ScriptBackend {
    runner: ScriptRunner,
}

impl ScriptBackend {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            runner: ScriptRunner::new(config.interpreter.clone(), config.script_path.clone()),
        }
    }

    pub fn with_runner(runner: ScriptRunner) -> Self {
        Self { runner }
    }

    async fn statuses(&self) -> Result<Vec<StatusRow>, ScriptError> {
        let data = self.runner.run("get_all_modem_statuses", &[]).await?;
        decode(data)
    }

    async fn configs(&self) -> Result<HashMap<String, ProxyConfig>, ScriptError> {
        let data = self.runner.run("get_all_configs", &[]).await?;
        if data.is_null() {
            return Ok(HashMap::new());
        }
        decode(data)
    }

    async fn row(&self, interface: &InterfaceName) -> Result<StatusRow, CollaboratorError> {
        let unreachable = |reason: String| CollaboratorError::ModemUnreachable {
            interface: interface.clone(),
            reason,
        };
        self.statuses()
            .await
            .map_err(|e| classify(e, unreachable))?
            .into_iter()
            .find(|row| row.interface_name == interface.as_str())
            .ok_or_else(|| unreachable("not reported by ModemManager".to_string()))
    }

    /// Stored config for an interface after a start or restart
    async fn config_after(
        &self,
        interface: &InterfaceName,
        action: &str,
    ) -> Result<ProxyConfig, CollaboratorError> {
        let failed = |reason: String| CollaboratorError::ProxyStartFailed {
            interface: interface.clone(),
            reason,
        };
        self.configs()
            .await
            .map_err(|e| classify(e, failed))?
            .remove(interface.as_str())
            .ok_or_else(|| failed(format!("no configuration stored after {}", action)))
    }
}

#[async_trait]
impl ModemCollaborator for ScriptBackend {
    async fn list(&self) -> Result<Vec<DiscoveredModem>, CollaboratorError> {
        let rows = self.statuses().await.map_err(|e| {
            classify(e, |reason| CollaboratorError::ModemUnreachable {
                interface: InterfaceName::new("*"),
                reason,
            })
        })?;

        Ok(rows
            .into_iter()
            .map(|row| DiscoveredModem {
                id: row.id,
                display_name: row.name,
                interface_name: InterfaceName::new(row.interface_name),
            })
            .collect())
    }

    async fn query_status(&self, interface: &InterfaceName) -> Result<ModemStatus, CollaboratorError> {
        let row = self.row(interface).await?;
        Ok(ModemStatus {
            connectivity: connectivity(&row.status),
            ip_address: row.ip_address,
        })
    }

    async fn rotate(&self, interface: &InterfaceName) -> Result<String, CollaboratorError> {
        let failed = |reason: String| CollaboratorError::RotationFailed {
            interface: interface.clone(),
            reason,
        };
        let data = self
            .runner
            .run("rotate_ip", &[interface.as_str()])
            .await
            .map_err(|e| classify(e, failed))?;

        data.get("newIp")
            .and_then(Value::as_str)
            .map(String::from)
            .ok_or_else(|| failed("backend did not report the new address".to_string()))
    }
}

#[async_trait]
impl ProxyCollaborator for ScriptBackend {
    async fn start(&self, interface: &InterfaceName) -> Result<ProxyConfig, CollaboratorError> {
        self.runner
            .run("start", &[interface.as_str()])
            .await
            .map_err(|e| {
                classify(e, |reason| CollaboratorError::ProxyStartFailed {
                    interface: interface.clone(),
                    reason,
                })
            })?;
        self.config_after(interface, "start").await
    }

    async fn stop(&self, interface: &InterfaceName) -> Result<(), CollaboratorError> {
        self.runner
            .run("stop", &[interface.as_str()])
            .await
            .map_err(|e| {
                classify(e, |reason| CollaboratorError::ProxyStopFailed {
                    interface: interface.clone(),
                    reason,
                })
            })?;
        Ok(())
    }

    async fn restart(&self, interface: &InterfaceName) -> Result<ProxyConfig, CollaboratorError> {
        self.runner
            .run("restart", &[interface.as_str()])
            .await
            .map_err(|e| {
                classify(e, |reason| CollaboratorError::ProxyStartFailed {
                    interface: interface.clone(),
                    reason,
                })
            })?;
        self.config_after(interface, "restart").await
    }

    async fn current_config(
        &self,
        interface: &InterfaceName,
    ) -> Result<Option<ProxyConfig>, CollaboratorError> {
        let failed = |reason: String| CollaboratorError::ProxyConfigFailed {
            interface: interface.clone(),
            reason,
        };
        let row = self.row(interface).await?;
        match row.proxy_status.as_deref() {
            Some("running") => {}
            Some("error") => return Err(failed("proxy service is in a failed state".to_string())),
            _ => return Ok(None),
        }

        let config = self
            .configs()
            .await
            .map_err(|e| classify(e, failed))?
            .remove(interface.as_str())
            .ok_or_else(|| failed("service running without a stored configuration".to_string()))?;
        Ok(Some(config))
    }

    async fn update_config(
        &self,
        interface: &InterfaceName,
        patch: &ProxyConfigPatch,
    ) -> Result<(), CollaboratorError> {
        let failed = |reason: String| CollaboratorError::ProxyConfigFailed {
            interface: interface.clone(),
            reason,
        };
        let json = serde_json::to_string(patch).map_err(|e| failed(e.to_string()))?;
        self.runner
            .run("update_config", &[interface.as_str(), &json])
            .await
            .map_err(|e| classify(e, failed))?;
        Ok(())
    }
}

fn connectivity(status: &str) -> Connectivity {
    match status {
        "connected" => Connectivity::Connected,
        "disconnected" => Connectivity::Disconnected,
        _ => Connectivity::Error,
    }
}

fn decode<T: serde::de::DeserializeOwned>(data: Value) -> Result<T, ScriptError> {
    serde_json::from_value(data).map_err(|e| ScriptError::Malformed(e.to_string()))
}

/// Map a script failure onto the caller's error class
fn classify(
    error: ScriptError,
    class: impl FnOnce(String) -> CollaboratorError,
) -> CollaboratorError {
    match error {
        ScriptError::Malformed(detail) => CollaboratorError::Protocol(detail),
        other => class(other.to_string()),
    }
}
