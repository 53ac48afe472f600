//! Proxy start, stop, restart and reconfiguration

use pp_core::error::{CollaboratorError, InvariantViolation, OrchestratorError};
use pp_core::report::{Operation, OperationReport, Step};
use pp_core::types::{
    InterfaceName, InterfaceSnapshot, ProxyAction, ProxyConfigPatch, ProxyRecord, ProxyStatus,
};

use super::Orchestrator;

impl Orchestrator {
    /// Move an interface's proxy to the requested state
    ///
    /// - `start` requires a connected modem and is a no-op if already running.
    /// - `stop` tears down the tunnel first and is a no-op if already stopped.
    /// - `restart` requires a connected modem. The tunnel is kept only if the
    ///   proxy comes back on the same port.
    pub async fn set_proxy_state(
        &self,
        interface: &InterfaceName,
        action: ProxyAction,
    ) -> Result<OperationReport, InvariantViolation> {
        let operation = match action {
            ProxyAction::Start => Operation::ProxyStart,
            ProxyAction::Stop => Operation::ProxyStop,
            ProxyAction::Restart => Operation::ProxyRestart,
        };

        let (_guard, entry) = match self.admit(interface, operation).await {
            Ok(admitted) => admitted,
            Err(report) => return Ok(self.finish(report).await),
        };

        let report = match action {
            ProxyAction::Start => self.start_proxy_locked(&entry).await?,
            ProxyAction::Stop => self.stop_proxy_locked(&entry).await?,
            ProxyAction::Restart => self.restart_proxy_locked(&entry).await?,
        };
        Ok(self.finish(report).await)
    }

    async fn start_proxy_locked(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<OperationReport, InvariantViolation> {
        let interface = entry.interface_name();
        let operation = Operation::ProxyStart;

        let modem = match self.connected_modem(entry).await {
            Ok(modem) => modem,
            Err(e) => return Ok(OperationReport::failed(interface.clone(), operation, &e)),
        };
        self.registry.upsert_modem(modem).await?;

        if let (ProxyStatus::Running, Some(port)) = (entry.proxy.proxy_status, entry.proxy.port) {
            return Ok(OperationReport::success(
                interface.clone(),
                operation,
                format!("Proxy on {} already running on port {}", interface, port),
            ));
        }

        let started = self
            .call(
                Step::ProxyStart,
                interface,
                self.timeouts.proxy,
                self.collaborators.proxy.start(interface),
            )
            .await;

        let config = match started {
            Ok(config) => config,
            Err(OrchestratorError::Collaborator(CollaboratorError::ProxyAlreadyRunning(_))) => {
                // Running outside our knowledge; adopt whatever it is serving
                let live = self
                    .call(
                        Step::ProxyQuery,
                        interface,
                        self.timeouts.status,
                        self.collaborators.proxy.current_config(interface),
                    )
                    .await;
                match live {
                    Ok(Some(config)) => config,
                    Ok(None) => {
                        let e = OrchestratorError::from(CollaboratorError::ProxyStartFailed {
                            interface: interface.clone(),
                            reason: "reported as running but exposes no configuration".to_string(),
                        });
                        self.registry
                            .upsert_proxy(interface, ProxyRecord::errored(&entry.proxy))
                            .await?;
                        return Ok(OperationReport::failed(interface.clone(), operation, &e));
                    }
                    Err(e) => {
                        self.registry
                            .upsert_proxy(interface, ProxyRecord::errored(&entry.proxy))
                            .await?;
                        return Ok(OperationReport::failed(interface.clone(), operation, &e));
                    }
                }
            }
            Err(e) => {
                self.registry
                    .upsert_proxy(interface, ProxyRecord::errored(&entry.proxy))
                    .await?;
                return Ok(OperationReport::failed(interface.clone(), operation, &e));
            }
        };

        let port = config.port;
        self.registry
            .upsert_proxy(interface, ProxyRecord::running(config))
            .await?;
        Ok(OperationReport::success(
            interface.clone(),
            operation,
            format!("Proxy on {} started on port {}", interface, port),
        ))
    }

    async fn stop_proxy_locked(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<OperationReport, InvariantViolation> {
        let interface = entry.interface_name();
        let operation = Operation::ProxyStop;

        let mut tunnel_stopped = false;
        if entry.tunnel.is_some() {
            let tunnel_id = interface.tunnel_id();
            if let Err(e) = self
                .call(
                    Step::TunnelStop,
                    &tunnel_id,
                    self.timeouts.tunnel,
                    self.collaborators.tunnel.stop(&tunnel_id),
                )
                .await
            {
                return Ok(OperationReport::failed(interface.clone(), operation, &e));
            }
            self.registry.upsert_tunnel(interface, None).await?;
            tunnel_stopped = true;
        }

        if entry.proxy.proxy_status == ProxyStatus::Stopped {
            return Ok(OperationReport::success(
                interface.clone(),
                operation,
                format!("Proxy on {} already stopped", interface),
            ));
        }

        let stopped = self
            .call(
                Step::ProxyStop,
                interface,
                self.timeouts.proxy,
                self.collaborators.proxy.stop(interface),
            )
            .await;

        match stopped {
            Ok(()) => {
                self.registry
                    .upsert_proxy(interface, ProxyRecord::stopped())
                    .await?;
                let message = if tunnel_stopped {
                    format!("Tunnel and proxy on {} stopped", interface)
                } else {
                    format!("Proxy on {} stopped", interface)
                };
                Ok(OperationReport::success(interface.clone(), operation, message))
            }
            Err(e) => {
                self.registry
                    .upsert_proxy(interface, ProxyRecord::errored(&entry.proxy))
                    .await?;
                if tunnel_stopped {
                    Ok(OperationReport::partial(
                        interface.clone(),
                        operation,
                        Step::ProxyStop,
                        &e,
                        format!("Tunnel on {} stopped but the proxy did not: {}", interface, e),
                    ))
                } else {
                    Ok(OperationReport::failed(interface.clone(), operation, &e))
                }
            }
        }
    }

    async fn restart_proxy_locked(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<OperationReport, InvariantViolation> {
        let interface = entry.interface_name();
        let operation = Operation::ProxyRestart;

        let modem = match self.connected_modem(entry).await {
            Ok(modem) => modem,
            Err(e) => return Ok(OperationReport::failed(interface.clone(), operation, &e)),
        };
        self.registry.upsert_modem(modem).await?;

        match self.restart_proxy_leg(entry).await? {
            Ok(restarted) => {
                let message = format!(
                    "Proxy on {} restarted on port {}",
                    interface, restarted.port
                );
                Ok(Self::restarted_report(interface, operation, message, &restarted))
            }
            Err(failure) => Ok(failure.report(interface, operation)),
        }
    }

    /// Change stored proxy settings
    ///
    /// The running proxy picks the change up on its next restart, so the
    /// registry entry is left as it is.
    pub async fn update_proxy_config(
        &self,
        interface: &InterfaceName,
        patch: &ProxyConfigPatch,
    ) -> Result<OperationReport, InvariantViolation> {
        let operation = Operation::ProxyConfigure;
        let (_guard, entry) = match self.admit(interface, operation).await {
            Ok(admitted) => admitted,
            Err(report) => return Ok(self.finish(report).await),
        };

        if patch.is_empty() {
            return Ok(self
                .finish(OperationReport::success(
                    interface.clone(),
                    operation,
                    format!("Nothing to change for {}", interface),
                ))
                .await);
        }

        let updated = self
            .call(
                Step::ProxyConfig,
                interface,
                self.timeouts.proxy,
                self.collaborators.proxy.update_config(interface, patch),
            )
            .await;

        let report = match updated {
            Ok(()) if entry.proxy.is_running() => OperationReport::success(
                interface.clone(),
                operation,
                format!(
                    "Proxy config for {} updated; restart the proxy to apply it",
                    interface
                ),
            ),
            Ok(()) => OperationReport::success(
                interface.clone(),
                operation,
                format!("Proxy config for {} updated", interface),
            ),
            Err(e) => OperationReport::failed(interface.clone(), operation, &e),
        };
        Ok(self.finish(report).await)
    }
}
