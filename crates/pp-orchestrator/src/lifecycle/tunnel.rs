//! Public tunnel start and stop

use pp_core::error::{InvariantViolation, OrchestratorError};
use pp_core::report::{Operation, OperationReport, Step};
use pp_core::types::{InterfaceName, InterfaceSnapshot, TunnelAction, TunnelRecord, TunnelStatus};

use super::Orchestrator;

impl Orchestrator {
    /// Start or stop the tunnel in front of an interface's proxy
    ///
    /// Starting requires a running proxy and is a no-op if a tunnel is
    /// already active. Stopping is always safe to repeat.
    pub async fn set_tunnel_state(
        &self,
        interface: &InterfaceName,
        action: TunnelAction,
    ) -> Result<OperationReport, InvariantViolation> {
        let operation = match action {
            TunnelAction::Start => Operation::TunnelStart,
            TunnelAction::Stop => Operation::TunnelStop,
        };

        let (_guard, entry) = match self.admit(interface, operation).await {
            Ok(admitted) => admitted,
            Err(report) => return Ok(self.finish(report).await),
        };

        let report = match action {
            TunnelAction::Start => self.start_tunnel_locked(&entry).await?,
            TunnelAction::Stop => self.stop_tunnel_locked(&entry).await?,
        };
        Ok(self.finish(report).await)
    }

    async fn start_tunnel_locked(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<OperationReport, InvariantViolation> {
        let interface = entry.interface_name();
        let operation = Operation::TunnelStart;

        let port = match (entry.proxy.is_running(), entry.proxy.port) {
            (true, Some(port)) => port,
            _ => {
                let e = OrchestratorError::PreconditionFailed(format!(
                    "proxy on {} is {}",
                    interface, entry.proxy.proxy_status
                ));
                return Ok(OperationReport::failed(interface.clone(), operation, &e));
            }
        };

        if let Some(TunnelRecord {
            status: TunnelStatus::Active,
            public_url: Some(url),
            ..
        }) = &entry.tunnel
        {
            return Ok(OperationReport::success(
                interface.clone(),
                operation,
                format!("Tunnel for {} already active at {}", interface, url),
            ));
        }

        let tunnel_id = interface.tunnel_id();
        let started = self
            .call(
                Step::TunnelStart,
                &tunnel_id,
                self.timeouts.tunnel,
                self.collaborators.tunnel.start(&tunnel_id, port),
            )
            .await;

        match started {
            Ok(url) => {
                let record = TunnelRecord {
                    tunnel_id,
                    status: TunnelStatus::Active,
                    public_url: Some(url.clone()),
                    bound_local_port: port,
                };
                self.registry.upsert_tunnel(interface, Some(record)).await?;
                Ok(OperationReport::success(
                    interface.clone(),
                    operation,
                    format!("Tunnel for {} active at {} -> port {}", interface, url, port),
                ))
            }
            Err(e) => {
                if entry.tunnel.is_some() {
                    self.registry.upsert_tunnel(interface, None).await?;
                }
                Ok(OperationReport::failed(interface.clone(), operation, &e))
            }
        }
    }

    async fn stop_tunnel_locked(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<OperationReport, InvariantViolation> {
        let interface = entry.interface_name();
        let operation = Operation::TunnelStop;
        let tunnel_id = interface.tunnel_id();

        let stopped = self
            .call(
                Step::TunnelStop,
                &tunnel_id,
                self.timeouts.tunnel,
                self.collaborators.tunnel.stop(&tunnel_id),
            )
            .await;

        match stopped {
            Ok(()) if entry.tunnel.is_some() => {
                self.registry.upsert_tunnel(interface, None).await?;
                Ok(OperationReport::success(
                    interface.clone(),
                    operation,
                    format!("Tunnel for {} stopped", interface),
                ))
            }
            Ok(()) => Ok(OperationReport::success(
                interface.clone(),
                operation,
                format!("No tunnel running for {}", interface),
            )),
            Err(e) => Ok(OperationReport::failed(interface.clone(), operation, &e)),
        }
    }
}
