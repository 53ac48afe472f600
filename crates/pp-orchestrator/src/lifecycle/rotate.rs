//! Modem IP rotation

use pp_core::error::InvariantViolation;
use pp_core::report::{Operation, OperationReport, Step};
use pp_core::types::{Connectivity, InterfaceName, InterfaceSnapshot, ModemRecord};

use super::{observed_modem, Orchestrator, TunnelFate};

impl Orchestrator {
    /// Obtain a new public IP on a modem and re-point its proxy at it
    ///
    /// After a successful rotation the proxy is bound to the new address and
    /// restarted, whatever state it was in. The interface is then re-queried
    /// so the committed entry reflects what the collaborators report. If the
    /// rotation succeeds but the restart does not, the new address is kept
    /// and the report is partial.
    pub async fn rotate_ip(
        &self,
        interface: &InterfaceName,
    ) -> Result<OperationReport, InvariantViolation> {
        let (_guard, entry) = match self.admit(interface, Operation::RotateIp).await {
            Ok(admitted) => admitted,
            Err(report) => return Ok(self.finish(report).await),
        };

        let report = self.rotate_locked(&entry).await?;
        Ok(self.finish(report).await)
    }

    async fn rotate_locked(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<OperationReport, InvariantViolation> {
        let interface = entry.interface_name();
        let operation = Operation::RotateIp;

        tracing::info!(
            "Rotating IP on {} (current {})",
            interface,
            entry.modem.ip_address.as_deref().unwrap_or("none")
        );

        let rotated = self
            .call(
                Step::ModemRotate,
                interface,
                self.timeouts.rotate,
                self.collaborators.modem.rotate(interface),
            )
            .await;

        let new_ip = match rotated {
            Ok(ip) => ip,
            Err(e) => {
                self.record_modem_after_failure(entry).await?;
                return Ok(OperationReport::failed(interface.clone(), operation, &e));
            }
        };

        self.registry
            .upsert_modem(ModemRecord {
                connectivity: Connectivity::Connected,
                ip_address: Some(new_ip.clone()),
                ..entry.modem.clone()
            })
            .await?;

        let report = match self.rebind_leg(entry, &new_ip).await? {
            Ok(restarted) => {
                let message = format!(
                    "Rotated {} to {}; proxy restarted on port {}",
                    interface, new_ip, restarted.port
                );
                let report = Self::restarted_report(interface, operation, message, &restarted);
                let settled = !matches!(restarted.tunnel, TunnelFate::Stranded(_));
                self.observe_locked(interface, settled).await?;
                report
            }
            Err(failure) => {
                self.observe_locked(interface, false).await?;
                OperationReport::partial(
                    interface.clone(),
                    operation,
                    failure.step,
                    &failure.error,
                    format!(
                        "Rotated {} to {} but {} failed: {}{}",
                        interface,
                        new_ip,
                        failure.step,
                        failure.error,
                        failure.tunnel_note(interface)
                    ),
                )
            }
        };
        Ok(report.with_new_ip(new_ip))
    }

    /// Record what the modem reports after a failed rotation
    ///
    /// The previous address cannot be assumed to have survived.
    async fn record_modem_after_failure(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<(), InvariantViolation> {
        let interface = entry.interface_name();
        let modem = match self
            .call(
                Step::ModemQuery,
                interface,
                self.timeouts.status,
                self.collaborators.modem.query_status(interface),
            )
            .await
        {
            Ok(status) => observed_modem(&entry.modem, status),
            Err(e) => {
                tracing::warn!("Could not re-query {} after failed rotation: {}", interface, e);
                ModemRecord {
                    connectivity: Connectivity::Error,
                    ip_address: None,
                    ..entry.modem.clone()
                }
            }
        };
        self.registry.upsert_modem(modem).await
    }
}
