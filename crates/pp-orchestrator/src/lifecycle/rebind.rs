//! Auto-rebind: re-point a proxy at its modem's current address

use pp_core::error::{InvariantViolation, OrchestratorError};
use pp_core::report::{Operation, OperationReport, RebindOutcome};
use pp_core::types::{InterfaceName, InterfaceSnapshot};

use super::Orchestrator;

impl Orchestrator {
    /// Rebind and return the short `{success, message}` outcome
    pub async fn auto_rebind(
        &self,
        interface: &InterfaceName,
    ) -> Result<RebindOutcome, InvariantViolation> {
        let report = self.rebind(interface).await?;
        Ok(RebindOutcome::from(&report))
    }

    /// Rebind and return the full report
    ///
    /// Fails without touching the proxy when the modem has no address.
    /// There is no fallback to a loopback bind.
    pub async fn rebind(
        &self,
        interface: &InterfaceName,
    ) -> Result<OperationReport, InvariantViolation> {
        let (_guard, entry) = match self.admit(interface, Operation::AutoRebind).await {
            Ok(admitted) => admitted,
            Err(report) => return Ok(self.finish(report).await),
        };

        let report = self.rebind_locked(&entry).await?;
        Ok(self.finish(report).await)
    }

    async fn rebind_locked(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<OperationReport, InvariantViolation> {
        let interface = entry.interface_name();
        let operation = Operation::AutoRebind;

        let modem = match self.connected_modem(entry).await {
            Ok(modem) => modem,
            Err(e) => return Ok(OperationReport::failed(interface.clone(), operation, &e)),
        };
        let Some(ip) = modem.ip_address.clone() else {
            let e = OrchestratorError::PreconditionFailed(format!(
                "modem {} has no IP address",
                interface
            ));
            return Ok(OperationReport::failed(interface.clone(), operation, &e));
        };
        self.registry.upsert_modem(modem).await?;

        let report = match self.rebind_leg(entry, &ip).await? {
            Ok(restarted) => {
                let message = format!(
                    "Proxy on {} rebound to {} (port {})",
                    interface, ip, restarted.port
                );
                Self::restarted_report(interface, operation, message, &restarted)
            }
            Err(failure) => failure.report(interface, operation),
        };
        Ok(report.with_new_ip(ip))
    }
}
