//! Modem-level commands: IP rotation and proxy rebinding

use anyhow::Result;

use super::finish_report;
use crate::ipc::OrchestratorClient;
use crate::output::{print_info, print_rebind};

/// Execute the rotate command
pub async fn rotate_command(client: &mut OrchestratorClient, interface: &str) -> Result<()> {
    print_info(&format!("Rotating IP on {}...", interface));
    let report = client.rotate_ip(interface).await?;
    if let Some(ip) = &report.new_ip {
        tracing::debug!("{} now has IP {}", interface, ip);
    }
    finish_report(report)
}

/// Execute the rebind command
pub async fn rebind_command(client: &mut OrchestratorClient, interface: &str) -> Result<()> {
    let outcome = client.auto_rebind(interface).await?;
    print_rebind(&outcome);
    if outcome.success {
        Ok(())
    } else {
        anyhow::bail!("auto-rebind failed")
    }
}
