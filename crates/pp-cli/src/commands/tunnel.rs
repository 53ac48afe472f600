//! Tunnel command implementation

use anyhow::Result;
use pp_core::types::TunnelAction;

use super::finish_report;
use crate::ipc::OrchestratorClient;

/// Execute `tunnel start|stop <interface>`
pub async fn tunnel_command(
    client: &mut OrchestratorClient,
    interface: &str,
    action: TunnelAction,
) -> Result<()> {
    let report = client.set_tunnel_state(interface, action).await?;
    let url = report
        .entry
        .as_ref()
        .and_then(|e| e.tunnel.as_ref())
        .and_then(|t| t.public_url.clone());

    finish_report(report)?;
    if let (TunnelAction::Start, Some(url)) = (action, url) {
        println!("{}", url);
    }
    Ok(())
}
