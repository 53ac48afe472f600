//! Proxy command implementations

use anyhow::Result;
use pp_core::types::{ProxyAction, ProxyConfigPatch};

use super::finish_report;
use crate::ipc::OrchestratorClient;

/// Execute `proxy start|stop|restart <interface>`
pub async fn proxy_command(
    client: &mut OrchestratorClient,
    interface: &str,
    action: ProxyAction,
) -> Result<()> {
    let report = client.set_proxy_state(interface, action).await?;
    let proxy = report.entry.as_ref().map(|e| e.proxy.clone());

    finish_report(report)?;
    if let (ProxyAction::Start | ProxyAction::Restart, Some(proxy)) = (action, proxy) {
        if let (Some(port), Some(creds)) = (proxy.port, proxy.credentials) {
            println!("port={} user={} pass={}", port, creds.username, creds.password);
        }
    }
    Ok(())
}

/// Execute `proxy set <interface> [--port] [--bind-ip] [--username] [--password]`
pub async fn proxy_set_command(
    client: &mut OrchestratorClient,
    interface: &str,
    patch: ProxyConfigPatch,
) -> Result<()> {
    if patch.is_empty() {
        anyhow::bail!("Nothing to change: pass at least one of --port, --bind-ip, --username, --password");
    }
    let report = client.update_proxy_config(interface, patch).await?;
    finish_report(report)
}
