//! List and refresh command implementations

use anyhow::Result;

use crate::ipc::OrchestratorClient;
use crate::output::{format_interfaces, format_refresh, print_error, print_success};

/// Execute the list command
pub async fn list_command(
    client: &mut OrchestratorClient,
    interface: Option<&str>,
    long: bool,
) -> Result<()> {
    let interfaces = match interface {
        Some(name) => client.get_interface(name).await.map(|entry| vec![entry]),
        None => client.list_interfaces().await,
    };
    let interfaces = match interfaces {
        Ok(i) => i,
        Err(e) => {
            print_error(&format!("Failed to list modems: {}", e));
            return Err(e);
        }
    };

    println!("Modems:");
    println!("{}", format_interfaces(&interfaces, long));

    Ok(())
}

/// Execute the refresh command
pub async fn refresh_command(client: &mut OrchestratorClient, long: bool) -> Result<()> {
    let (summary, interfaces) = match client.refresh().await {
        Ok(r) => r,
        Err(e) => {
            print_error(&format!("Refresh failed: {}", e));
            return Err(e);
        }
    };

    print_success(&format_refresh(&summary));
    println!("{}", format_interfaces(&interfaces, long));

    Ok(())
}
