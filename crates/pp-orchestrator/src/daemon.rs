//! Daemon wiring: initial reconciliation, background tasks and the IPC server

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::ipc::IpcServer;
use crate::state::OrchestratorState;
use crate::tasks::{run_periodic_refresh, run_rebind_watcher, IpDriftPolicy};

/// Run the daemon until `cancel` fires
pub async fn run(state: Arc<OrchestratorState>, cancel: CancellationToken) -> Result<()> {
    let orchestrator = Arc::clone(&state.orchestrator);

    match orchestrator.refresh_all().await {
        Ok(summary) => tracing::info!(
            "Initial refresh found {} interfaces ({} unreachable)",
            summary.reconciled,
            summary.unreachable
        ),
        Err(e) => tracing::warn!("Initial refresh failed: {}", e),
    }

    let refresh_task = tokio::spawn(run_periodic_refresh(
        Arc::clone(&orchestrator),
        state.config.refresh_interval,
        cancel.clone(),
    ));

    let rebind_task = tokio::spawn(run_rebind_watcher(
        Arc::clone(&orchestrator),
        state.config.rebind.clone(),
        Arc::new(IpDriftPolicy),
        cancel.clone(),
    ));

    let server = IpcServer::new(state.config.ipc_address(), Arc::clone(&state))
        .with_shutdown_token(cancel.clone());

    let result = tokio::select! {
        result = server.run() => result,
        _ = cancel.cancelled() => Ok(()),
    };
    cancel.cancel();

    let _ = refresh_task.await;
    let _ = rebind_task.await;
    state.shutdown().await;

    tracing::info!("Orchestrator shutdown complete");
    result
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
pub fn cancel_on_signals(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Could not install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
            _ = cancel.cancelled() => return,
        }

        cancel.cancel();
    });
}
