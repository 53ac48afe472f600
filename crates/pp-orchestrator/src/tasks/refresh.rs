//! Periodic reconciliation task
//!
//! Keeps the registry close to reality between operator actions. Each pass
//! calls [`Orchestrator::refresh_all`], which skips interfaces that an
//! operation currently holds.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::lifecycle::Orchestrator;

/// Run a full refresh every `every` until cancelled
///
/// A zero interval disables the task. The first pass happens one interval
/// after start; the daemon does its own initial refresh.
pub async fn run_periodic_refresh(
    orchestrator: Arc<Orchestrator>,
    every: Duration,
    cancel: CancellationToken,
) {
    if every.is_zero() {
        tracing::info!("Periodic refresh disabled");
        return;
    }

    let mut interval = tokio::time::interval_at(Instant::now() + every, every);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!("Starting periodic refresh (every {:?})", every);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = orchestrator.refresh_all().await {
                    tracing::warn!("Periodic refresh failed: {}", e);
                }
            }
            _ = cancel.cancelled() => {
                tracing::info!("Periodic refresh shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SimulatedBackend;
    use crate::lifecycle::Collaborators;
    use pp_core::config::TimeoutConfig;

    #[tokio::test(start_paused = true)]
    async fn test_refresh_runs_until_cancelled() {
        let sim = Arc::new(SimulatedBackend::seeded());
        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators::from_backend(sim.clone()),
            TimeoutConfig::default(),
        ));
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_periodic_refresh(
            orchestrator.clone(),
            Duration::from_secs(30),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(65)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(sim.calls().await.list, 2);
        assert_eq!(orchestrator.registry().len().await, 3);
    }

    #[tokio::test]
    async fn test_zero_interval_returns_immediately() {
        let sim = Arc::new(SimulatedBackend::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators::from_backend(sim),
            TimeoutConfig::default(),
        ));
        run_periodic_refresh(orchestrator, Duration::ZERO, CancellationToken::new()).await;
    }
}
