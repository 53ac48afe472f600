//! Rebind watcher
//!
//! Periodically looks at the registry and asks a [`RebindPolicy`] whether a
//! proxy has drifted away from its modem's address. Drifted proxies are
//! re-pointed with [`Orchestrator::auto_rebind`]. The policy only decides;
//! all state changes go through the orchestrator like any other operation.

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use pp_core::config::RebindConfig;
use pp_core::types::{InterfaceSnapshot, ProxyStatus};

use crate::lifecycle::Orchestrator;

/// Decides whether an interface needs a rebind
pub trait RebindPolicy: Send + Sync {
    /// Reason to rebind, or `None` to leave the interface alone
    fn should_rebind(&self, entry: &InterfaceSnapshot) -> Option<String>;
}

/// Rebind when a running proxy is bound to an address the modem no longer
/// holds, or when the proxy failed while the modem is connected
#[derive(Debug, Default, Clone, Copy)]
pub struct IpDriftPolicy;

impl RebindPolicy for IpDriftPolicy {
    fn should_rebind(&self, entry: &InterfaceSnapshot) -> Option<String> {
        if !entry.modem.is_connected() {
            return None;
        }
        let ip = entry.modem.ip_address.as_deref()?;

        match entry.proxy.proxy_status {
            ProxyStatus::Running => match entry.proxy.bind_ip.as_deref() {
                Some(bound) if bound != ip => Some(format!(
                    "proxy bound to {} but modem is at {}",
                    bound, ip
                )),
                _ => None,
            },
            ProxyStatus::Error => Some(format!("proxy failed while modem is at {}", ip)),
            ProxyStatus::Stopped => None,
        }
    }
}

/// Check every watched interface once and rebind the drifted ones
///
/// Returns how many rebinds were attempted.
pub async fn rebind_pass(
    orchestrator: &Orchestrator,
    config: &RebindConfig,
    policy: &dyn RebindPolicy,
) -> usize {
    let candidates: Vec<_> = orchestrator
        .snapshot()
        .await
        .into_iter()
        .filter(|entry| config.watches(entry.interface_name()))
        .filter(|entry| !orchestrator.locks().is_busy(entry.interface_name()))
        .filter_map(|entry| {
            policy
                .should_rebind(&entry)
                .map(|reason| (entry.interface_name().clone(), reason))
        })
        .collect();

    let attempts = candidates.len();
    join_all(candidates.into_iter().map(|(interface, reason)| async move {
        tracing::info!("Rebinding {}: {}", interface, reason);
        match orchestrator.auto_rebind(&interface).await {
            Ok(outcome) if outcome.success => tracing::info!("{}", outcome.message),
            Ok(outcome) => tracing::warn!("{}", outcome.message),
            Err(violation) => tracing::error!("Rebind of {} aborted: {}", interface, violation),
        }
    }))
    .await;

    attempts
}

/// Run rebind passes on `config.interval` until cancelled
pub async fn run_rebind_watcher(
    orchestrator: Arc<Orchestrator>,
    config: RebindConfig,
    policy: Arc<dyn RebindPolicy>,
    cancel: CancellationToken,
) {
    if !config.enabled || config.interval.is_zero() {
        tracing::info!("Rebind watcher disabled");
        return;
    }

    let mut interval = tokio::time::interval_at(Instant::now() + config.interval, config.interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::info!(
        "Starting rebind watcher (every {:?}, {} interfaces)",
        config.interval,
        if config.interfaces.is_empty() {
            "all".to_string()
        } else {
            config.interfaces.len().to_string()
        }
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                rebind_pass(&orchestrator, &config, policy.as_ref()).await;
            }
            _ = cancel.cancelled() => {
                tracing::info!("Rebind watcher shutting down");
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
    use pp_core::types::{
        Connectivity, InterfaceName, ModemRecord, ProxyAction, ProxyConfig, ProxyRecord,
    };

    fn entry(ip: Option<&str>, proxy: ProxyRecord) -> InterfaceSnapshot {
        InterfaceSnapshot {
            modem: ModemRecord {
                id: "sim-ppp0".to_string(),
                display_name: "Modem (ppp0)".to_string(),
                interface_name: InterfaceName::new("ppp0"),
                connectivity: if ip.is_some() {
                    Connectivity::Connected
                } else {
                    Connectivity::Disconnected
                },
                ip_address: ip.map(String::from),
            },
            proxy,
            tunnel: None,
        }
    }

    fn bound_to(ip: &str) -> ProxyRecord {
        ProxyRecord::running(ProxyConfig {
            port: 30000,
            bind_ip: Some(ip.to_string()),
            proxy_type: "3proxy".to_string(),
            username: None,
            password: None,
        })
    }

    #[test]
    fn test_drift_policy() {
        let policy = IpDriftPolicy;
        assert!(policy
            .should_rebind(&entry(Some("10.0.0.5"), bound_to("10.0.0.5")))
            .is_none());
        assert!(policy
            .should_rebind(&entry(Some("10.0.0.9"), bound_to("10.0.0.5")))
            .is_some());
        assert!(policy
            .should_rebind(&entry(None, bound_to("10.0.0.5")))
            .is_none());
        assert!(policy
            .should_rebind(&entry(Some("10.0.0.5"), ProxyRecord::stopped()))
            .is_none());

        let failed = ProxyRecord::errored(&bound_to("10.0.0.5"));
        assert!(policy
            .should_rebind(&entry(Some("10.0.0.5"), failed))
            .is_some());
    }

    #[tokio::test]
    async fn test_pass_rebinds_drifted_proxy() {
        let sim = Arc::new(SimulatedBackend::new().with_modem("ppp0", Some("10.0.0.5")));
        let orchestrator = Orchestrator::new(
            Collaborators::from_backend(sim.clone()),
            TimeoutConfig::default(),
        );
        let ppp0 = InterfaceName::new("ppp0");

        orchestrator.refresh_all().await.unwrap();
        let report = orchestrator
            .set_proxy_state(&ppp0, ProxyAction::Start)
            .await
            .unwrap();
        assert!(report.is_success());

        // Modem reconnects with a new address outside our control
        sim.set_ip("ppp0", Some("10.0.0.77")).await;
        orchestrator.refresh_all().await.unwrap();

        let config = RebindConfig {
            enabled: true,
            ..RebindConfig::default()
        };
        assert_eq!(rebind_pass(&orchestrator, &config, &IpDriftPolicy).await, 1);

        let after = orchestrator.registry().get(&ppp0).await.unwrap();
        assert_eq!(after.proxy.bind_ip.as_deref(), Some("10.0.0.77"));
        assert_eq!(rebind_pass(&orchestrator, &config, &IpDriftPolicy).await, 0);
    }

    #[tokio::test]
    async fn test_pass_ignores_unwatched_interfaces() {
        let sim = Arc::new(SimulatedBackend::new().with_modem("ppp0", Some("10.0.0.5")));
        let orchestrator = Orchestrator::new(
            Collaborators::from_backend(sim.clone()),
            TimeoutConfig::default(),
        );
        orchestrator.refresh_all().await.unwrap();
        orchestrator
            .set_proxy_state(&InterfaceName::new("ppp0"), ProxyAction::Start)
            .await
            .unwrap();
        sim.set_ip("ppp0", Some("10.0.0.77")).await;
        orchestrator.refresh_all().await.unwrap();

        let config = RebindConfig {
            enabled: true,
            interfaces: vec![InterfaceName::new("ppp1")],
            ..RebindConfig::default()
        };
        assert_eq!(rebind_pass(&orchestrator, &config, &IpDriftPolicy).await, 0);
    }
}
