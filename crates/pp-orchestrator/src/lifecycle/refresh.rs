//! Full reconciliation of the registry against the collaborators

use std::collections::{HashMap, HashSet};

use futures::future::join_all;

use pp_core::error::{InvariantViolation, OrchestratorError};
use pp_core::report::{RefreshSummary, Step};
use pp_core::traits::DiscoveredModem;
use pp_core::types::{
    Connectivity, InterfaceName, InterfaceSnapshot, ModemRecord, ProxyRecord, TunnelRecord,
    TunnelReport, TunnelStatus,
};

use super::{observed_modem, Orchestrator};

/// What one interface looked like during a refresh
struct Observation {
    entry: InterfaceSnapshot,
    /// At least one query for this interface failed
    unreachable: bool,
}

impl Orchestrator {
    /// Re-query every modem, proxy and tunnel and replace the registry contents
    ///
    /// Interfaces whose lock is held are skipped and keep their entry; the
    /// operation holding the lock owns it. Interfaces that are no longer
    /// listed by the modem collaborator are removed. Per-interface query
    /// failures are recorded as `error` states, never propagated.
    pub async fn refresh_all(&self) -> Result<RefreshSummary, OrchestratorError> {
        let discovered = self
            .call(
                Step::ModemQuery,
                "all modems",
                self.timeouts.status,
                self.collaborators.modem.list(),
            )
            .await?;

        let discovered_names: HashSet<InterfaceName> = discovered
            .iter()
            .map(|m| m.interface_name.clone())
            .collect();

        let mut busy = HashSet::new();
        let mut guards = Vec::new();
        let mut targets = Vec::new();

        for modem in discovered {
            match self.locks.try_acquire(&modem.interface_name) {
                Some(guard) => {
                    guards.push(guard);
                    targets.push(modem);
                }
                None => {
                    tracing::debug!("Skipping {}: operation in progress", modem.interface_name);
                    busy.insert(modem.interface_name);
                }
            }
        }

        // Vanished interfaces are only removed if nothing is working on them
        for name in self.registry.interfaces().await {
            if discovered_names.contains(&name) {
                continue;
            }
            match self.locks.try_acquire(&name) {
                Some(guard) => guards.push(guard),
                None => {
                    busy.insert(name);
                }
            }
        }

        let previous: HashMap<InterfaceName, InterfaceSnapshot> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .map(|e| (e.interface_name().clone(), e))
            .collect();

        let observations = join_all(
            targets
                .iter()
                .map(|modem| self.observe(modem, previous.get(&modem.interface_name))),
        )
        .await;

        let mut summary = RefreshSummary {
            reconciled: observations.len(),
            skipped_busy: busy.len(),
            unreachable: observations.iter().filter(|o| o.unreachable).count(),
            removed: 0,
        };

        let entries = observations.into_iter().map(|o| o.entry).collect();
        summary.removed = self.registry.reconcile(entries, &busy).await?;

        drop(guards);
        let known: Vec<InterfaceName> = discovered_names.into_iter().collect();
        self.locks.retain_known(&known);

        tracing::info!(
            "Refresh: {} reconciled, {} busy, {} unreachable, {} removed",
            summary.reconciled,
            summary.skipped_busy,
            summary.unreachable,
            summary.removed
        );
        Ok(summary)
    }

    /// Re-query one interface whose lock the caller already holds
    ///
    /// With `settled` false the proxy and tunnel records already in the
    /// registry win over the fresh query: they describe a leg that just
    /// failed, which the collaborators may report as merely stopped.
    pub(crate) async fn observe_locked(
        &self,
        interface: &InterfaceName,
        settled: bool,
    ) -> Result<(), InvariantViolation> {
        let Some(current) = self.registry.get(interface).await else {
            return Ok(());
        };
        let found = DiscoveredModem {
            id: current.modem.id.clone(),
            display_name: current.modem.display_name.clone(),
            interface_name: interface.clone(),
        };

        let observation = self.observe(&found, Some(&current)).await;
        if observation.unreachable {
            tracing::warn!("{} was only partly reachable after the operation", interface);
        }

        let mut entry = observation.entry;
        if !settled {
            entry.proxy = current.proxy;
            entry.tunnel = current.tunnel;
        }
        self.registry.commit(entry).await
    }

    /// Query all three collaborators for one interface
    async fn observe(
        &self,
        found: &DiscoveredModem,
        previous: Option<&InterfaceSnapshot>,
    ) -> Observation {
        let interface = &found.interface_name;
        let tunnel_id = interface.tunnel_id();

        let (status, config, report) = tokio::join!(
            self.call(
                Step::ModemQuery,
                interface,
                self.timeouts.status,
                self.collaborators.modem.query_status(interface),
            ),
            self.call(
                Step::ProxyQuery,
                interface,
                self.timeouts.status,
                self.collaborators.proxy.current_config(interface),
            ),
            self.call(
                Step::TunnelQuery,
                &tunnel_id,
                self.timeouts.status,
                self.collaborators.tunnel.status(&tunnel_id),
            ),
        );

        let mut unreachable = false;
        let base = ModemRecord {
            id: found.id.clone(),
            display_name: found.display_name.clone(),
            interface_name: interface.clone(),
            connectivity: Connectivity::Disconnected,
            ip_address: None,
        };

        let modem = match status {
            Ok(status) => observed_modem(&base, status),
            Err(e) => {
                tracing::warn!("Modem query failed for {}: {}", interface, e);
                unreachable = true;
                ModemRecord {
                    connectivity: Connectivity::Error,
                    ..base
                }
            }
        };

        let previous_proxy = previous.map(|p| p.proxy.clone()).unwrap_or_default();
        let proxy = match config {
            Ok(Some(config)) => ProxyRecord::running(config),
            Ok(None) => ProxyRecord::stopped(),
            Err(e) => {
                tracing::warn!("Proxy query failed for {}: {}", interface, e);
                unreachable = true;
                ProxyRecord::errored(&previous_proxy)
            }
        };

        let previous_tunnel = previous.and_then(|p| p.tunnel.as_ref());
        let tunnel = match report {
            Ok(report) => reconcile_tunnel(interface, &proxy, report, previous_tunnel),
            Err(e) => {
                tracing::warn!("Tunnel query failed for {}: {}", interface, e);
                previous_tunnel
                    .filter(|_| proxy.is_running())
                    .map(|t| TunnelRecord {
                        status: TunnelStatus::Error,
                        public_url: None,
                        ..t.clone()
                    })
            }
        };

        Observation {
            entry: InterfaceSnapshot {
                modem,
                proxy,
                tunnel,
            },
            unreachable,
        }
    }
}

/// Decide which tunnel record (if any) an interface should carry
///
/// A tunnel is only recorded while its proxy is running. An active report
/// without a URL, or one forwarding to a port the proxy no longer listens
/// on, is recorded as `error`.
pub fn reconcile_tunnel(
    interface: &InterfaceName,
    proxy: &ProxyRecord,
    report: TunnelReport,
    previous: Option<&TunnelRecord>,
) -> Option<TunnelRecord> {
    let proxy_port = match (proxy.is_running(), proxy.port) {
        (true, Some(port)) => port,
        _ => {
            if report.status == TunnelStatus::Active {
                tracing::warn!(
                    "Tunnel for {} reports active but its proxy is {}; not recording it",
                    interface,
                    proxy.proxy_status
                );
            }
            return None;
        }
    };

    let bound_local_port = report
        .local_port
        .or(previous.map(|t| t.bound_local_port))
        .unwrap_or(proxy_port);

    let errored = TunnelRecord {
        tunnel_id: interface.tunnel_id(),
        status: TunnelStatus::Error,
        public_url: None,
        bound_local_port,
    };

    match report.status {
        TunnelStatus::Active if bound_local_port != proxy_port => {
            tracing::warn!(
                "Tunnel for {} forwards port {} but its proxy listens on {}",
                interface,
                bound_local_port,
                proxy_port
            );
            Some(errored)
        }
        TunnelStatus::Active => match report.public_url {
            Some(url) => Some(TunnelRecord {
                status: TunnelStatus::Active,
                public_url: Some(url),
                ..errored
            }),
            None => Some(errored),
        },
        TunnelStatus::Error => Some(errored),
        TunnelStatus::Inactive => None,
    }
}
