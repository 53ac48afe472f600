//! Lifecycle orchestration
//!
//! The [`Orchestrator`] owns the registry and the per-interface locks and
//! drives the modem, proxy and tunnel collaborators through every state
//! transition. Each public operation:
//!
//! 1. takes the interface lock (waiting at most the admission timeout),
//! 2. checks its preconditions against freshly queried state,
//! 3. calls collaborators in dependency order, each under its own deadline,
//! 4. commits each completed leg to the registry before starting the next,
//! 5. returns an [`OperationReport`] instead of a raw error.
//!
//! Only an [`InvariantViolation`] escapes as `Err`. That means the
//! orchestrator tried to commit an impossible state; the registry refused the
//! write and the operation stopped there.

mod proxy;
mod rebind;
mod refresh;
mod rotate;
mod tunnel;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use pp_core::config::TimeoutConfig;
use pp_core::error::{CollaboratorError, InvariantViolation, OrchestratorError};
use pp_core::report::{Operation, OperationReport, Step};
use pp_core::traits::{ModemCollaborator, ProxyCollaborator, TunnelCollaborator};
use pp_core::types::{
    Connectivity, InterfaceName, InterfaceSnapshot, ModemRecord, ModemStatus, ProxyConfigPatch,
    ProxyRecord, TunnelRecord, TunnelStatus,
};

use crate::coordinator::{InterfaceGuard, InterfaceLocks};
use crate::registry::Registry;

pub use refresh::reconcile_tunnel;

/// The three collaborators an orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    pub modem: Arc<dyn ModemCollaborator>,
    pub proxy: Arc<dyn ProxyCollaborator>,
    pub tunnel: Arc<dyn TunnelCollaborator>,
}

impl Collaborators {
    /// Use one backend for all three roles
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: ModemCollaborator + ProxyCollaborator + TunnelCollaborator + 'static,
    {
        Self {
            modem: backend.clone(),
            proxy: backend.clone(),
            tunnel: backend,
        }
    }
}

/// Serializes and sequences every lifecycle operation
pub struct Orchestrator {
    registry: Arc<Registry>,
    locks: InterfaceLocks,
    collaborators: Collaborators,
    timeouts: TimeoutConfig,
}

/// What became of an interface's tunnel during a proxy restart
#[derive(Debug)]
pub(crate) enum TunnelFate {
    /// No tunnel, or one that is still valid
    Kept,
    Stopped,
    /// The tunnel could not be stopped and is recorded as `error`
    Stranded(OrchestratorError),
}

/// A successful proxy restart
#[derive(Debug)]
pub(crate) struct Restarted {
    pub port: u16,
    pub tunnel: TunnelFate,
}

/// A restart leg that did not bring the proxy back
#[derive(Debug)]
pub(crate) struct LegFailure {
    pub step: Step,
    pub error: OrchestratorError,
    /// Set when the tunnel in front of the proxy is still up
    pub stranded_tunnel: Option<OrchestratorError>,
}

impl LegFailure {
    fn new(step: Step, error: OrchestratorError) -> Self {
        Self {
            step,
            error,
            stranded_tunnel: None,
        }
    }

    /// Suffix naming a tunnel that outlived the failure, if any
    pub(crate) fn tunnel_note(&self, interface: &InterfaceName) -> String {
        match &self.stranded_tunnel {
            Some(e) => format!(
                "; tunnel {} is still up and could not be stopped: {}",
                interface.tunnel_id(),
                e
            ),
            None => String::new(),
        }
    }

    /// Total-failure report for `operation`
    pub(crate) fn report(&self, interface: &InterfaceName, operation: Operation) -> OperationReport {
        let mut report = OperationReport::failed(interface.clone(), operation, &self.error);
        report.message.push_str(&self.tunnel_note(interface));
        report
    }
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, timeouts: TimeoutConfig) -> Self {
        Self {
            registry: Arc::new(Registry::new()),
            locks: InterfaceLocks::new(),
            collaborators,
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn locks(&self) -> &InterfaceLocks {
        &self.locks
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        &self.timeouts
    }

    /// Consistent view of every interface
    pub async fn snapshot(&self) -> Vec<InterfaceSnapshot> {
        self.registry.snapshot().await
    }

    /// Run one collaborator call under a deadline
    pub(crate) async fn call<T, F>(
        &self,
        step: Step,
        target: impl fmt::Display,
        limit: Duration,
        fut: F,
    ) -> Result<T, OrchestratorError>
    where
        F: Future<Output = Result<T, CollaboratorError>>,
    {
        match tokio::time::timeout(limit, fut).await {
            Ok(result) => result.map_err(OrchestratorError::from),
            Err(_) => {
                tracing::warn!("{} on {} timed out after {:?}", step, target, limit);
                Err(OrchestratorError::Timeout {
                    step: format!("{} on {}", step, target),
                    after: limit,
                })
            }
        }
    }

    /// Take the interface lock and load its current entry
    ///
    /// On failure returns the report the caller should hand back.
    async fn admit(
        &self,
        interface: &InterfaceName,
        operation: Operation,
    ) -> Result<(InterfaceGuard, InterfaceSnapshot), OperationReport> {
        let guard = self
            .locks
            .acquire(interface, self.timeouts.admission)
            .await
            .map_err(|e| OperationReport::failed(interface.clone(), operation, &e))?;

        match self.registry.get(interface).await {
            Some(entry) => Ok((guard, entry)),
            None => Err(OperationReport::failed(
                interface.clone(),
                operation,
                &OrchestratorError::UnknownInterface(interface.clone()),
            )),
        }
    }

    /// Attach the committed entry and log the outcome
    async fn finish(&self, report: OperationReport) -> OperationReport {
        if report.is_success() {
            tracing::info!("{}", report.message);
        } else {
            tracing::warn!("{}", report.message);
        }
        let entry = self.registry.get(&report.interface).await;
        report.with_entry(entry)
    }

    /// Re-query the modem and require it to be connected with an address
    async fn connected_modem(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<ModemRecord, OrchestratorError> {
        let interface = entry.interface_name();
        let status = self
            .call(
                Step::ModemQuery,
                interface,
                self.timeouts.status,
                self.collaborators.modem.query_status(interface),
            )
            .await?;

        let modem = observed_modem(&entry.modem, status);
        if modem.is_connected() {
            Ok(modem)
        } else if modem.connectivity == Connectivity::Connected {
            Err(OrchestratorError::PreconditionFailed(format!(
                "modem {} has no IP address",
                interface
            )))
        } else {
            Err(OrchestratorError::PreconditionFailed(format!(
                "modem {} is {}",
                interface, modem.connectivity
            )))
        }
    }

    /// Stop the interface's tunnel and drop its record
    ///
    /// If the tunnel will not stop it stays in the registry as `error`.
    async fn stop_tunnel_or_strand(
        &self,
        interface: &InterfaceName,
        tunnel: &TunnelRecord,
    ) -> Result<TunnelFate, InvariantViolation> {
        let tunnel_id = interface.tunnel_id();
        let stopped = self
            .call(
                Step::TunnelStop,
                &tunnel_id,
                self.timeouts.tunnel,
                self.collaborators.tunnel.stop(&tunnel_id),
            )
            .await;

        match stopped {
            Ok(()) => {
                self.registry.upsert_tunnel(interface, None).await?;
                Ok(TunnelFate::Stopped)
            }
            Err(e) => {
                tracing::warn!("Could not stop tunnel {}, keeping it as error: {}", tunnel_id, e);
                let stranded = TunnelRecord {
                    status: TunnelStatus::Error,
                    public_url: None,
                    ..tunnel.clone()
                };
                self.registry.upsert_tunnel(interface, Some(stranded)).await?;
                Ok(TunnelFate::Stranded(e))
            }
        }
    }

    /// Restart the proxy and settle its tunnel
    ///
    /// A tunnel survives only if the restart succeeded and the port did not
    /// change. On failure the proxy is marked `error` and the tunnel is torn
    /// down, or recorded as `error` if it will not stop.
    async fn restart_proxy_leg(
        &self,
        entry: &InterfaceSnapshot,
    ) -> Result<Result<Restarted, LegFailure>, InvariantViolation> {
        let interface = entry.interface_name();
        let restarted = self
            .call(
                Step::ProxyRestart,
                interface,
                self.timeouts.proxy,
                self.collaborators.proxy.restart(interface),
            )
            .await;

        match restarted {
            Ok(config) => {
                let port = config.port;
                let tunnel = match &entry.tunnel {
                    Some(tunnel) if tunnel.bound_local_port != port => {
                        tracing::info!(
                            "Proxy on {} moved from port {} to {}, stopping tunnel",
                            interface,
                            tunnel.bound_local_port,
                            port
                        );
                        self.stop_tunnel_or_strand(interface, tunnel).await?
                    }
                    _ => TunnelFate::Kept,
                };
                self.registry
                    .upsert_proxy(interface, ProxyRecord::running(config))
                    .await?;
                Ok(Ok(Restarted { port, tunnel }))
            }
            Err(e) => {
                let mut failure = LegFailure::new(Step::ProxyRestart, e);
                if let Some(tunnel) = &entry.tunnel {
                    if let TunnelFate::Stranded(te) =
                        self.stop_tunnel_or_strand(interface, tunnel).await?
                    {
                        failure.stranded_tunnel = Some(te);
                    }
                }
                self.registry
                    .upsert_proxy(interface, ProxyRecord::errored(&entry.proxy))
                    .await?;
                Ok(Err(failure))
            }
        }
    }

    /// Point the proxy at `ip` and restart it
    async fn rebind_leg(
        &self,
        entry: &InterfaceSnapshot,
        ip: &str,
    ) -> Result<Result<Restarted, LegFailure>, InvariantViolation> {
        let interface = entry.interface_name();
        let patch = ProxyConfigPatch {
            bind_ip: Some(ip.to_string()),
            ..Default::default()
        };
        if let Err(e) = self
            .call(
                Step::ProxyConfig,
                interface,
                self.timeouts.proxy,
                self.collaborators.proxy.update_config(interface, &patch),
            )
            .await
        {
            return Ok(Err(LegFailure::new(Step::ProxyConfig, e)));
        }

        self.restart_proxy_leg(entry).await
    }

    /// Report for a restart leg that succeeded
    ///
    /// A tunnel that had to go but would not stop turns the report partial.
    fn restarted_report(
        interface: &InterfaceName,
        operation: Operation,
        mut message: String,
        restarted: &Restarted,
    ) -> OperationReport {
        match &restarted.tunnel {
            TunnelFate::Kept => OperationReport::success(interface.clone(), operation, message),
            TunnelFate::Stopped => {
                message.push_str("; tunnel stopped because the port changed");
                OperationReport::success(interface.clone(), operation, message)
            }
            TunnelFate::Stranded(e) => {
                message.push_str(&format!(
                    "; tunnel {} still points at the old port and could not be stopped: {}",
                    interface.tunnel_id(),
                    e
                ));
                OperationReport::partial(interface.clone(), operation, Step::TunnelStop, e, message)
            }
        }
    }
}

/// Merge a fresh status query into a modem record
///
/// The address is only kept while the modem reports `connected`.
pub(crate) fn observed_modem(base: &ModemRecord, status: ModemStatus) -> ModemRecord {
    let ip_address = match status.connectivity {
        Connectivity::Connected => status.ip_address,
        _ => None,
    };
    ModemRecord {
        connectivity: status.connectivity,
        ip_address,
        ..base.clone()
    }
}
