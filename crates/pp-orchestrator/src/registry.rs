//! Resource registry
//!
//! The canonical in-memory record of every modem interface and its proxy and
//! tunnel sub-state. All entries sit behind a single `RwLock`, so a
//! [`Registry::snapshot`] never observes a half-written entry: readers see
//! either the state before a write or after it.
//!
//! Every write is validated before it lands. A write that would leave a
//! running proxy without a port, an active tunnel without a URL, or an active
//! tunnel whose proxy is not running is rejected with [`InvariantViolation`] and the
//! registry is left untouched.

use std::collections::{BTreeMap, HashSet};

use tokio::sync::{broadcast, RwLock};

use pp_core::error::InvariantViolation;
use pp_core::types::{
    InterfaceName, InterfaceSnapshot, ModemRecord, ProxyRecord, TunnelRecord, TunnelStatus,
};

/// Change notification emitted after a committed write
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// Entry created or replaced
    Updated(InterfaceSnapshot),
    /// Interface disappeared from the host
    Removed(InterfaceName),
}

/// Canonical store of interface state
pub struct Registry {
    /// Entries ordered by interface name
    entries: RwLock<BTreeMap<InterfaceName, InterfaceSnapshot>>,
    /// Change notifications
    events: broadcast::Sender<RegistryEvent>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            entries: RwLock::new(BTreeMap::new()),
            events,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Consistent point-in-time view of every interface, ordered by name
    pub async fn snapshot(&self) -> Vec<InterfaceSnapshot> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Entry for one interface
    pub async fn get(&self, interface: &InterfaceName) -> Option<InterfaceSnapshot> {
        self.entries.read().await.get(interface).cloned()
    }

    /// Names of every known interface
    pub async fn interfaces(&self) -> Vec<InterfaceName> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Replace a modem record, creating the entry (with a stopped proxy) if new
    pub async fn upsert_modem(&self, record: ModemRecord) -> Result<(), InvariantViolation> {
        let mut entries = self.entries.write().await;
        let key = record.interface_name.clone();
        let entry = match entries.get(&key) {
            Some(existing) => InterfaceSnapshot {
                modem: record,
                ..existing.clone()
            },
            None => InterfaceSnapshot {
                modem: record,
                proxy: ProxyRecord::stopped(),
                tunnel: None,
            },
        };
        self.store(&mut entries, key, entry)
    }

    /// Replace the proxy record of a known interface
    pub async fn upsert_proxy(
        &self,
        interface: &InterfaceName,
        record: ProxyRecord,
    ) -> Result<(), InvariantViolation> {
        let mut entries = self.entries.write().await;
        let existing = entries
            .get(interface)
            .ok_or_else(|| InvariantViolation::UnknownInterface(interface.clone()))?;
        let entry = InterfaceSnapshot {
            proxy: record,
            ..existing.clone()
        };
        self.store(&mut entries, interface.clone(), entry)
    }

    /// Replace or remove the tunnel record of a known interface
    pub async fn upsert_tunnel(
        &self,
        interface: &InterfaceName,
        record: Option<TunnelRecord>,
    ) -> Result<(), InvariantViolation> {
        let mut entries = self.entries.write().await;
        let existing = entries
            .get(interface)
            .ok_or_else(|| InvariantViolation::UnknownInterface(interface.clone()))?;
        let entry = InterfaceSnapshot {
            tunnel: record,
            ..existing.clone()
        };
        self.store(&mut entries, interface.clone(), entry)
    }

    /// Replace a whole entry in one write
    pub async fn commit(&self, entry: InterfaceSnapshot) -> Result<(), InvariantViolation> {
        let mut entries = self.entries.write().await;
        let key = entry.interface_name().clone();
        self.store(&mut entries, key, entry)
    }

    /// Atomically replace the registry contents with freshly observed entries
    ///
    /// Interfaces in `keep` retain their current entry untouched. Any other
    /// known interface missing from `observed` is removed. Nothing is written
    /// unless every observed entry is valid.
    ///
    /// Returns the number of removed interfaces.
    pub async fn reconcile(
        &self,
        observed: Vec<InterfaceSnapshot>,
        keep: &HashSet<InterfaceName>,
    ) -> Result<usize, InvariantViolation> {
        for entry in &observed {
            if let Err(violation) = validate(entry.interface_name(), entry) {
                tracing::error!(
                    "Registry rejected refresh for {}: {}",
                    entry.interface_name(),
                    violation
                );
                return Err(violation);
            }
        }

        let mut entries = self.entries.write().await;
        let observed_names: HashSet<InterfaceName> = observed
            .iter()
            .map(|e| e.interface_name().clone())
            .collect();

        let vanished: Vec<InterfaceName> = entries
            .keys()
            .filter(|k| !observed_names.contains(*k) && !keep.contains(*k))
            .cloned()
            .collect();

        for name in &vanished {
            entries.remove(name);
            let _ = self.events.send(RegistryEvent::Removed(name.clone()));
        }

        for entry in observed {
            let key = entry.interface_name().clone();
            if keep.contains(&key) {
                continue;
            }
            if entries.get(&key) != Some(&entry) {
                let _ = self.events.send(RegistryEvent::Updated(entry.clone()));
            }
            entries.insert(key, entry);
        }

        Ok(vanished.len())
    }

    /// Validate and store an entry, notifying subscribers on change
    fn store(
        &self,
        entries: &mut BTreeMap<InterfaceName, InterfaceSnapshot>,
        key: InterfaceName,
        entry: InterfaceSnapshot,
    ) -> Result<(), InvariantViolation> {
        if let Err(violation) = validate(&key, &entry) {
            tracing::error!("Registry rejected write for {}: {}", key, violation);
            return Err(violation);
        }

        if entries.get(&key) != Some(&entry) {
            let _ = self.events.send(RegistryEvent::Updated(entry.clone()));
        }
        entries.insert(key, entry);
        Ok(())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check every record invariant of one entry
pub fn validate(key: &InterfaceName, entry: &InterfaceSnapshot) -> Result<(), InvariantViolation> {
    if &entry.modem.interface_name != key {
        return Err(InvariantViolation::MismatchedInterface {
            key: key.clone(),
            record: entry.modem.interface_name.clone(),
        });
    }

    let proxy = &entry.proxy;
    if proxy.is_running() && proxy.port.is_none() {
        return Err(InvariantViolation::RunningWithoutPort(key.clone()));
    }
    if proxy.credentials.is_some() && proxy.port.is_none() {
        return Err(InvariantViolation::CredentialsWithoutPort(key.clone()));
    }

    if let Some(tunnel) = &entry.tunnel {
        if tunnel.tunnel_id != key.tunnel_id() {
            return Err(InvariantViolation::ForeignTunnelId {
                interface: key.clone(),
                tunnel_id: tunnel.tunnel_id.to_string(),
            });
        }
        if tunnel.status == TunnelStatus::Active && tunnel.public_url.is_none() {
            return Err(InvariantViolation::ActiveTunnelWithoutUrl(key.clone()));
        }
        if tunnel.status == TunnelStatus::Active && !proxy.is_running() {
            return Err(InvariantViolation::TunnelWithoutRunningProxy(key.clone()));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pp_core::types::{Connectivity, Credentials, ProxyStatus};

    fn modem(name: &str, ip: Option<&str>) -> ModemRecord {
        ModemRecord {
            id: format!("dev-{}", name),
            display_name: format!("Modem ({})", name),
            interface_name: InterfaceName::new(name),
            connectivity: if ip.is_some() {
                Connectivity::Connected
            } else {
                Connectivity::Disconnected
            },
            ip_address: ip.map(String::from),
        }
    }

    fn running(port: u16) -> ProxyRecord {
        ProxyRecord {
            proxy_status: ProxyStatus::Running,
            port: Some(port),
            credentials: Some(Credentials {
                username: "u".to_string(),
                password: "p".to_string(),
            }),
            bind_ip: None,
        }
    }

    fn active_tunnel(name: &str, port: u16) -> TunnelRecord {
        TunnelRecord {
            tunnel_id: InterfaceName::new(name).tunnel_id(),
            status: TunnelStatus::Active,
            public_url: Some("tcp://0.tcp.ngrok.io:12345".to_string()),
            bound_local_port: port,
        }
    }

    #[tokio::test]
    async fn test_new_modem_gets_stopped_proxy() {
        let registry = Registry::new();
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();

        let entry = registry.get(&InterfaceName::new("ppp0")).await.unwrap();
        assert_eq!(entry.proxy.proxy_status, ProxyStatus::Stopped);
        assert!(entry.tunnel.is_none());
    }

    #[tokio::test]
    async fn test_rejects_running_proxy_without_port() {
        let registry = Registry::new();
        let iface = InterfaceName::new("ppp0");
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();

        let mut bad = running(30000);
        bad.port = None;
        let err = registry.upsert_proxy(&iface, bad).await.unwrap_err();
        assert_eq!(err, InvariantViolation::RunningWithoutPort(iface.clone()));

        let entry = registry.get(&iface).await.unwrap();
        assert_eq!(entry.proxy.proxy_status, ProxyStatus::Stopped);
    }

    #[tokio::test]
    async fn test_rejects_credentials_without_port() {
        let registry = Registry::new();
        let iface = InterfaceName::new("ppp0");
        registry.upsert_modem(modem("ppp0", None)).await.unwrap();

        let mut bad = ProxyRecord::stopped();
        bad.credentials = Some(Credentials {
            username: "u".to_string(),
            password: "p".to_string(),
        });
        let err = registry.upsert_proxy(&iface, bad).await.unwrap_err();
        assert_eq!(err, InvariantViolation::CredentialsWithoutPort(iface));
    }

    #[tokio::test]
    async fn test_rejects_active_tunnel_without_url() {
        let registry = Registry::new();
        let iface = InterfaceName::new("ppp0");
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();
        registry.upsert_proxy(&iface, running(30000)).await.unwrap();

        let mut tunnel = active_tunnel("ppp0", 30000);
        tunnel.public_url = None;
        let err = registry.upsert_tunnel(&iface, Some(tunnel)).await.unwrap_err();
        assert_eq!(err, InvariantViolation::ActiveTunnelWithoutUrl(iface));
    }

    #[tokio::test]
    async fn test_tunnel_cannot_outlive_proxy() {
        let registry = Registry::new();
        let iface = InterfaceName::new("ppp0");
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();
        registry.upsert_proxy(&iface, running(30000)).await.unwrap();
        registry
            .upsert_tunnel(&iface, Some(active_tunnel("ppp0", 30000)))
            .await
            .unwrap();

        let err = registry
            .upsert_proxy(&iface, ProxyRecord::stopped())
            .await
            .unwrap_err();
        assert_eq!(err, InvariantViolation::TunnelWithoutRunningProxy(iface.clone()));

        // Removing the tunnel first makes the stop legal
        registry.upsert_tunnel(&iface, None).await.unwrap();
        registry.upsert_proxy(&iface, ProxyRecord::stopped()).await.unwrap();
    }

    #[tokio::test]
    async fn test_stranded_tunnel_may_stay_on_failed_proxy() {
        let registry = Registry::new();
        let iface = InterfaceName::new("ppp0");
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();
        registry.upsert_proxy(&iface, running(30000)).await.unwrap();

        let mut stranded = active_tunnel("ppp0", 30000);
        stranded.status = TunnelStatus::Error;
        stranded.public_url = None;
        registry.upsert_tunnel(&iface, Some(stranded)).await.unwrap();
        registry
            .upsert_proxy(&iface, ProxyRecord::errored(&running(30000)))
            .await
            .unwrap();

        let entry = registry.get(&iface).await.unwrap();
        assert_eq!(entry.proxy.proxy_status, ProxyStatus::Error);
        assert_eq!(entry.tunnel.unwrap().status, TunnelStatus::Error);
    }

    #[tokio::test]
    async fn test_rejects_foreign_tunnel_id() {
        let registry = Registry::new();
        let iface = InterfaceName::new("ppp0");
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();
        registry.upsert_proxy(&iface, running(30000)).await.unwrap();

        let err = registry
            .upsert_tunnel(&iface, Some(active_tunnel("ppp1", 30000)))
            .await
            .unwrap_err();
        assert!(matches!(err, InvariantViolation::ForeignTunnelId { .. }));
    }

    #[tokio::test]
    async fn test_upsert_proxy_on_unknown_interface() {
        let registry = Registry::new();
        let iface = InterfaceName::new("ppp9");
        let err = registry.upsert_proxy(&iface, running(30000)).await.unwrap_err();
        assert_eq!(err, InvariantViolation::UnknownInterface(iface));
    }

    #[tokio::test]
    async fn test_snapshot_is_ordered() {
        let registry = Registry::new();
        registry.upsert_modem(modem("ppp2", None)).await.unwrap();
        registry.upsert_modem(modem("ppp0", None)).await.unwrap();
        registry.upsert_modem(modem("ppp1", None)).await.unwrap();

        let names: Vec<String> = registry
            .snapshot()
            .await
            .iter()
            .map(|e| e.interface_name().to_string())
            .collect();
        assert_eq!(names, vec!["ppp0", "ppp1", "ppp2"]);
    }

    #[tokio::test]
    async fn test_reconcile_keeps_busy_and_drops_vanished() {
        let registry = Registry::new();
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();
        registry.upsert_modem(modem("ppp1", Some("10.0.0.6"))).await.unwrap();
        registry.upsert_modem(modem("ppp2", None)).await.unwrap();

        let observed = vec![
            InterfaceSnapshot {
                modem: modem("ppp0", Some("10.0.0.7")),
                proxy: ProxyRecord::stopped(),
                tunnel: None,
            },
            InterfaceSnapshot {
                modem: modem("ppp1", None),
                proxy: ProxyRecord::stopped(),
                tunnel: None,
            },
        ];
        let keep: HashSet<_> = [InterfaceName::new("ppp1")].into_iter().collect();

        let removed = registry.reconcile(observed, &keep).await.unwrap();
        assert_eq!(removed, 1);

        let ppp0 = registry.get(&InterfaceName::new("ppp0")).await.unwrap();
        assert_eq!(ppp0.modem.ip_address.as_deref(), Some("10.0.0.7"));
        let ppp1 = registry.get(&InterfaceName::new("ppp1")).await.unwrap();
        assert_eq!(ppp1.modem.ip_address.as_deref(), Some("10.0.0.6"));
        assert!(registry.get(&InterfaceName::new("ppp2")).await.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_is_all_or_nothing() {
        let registry = Registry::new();
        registry.upsert_modem(modem("ppp0", Some("10.0.0.5"))).await.unwrap();

        let mut bad_proxy = running(30000);
        bad_proxy.port = None;
        let observed = vec![
            InterfaceSnapshot {
                modem: modem("ppp0", None),
                proxy: ProxyRecord::stopped(),
                tunnel: None,
            },
            InterfaceSnapshot {
                modem: modem("ppp1", Some("10.0.0.6")),
                proxy: bad_proxy,
                tunnel: None,
            },
        ];

        assert!(registry.reconcile(observed, &HashSet::new()).await.is_err());
        let ppp0 = registry.get(&InterfaceName::new("ppp0")).await.unwrap();
        assert_eq!(ppp0.modem.ip_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_events_only_on_change() {
        let registry = Registry::new();
        let mut rx = registry.subscribe();

        registry.upsert_modem(modem("ppp0", None)).await.unwrap();
        registry.upsert_modem(modem("ppp0", None)).await.unwrap();

        assert!(matches!(rx.try_recv(), Ok(RegistryEvent::Updated(_))));
        assert!(rx.try_recv().is_err());
    }
}
