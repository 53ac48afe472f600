//! In-memory modem, proxy and tunnel collaborators
//!
//! Used by the test suites and by the daemon in `simulated` mode. Ports are
//! handed out from 30000 upward and stick to their interface, credentials
//! are random (8 character username, 12 character password), and tunnel URLs
//! look like `tcp://<n>.tcp.ngrok.io:<port>`.
//!
//! Failures are injected per interface with [`SimulatedBackend::set_fault`].
//! Every call is counted, and overlapping mutating calls on the same
//! interface are tracked so tests can assert that operations were
//! serialized.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::Mutex;

use pp_core::error::CollaboratorError;
use pp_core::traits::{DiscoveredModem, ModemCollaborator, ProxyCollaborator, TunnelCollaborator};
use pp_core::types::{
    Connectivity, InterfaceName, ModemStatus, ProxyConfig, ProxyConfigPatch, TunnelId,
    TunnelReport, TunnelStatus,
};

const FIRST_PORT: u16 = 30000;

/// Failure that can be injected for one interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// Status queries and rotation report the modem unreachable
    Unreachable,
    /// Rotation fails and leaves the modem disconnected
    Rotation,
    /// Proxy start (and the start half of restart) fails
    ProxyStart,
    ProxyStop,
    /// Proxy config reads and writes fail
    ProxyConfig,
    TunnelStart,
    TunnelStop,
}

/// How many times each collaborator call was made
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list: usize,
    pub modem_query: usize,
    pub rotate: usize,
    pub proxy_start: usize,
    pub proxy_stop: usize,
    pub proxy_restart: usize,
    pub proxy_query: usize,
    pub proxy_update: usize,
    pub tunnel_start: usize,
    pub tunnel_stop: usize,
    pub tunnel_status: usize,
}

impl CallCounts {
    /// Calls that change collaborator state
    pub fn mutations(&self) -> usize {
        self.rotate
            + self.proxy_start
            + self.proxy_stop
            + self.proxy_restart
            + self.proxy_update
            + self.tunnel_start
            + self.tunnel_stop
    }
}

struct SimModem {
    id: String,
    name: String,
    ip: Option<String>,
    next_ips: VecDeque<String>,
    proxy_running: bool,
    proxy_config: Option<ProxyConfig>,
}

struct SimTunnel {
    url: String,
    local_port: u16,
    broken: bool,
}

struct SimState {
    modems: BTreeMap<InterfaceName, SimModem>,
    tunnels: HashMap<TunnelId, SimTunnel>,
    next_port: u16,
    faults: HashSet<(InterfaceName, Fault)>,
    calls: CallCounts,
}

impl SimState {
    fn faulty(&self, interface: &InterfaceName, fault: Fault) -> bool {
        self.faults.contains(&(interface.clone(), fault))
    }

    fn allocate_port(&mut self) -> u16 {
        let port = self.next_port;
        self.next_port = self.next_port.saturating_add(1);
        port
    }

    /// Bring the proxy up, creating its config on first use
    fn start_proxy(&mut self, interface: &InterfaceName) -> Result<ProxyConfig, CollaboratorError> {
        let failed = |reason: &str| CollaboratorError::ProxyStartFailed {
            interface: interface.clone(),
            reason: reason.to_string(),
        };
        if self.faulty(interface, Fault::ProxyStart) {
            return Err(failed("service exited with status 1"));
        }

        let needs_port = self
            .modems
            .get(interface)
            .map(|m| m.proxy_config.is_none())
            .ok_or_else(|| failed("no such modem"))?;
        let port = if needs_port { self.allocate_port() } else { 0 };

        let modem = self
            .modems
            .get_mut(interface)
            .ok_or_else(|| failed("no such modem"))?;
        let Some(ip) = modem.ip.clone() else {
            return Err(failed("modem is not connected or has no IP address"));
        };

        let config = modem.proxy_config.get_or_insert_with(|| ProxyConfig {
            port,
            bind_ip: Some(ip),
            proxy_type: "3proxy".to_string(),
            username: Some(random_string(8)),
            password: Some(random_string(12)),
        });
        modem.proxy_running = true;
        Ok(config.clone())
    }
}

/// Drops the in-flight count for an interface when a call finishes
struct InFlight<'a> {
    counts: &'a DashMap<InterfaceName, usize>,
    interface: InterfaceName,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(mut n) = self.counts.get_mut(&self.interface) {
            *n = n.saturating_sub(1);
        }
    }
}

/// All three collaborators, simulated in memory
pub struct SimulatedBackend {
    state: Mutex<SimState>,
    latency: Duration,
    in_flight: DashMap<InterfaceName, usize>,
    max_in_flight: AtomicUsize,
}

impl SimulatedBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                modems: BTreeMap::new(),
                tunnels: HashMap::new(),
                next_port: FIRST_PORT,
                faults: HashSet::new(),
                calls: CallCounts::default(),
            }),
            latency: Duration::ZERO,
            in_flight: DashMap::new(),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Three modems: two connected, one disconnected
    pub fn seeded() -> Self {
        Self::new()
            .with_modem("ppp0", Some("10.64.0.10"))
            .with_modem("ppp1", Some("10.64.0.11"))
            .with_modem("ppp2", None)
    }

    /// Delay applied to every mutating call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_modem(mut self, interface: &str, ip: Option<&str>) -> Self {
        insert_modem(self.state.get_mut(), interface, ip);
        self
    }

    /// Plug in a modem at runtime
    pub async fn add_modem(&self, interface: &str, ip: Option<&str>) {
        insert_modem(&mut *self.state.lock().await, interface, ip);
    }

    /// Unplug a modem, taking its proxy and tunnel with it
    pub async fn remove_modem(&self, interface: &str) {
        let interface = InterfaceName::new(interface);
        let mut state = self.state.lock().await;
        state.modems.remove(&interface);
        state.tunnels.remove(&interface.tunnel_id());
    }

    /// Change a modem's address behind the orchestrator's back
    pub async fn set_ip(&self, interface: &str, ip: Option<&str>) {
        let mut state = self.state.lock().await;
        if let Some(modem) = state.modems.get_mut(&InterfaceName::new(interface)) {
            modem.ip = ip.map(String::from);
        }
    }

    /// Address the next rotation of `interface` will produce
    pub async fn queue_rotation_ip(&self, interface: &str, ip: &str) {
        let mut state = self.state.lock().await;
        if let Some(modem) = state.modems.get_mut(&InterfaceName::new(interface)) {
            modem.next_ips.push_back(ip.to_string());
        }
    }

    pub async fn set_fault(&self, interface: &str, fault: Fault, enabled: bool) {
        let key = (InterfaceName::new(interface), fault);
        let mut state = self.state.lock().await;
        if enabled {
            state.faults.insert(key);
        } else {
            state.faults.remove(&key);
        }
    }

    pub async fn clear_faults(&self) {
        self.state.lock().await.faults.clear();
    }

    /// Make a live tunnel report `error`
    pub async fn break_tunnel(&self, interface: &str) {
        let id = InterfaceName::new(interface).tunnel_id();
        if let Some(tunnel) = self.state.lock().await.tunnels.get_mut(&id) {
            tunnel.broken = true;
        }
    }

    pub async fn calls(&self) -> CallCounts {
        self.state.lock().await.calls.clone()
    }

    /// Most mutating calls ever seen in flight at once on one interface
    pub fn max_concurrent_mutations(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub async fn proxy_running(&self, interface: &str) -> bool {
        self.state
            .lock()
            .await
            .modems
            .get(&InterfaceName::new(interface))
            .map(|m| m.proxy_running)
            .unwrap_or(false)
    }

    pub async fn proxy_config(&self, interface: &str) -> Option<ProxyConfig> {
        self.state
            .lock()
            .await
            .modems
            .get(&InterfaceName::new(interface))
            .and_then(|m| m.proxy_config.clone())
    }

    pub async fn tunnel_live(&self, interface: &str) -> bool {
        self.state
            .lock()
            .await
            .tunnels
            .contains_key(&InterfaceName::new(interface).tunnel_id())
    }

    /// Mark a mutating call on `interface` as in flight and apply latency
    async fn begin(&self, interface: &InterfaceName) -> InFlight<'_> {
        {
            let mut n = self.in_flight.entry(interface.clone()).or_insert(0);
            *n += 1;
            self.max_in_flight.fetch_max(*n, Ordering::SeqCst);
        }
        let guard = InFlight {
            counts: &self.in_flight,
            interface: interface.clone(),
        };
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        guard
    }
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn insert_modem(state: &mut SimState, interface: &str, ip: Option<&str>) {
    state.modems.insert(
        InterfaceName::new(interface),
        SimModem {
            id: format!("sim-{}", interface),
            name: format!("Modem ({})", interface),
            ip: ip.map(String::from),
            next_ips: VecDeque::new(),
            proxy_running: false,
            proxy_config: None,
        },
    );
}

fn random_string(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

fn random_ip(current: Option<&str>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let ip = format!(
            "10.{}.{}.{}",
            rng.gen_range(64..128),
            rng.gen_range(0..=255),
            rng.gen_range(1..255)
        );
        if Some(ip.as_str()) != current {
            return ip;
        }
    }
}

fn random_tunnel_url() -> String {
    let mut rng = rand::thread_rng();
    format!(
        "tcp://{}.tcp.ngrok.io:{}",
        rng.gen_range(0..10),
        rng.gen_range(10000..19000)
    )
}

fn interface_of(tunnel_id: &TunnelId) -> InterfaceName {
    InterfaceName::new(
        tunnel_id
            .as_str()
            .strip_prefix("tunnel_")
            .unwrap_or(tunnel_id.as_str()),
    )
}

#[async_trait]
impl ModemCollaborator for SimulatedBackend {
    async fn list(&self) -> Result<Vec<DiscoveredModem>, CollaboratorError> {
        let mut state = self.state.lock().await;
        state.calls.list += 1;
        Ok(state
            .modems
            .iter()
            .map(|(name, modem)| DiscoveredModem {
                id: modem.id.clone(),
                display_name: modem.name.clone(),
                interface_name: name.clone(),
            })
            .collect())
    }

    async fn query_status(&self, interface: &InterfaceName) -> Result<ModemStatus, CollaboratorError> {
        let mut state = self.state.lock().await;
        state.calls.modem_query += 1;
        let unreachable = |reason: &str| CollaboratorError::ModemUnreachable {
            interface: interface.clone(),
            reason: reason.to_string(),
        };
        if state.faulty(interface, Fault::Unreachable) {
            return Err(unreachable("device not responding"));
        }
        let modem = state
            .modems
            .get(interface)
            .ok_or_else(|| unreachable("no such modem"))?;
        Ok(match &modem.ip {
            Some(ip) => ModemStatus {
                connectivity: Connectivity::Connected,
                ip_address: Some(ip.clone()),
            },
            None => ModemStatus {
                connectivity: Connectivity::Disconnected,
                ip_address: None,
            },
        })
    }

    async fn rotate(&self, interface: &InterfaceName) -> Result<String, CollaboratorError> {
        let _flight = self.begin(interface).await;
        let mut state = self.state.lock().await;
        state.calls.rotate += 1;

        if state.faulty(interface, Fault::Unreachable) {
            return Err(CollaboratorError::ModemUnreachable {
                interface: interface.clone(),
                reason: "device not responding".to_string(),
            });
        }
        let rotation_fails = state.faulty(interface, Fault::Rotation);
        let modem = state
            .modems
            .get_mut(interface)
            .ok_or_else(|| CollaboratorError::ModemUnreachable {
                interface: interface.clone(),
                reason: "no such modem".to_string(),
            })?;

        if rotation_fails {
            modem.ip = None;
            return Err(CollaboratorError::RotationFailed {
                interface: interface.clone(),
                reason: "bearer did not come back after reconnect".to_string(),
            });
        }

        let ip = modem
            .next_ips
            .pop_front()
            .unwrap_or_else(|| random_ip(modem.ip.as_deref()));
        modem.ip = Some(ip.clone());
        Ok(ip)
    }
}

#[async_trait]
impl ProxyCollaborator for SimulatedBackend {
    async fn start(&self, interface: &InterfaceName) -> Result<ProxyConfig, CollaboratorError> {
        let _flight = self.begin(interface).await;
        let mut state = self.state.lock().await;
        state.calls.proxy_start += 1;
        if state.modems.get(interface).map(|m| m.proxy_running) == Some(true) {
            return Err(CollaboratorError::ProxyAlreadyRunning(interface.clone()));
        }
        state.start_proxy(interface)
    }

    async fn stop(&self, interface: &InterfaceName) -> Result<(), CollaboratorError> {
        let _flight = self.begin(interface).await;
        let mut state = self.state.lock().await;
        state.calls.proxy_stop += 1;
        if state.faulty(interface, Fault::ProxyStop) {
            return Err(CollaboratorError::ProxyStopFailed {
                interface: interface.clone(),
                reason: "service did not stop in time".to_string(),
            });
        }
        if let Some(modem) = state.modems.get_mut(interface) {
            modem.proxy_running = false;
        }
        Ok(())
    }

    async fn restart(&self, interface: &InterfaceName) -> Result<ProxyConfig, CollaboratorError> {
        let _flight = self.begin(interface).await;
        let mut state = self.state.lock().await;
        state.calls.proxy_restart += 1;
        if let Some(modem) = state.modems.get_mut(interface) {
            modem.proxy_running = false;
        }
        state.start_proxy(interface)
    }

    async fn current_config(
        &self,
        interface: &InterfaceName,
    ) -> Result<Option<ProxyConfig>, CollaboratorError> {
        let mut state = self.state.lock().await;
        state.calls.proxy_query += 1;
        if state.faulty(interface, Fault::ProxyConfig) {
            return Err(CollaboratorError::ProxyConfigFailed {
                interface: interface.clone(),
                reason: "config store unreadable".to_string(),
            });
        }
        Ok(state
            .modems
            .get(interface)
            .filter(|m| m.proxy_running)
            .and_then(|m| m.proxy_config.clone()))
    }

    async fn update_config(
        &self,
        interface: &InterfaceName,
        patch: &ProxyConfigPatch,
    ) -> Result<(), CollaboratorError> {
        let _flight = self.begin(interface).await;
        let mut state = self.state.lock().await;
        state.calls.proxy_update += 1;
        let failed = |reason: &str| CollaboratorError::ProxyConfigFailed {
            interface: interface.clone(),
            reason: reason.to_string(),
        };
        if state.faulty(interface, Fault::ProxyConfig) {
            return Err(failed("config store unwritable"));
        }

        let needs_port = state
            .modems
            .get(interface)
            .map(|m| m.proxy_config.is_none())
            .ok_or_else(|| failed("no such modem"))?;
        let port = if needs_port { state.allocate_port() } else { 0 };

        let modem = state
            .modems
            .get_mut(interface)
            .ok_or_else(|| failed("no such modem"))?;
        let ip = modem.ip.clone();
        let config = modem.proxy_config.get_or_insert_with(|| ProxyConfig {
            port,
            bind_ip: ip,
            proxy_type: "3proxy".to_string(),
            username: Some(random_string(8)),
            password: Some(random_string(12)),
        });

        if let Some(port) = patch.port {
            config.port = port;
        }
        if let Some(bind_ip) = &patch.bind_ip {
            config.bind_ip = Some(bind_ip.clone());
        }
        if let Some(username) = &patch.username {
            config.username = Some(username.clone());
        }
        if let Some(password) = &patch.password {
            config.password = Some(password.clone());
        }
        Ok(())
    }
}

#[async_trait]
impl TunnelCollaborator for SimulatedBackend {
    async fn start(&self, tunnel_id: &TunnelId, local_port: u16) -> Result<String, CollaboratorError> {
        let interface = interface_of(tunnel_id);
        let _flight = self.begin(&interface).await;
        let mut state = self.state.lock().await;
        state.calls.tunnel_start += 1;
        if state.faulty(&interface, Fault::TunnelStart) {
            return Err(CollaboratorError::TunnelStartFailed {
                tunnel_id: tunnel_id.to_string(),
                reason: "authentication failed".to_string(),
            });
        }

        let url = random_tunnel_url();
        state.tunnels.insert(
            tunnel_id.clone(),
            SimTunnel {
                url: url.clone(),
                local_port,
                broken: false,
            },
        );
        Ok(url)
    }

    async fn stop(&self, tunnel_id: &TunnelId) -> Result<(), CollaboratorError> {
        let interface = interface_of(tunnel_id);
        let _flight = self.begin(&interface).await;
        let mut state = self.state.lock().await;
        state.calls.tunnel_stop += 1;
        if state.faulty(&interface, Fault::TunnelStop) {
            return Err(CollaboratorError::TunnelStopFailed {
                tunnel_id: tunnel_id.to_string(),
                reason: "client did not exit".to_string(),
            });
        }
        state.tunnels.remove(tunnel_id);
        Ok(())
    }

    async fn status(&self, tunnel_id: &TunnelId) -> Result<TunnelReport, CollaboratorError> {
        let mut state = self.state.lock().await;
        state.calls.tunnel_status += 1;
        Ok(match state.tunnels.get(tunnel_id) {
            Some(tunnel) if tunnel.broken => TunnelReport {
                status: TunnelStatus::Error,
                public_url: None,
                local_port: Some(tunnel.local_port),
            },
            Some(tunnel) => TunnelReport {
                status: TunnelStatus::Active,
                public_url: Some(tunnel.url.clone()),
                local_port: Some(tunnel.local_port),
            },
            None => TunnelReport::inactive(),
        })
    }
}
