//! Collaborator trait definitions
//!
//! The orchestrator never touches devices or processes directly. Modem
//! connectivity, proxy processes and public tunnels are each reached through
//! one of these traits, so they can be backed by a controller script, a
//! tunnel client process, or an in-memory simulation.

mod modem;
mod proxy;
mod tunnel;

pub use modem::{DiscoveredModem, ModemCollaborator};
pub use proxy::ProxyCollaborator;
pub use tunnel::TunnelCollaborator;
