//! Modem collaborator

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::types::{InterfaceName, ModemStatus};

/// A modem found on the host during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredModem {
    pub id: String,
    pub display_name: String,
    pub interface_name: InterfaceName,
}

/// Queries and rotates modem connectivity
#[async_trait]
pub trait ModemCollaborator: Send + Sync {
    /// Every modem interface currently present on the host
    async fn list(&self) -> Result<Vec<DiscoveredModem>, CollaboratorError>;

    /// Current connectivity of one interface
    ///
    /// Fails with `ModemUnreachable` if the interface cannot be queried.
    async fn query_status(&self, interface: &InterfaceName)
        -> Result<ModemStatus, CollaboratorError>;

    /// Disconnect and reconnect the modem, returning the new address
    ///
    /// Slow (seconds). Fails with `RotationFailed` if no address comes back;
    /// callers must re-query afterwards rather than assume the old state.
    async fn rotate(&self, interface: &InterfaceName) -> Result<String, CollaboratorError>;
}
