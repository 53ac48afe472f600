//! Tunnel collaborator

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::types::{TunnelId, TunnelReport};

/// Establishes public tunnels to local proxy ports
#[async_trait]
pub trait TunnelCollaborator: Send + Sync {
    /// Open a tunnel to `local_port`, returning its public URL
    async fn start(&self, tunnel_id: &TunnelId, local_port: u16)
        -> Result<String, CollaboratorError>;

    /// Close a tunnel. Closing an unknown tunnel succeeds.
    async fn stop(&self, tunnel_id: &TunnelId) -> Result<(), CollaboratorError>;

    /// Observed tunnel state
    async fn status(&self, tunnel_id: &TunnelId) -> Result<TunnelReport, CollaboratorError>;
}
