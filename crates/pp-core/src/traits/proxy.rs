//! Proxy collaborator

use async_trait::async_trait;

use crate::error::CollaboratorError;
use crate::types::{InterfaceName, ProxyConfig, ProxyConfigPatch};

/// Controls the forward proxy bound to a modem interface
#[async_trait]
pub trait ProxyCollaborator: Send + Sync {
    /// Start the proxy
    ///
    /// Fails with `ProxyStartFailed` if the modem is not connected, or
    /// `ProxyAlreadyRunning` if it is already up.
    async fn start(&self, interface: &InterfaceName) -> Result<ProxyConfig, CollaboratorError>;

    /// Stop the proxy. Stopping a stopped proxy succeeds.
    async fn stop(&self, interface: &InterfaceName) -> Result<(), CollaboratorError>;

    /// Stop then start. A failure on the start leg leaves the proxy down.
    async fn restart(&self, interface: &InterfaceName) -> Result<ProxyConfig, CollaboratorError>;

    /// Live config, or `None` if the proxy is not running
    async fn current_config(
        &self,
        interface: &InterfaceName,
    ) -> Result<Option<ProxyConfig>, CollaboratorError>;

    /// Persist a partial config change; takes effect on next (re)start
    async fn update_config(
        &self,
        interface: &InterfaceName,
        patch: &ProxyConfigPatch,
    ) -> Result<(), CollaboratorError>;
}
