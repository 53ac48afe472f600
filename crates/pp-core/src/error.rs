//! Core error types for Proxy Pilot

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::types::InterfaceName;

/// Failures reported by the modem, proxy and tunnel collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    /// Interface could not be queried (device removed, driver error)
    #[error("Modem {interface} unreachable: {reason}")]
    ModemUnreachable {
        interface: InterfaceName,
        reason: String,
    },

    /// No new IP was obtained
    #[error("IP rotation failed on {interface}: {reason}")]
    RotationFailed {
        interface: InterfaceName,
        reason: String,
    },

    /// Proxy could not be brought up
    #[error("Proxy start failed on {interface}: {reason}")]
    ProxyStartFailed {
        interface: InterfaceName,
        reason: String,
    },

    /// Proxy is already running
    #[error("Proxy already running on {0}")]
    ProxyAlreadyRunning(InterfaceName),

    /// Proxy could not be stopped
    #[error("Proxy stop failed on {interface}: {reason}")]
    ProxyStopFailed {
        interface: InterfaceName,
        reason: String,
    },

    /// Proxy configuration could not be read or written
    #[error("Proxy config failed on {interface}: {reason}")]
    ProxyConfigFailed {
        interface: InterfaceName,
        reason: String,
    },

    /// Tunnel could not be established
    #[error("Tunnel {tunnel_id} failed to start: {reason}")]
    TunnelStartFailed { tunnel_id: String, reason: String },

    /// Tunnel could not be torn down
    #[error("Tunnel {tunnel_id} failed to stop: {reason}")]
    TunnelStopFailed { tunnel_id: String, reason: String },

    /// Tunnel status could not be determined
    #[error("Tunnel {tunnel_id} status unavailable: {reason}")]
    TunnelUnavailable { tunnel_id: String, reason: String },

    /// Collaborator produced output that could not be understood
    #[error("Backend protocol error: {0}")]
    Protocol(String),
}

impl CollaboratorError {
    /// Flat discriminant for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollaboratorError::ModemUnreachable { .. } => ErrorKind::ModemUnreachable,
            CollaboratorError::RotationFailed { .. } => ErrorKind::RotationFailed,
            CollaboratorError::ProxyStartFailed { .. } => ErrorKind::ProxyStartFailed,
            CollaboratorError::ProxyAlreadyRunning(_) => ErrorKind::ProxyAlreadyRunning,
            CollaboratorError::ProxyStopFailed { .. } => ErrorKind::ProxyStopFailed,
            CollaboratorError::ProxyConfigFailed { .. } => ErrorKind::ProxyConfigFailed,
            CollaboratorError::TunnelStartFailed { .. } => ErrorKind::TunnelStartFailed,
            CollaboratorError::TunnelStopFailed { .. } => ErrorKind::TunnelStopFailed,
            CollaboratorError::TunnelUnavailable { .. } => ErrorKind::TunnelUnavailable,
            CollaboratorError::Protocol(_) => ErrorKind::Protocol,
        }
    }
}

/// Writes the registry refuses because they would break a record invariant
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("Proxy on {0} marked running without a port")]
    RunningWithoutPort(InterfaceName),

    #[error("Proxy on {0} has credentials without a port")]
    CredentialsWithoutPort(InterfaceName),

    #[error("Tunnel on {0} marked active without a public URL")]
    ActiveTunnelWithoutUrl(InterfaceName),

    #[error("Tunnel on {0} marked active without a running proxy")]
    TunnelWithoutRunningProxy(InterfaceName),

    #[error("Tunnel id {tunnel_id} does not belong to {interface}")]
    ForeignTunnelId {
        interface: InterfaceName,
        tunnel_id: String,
    },

    #[error("Modem record for {record} written under {key}")]
    MismatchedInterface {
        key: InterfaceName,
        record: InterfaceName,
    },

    #[error("No registry entry for {0}")]
    UnknownInterface(InterfaceName),
}

/// Errors surfaced by orchestrator operations
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    /// Collaborator failure
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Dependent resource not in the required state
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Per-interface lock could not be acquired in time
    #[error("Another operation is in progress on {0}")]
    OperationInProgress(InterfaceName),

    /// Collaborator call exceeded its deadline
    #[error("{step} timed out after {}s", .after.as_secs())]
    Timeout { step: String, after: Duration },

    /// Interface is not known to the registry or the host
    #[error("Unknown interface: {0}")]
    UnknownInterface(InterfaceName),

    /// Registry rejected a write
    #[error("Invariant violation: {0}")]
    InvariantViolation(#[from] InvariantViolation),
}

impl OrchestratorError {
    /// Flat discriminant for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            OrchestratorError::Collaborator(e) => e.kind(),
            OrchestratorError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            OrchestratorError::OperationInProgress(_) => ErrorKind::OperationInProgress,
            OrchestratorError::Timeout { .. } => ErrorKind::Timeout,
            OrchestratorError::UnknownInterface(_) => ErrorKind::UnknownInterface,
            OrchestratorError::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }
}

/// Serialisable error discriminant carried in operation reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModemUnreachable,
    RotationFailed,
    ProxyStartFailed,
    ProxyAlreadyRunning,
    ProxyStopFailed,
    ProxyConfigFailed,
    TunnelStartFailed,
    TunnelStopFailed,
    TunnelUnavailable,
    Protocol,
    PreconditionFailed,
    OperationInProgress,
    Timeout,
    UnknownInterface,
    InvariantViolation,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ModemUnreachable => "modem_unreachable",
            ErrorKind::RotationFailed => "rotation_failed",
            ErrorKind::ProxyStartFailed => "proxy_start_failed",
            ErrorKind::ProxyAlreadyRunning => "proxy_already_running",
            ErrorKind::ProxyStopFailed => "proxy_stop_failed",
            ErrorKind::ProxyConfigFailed => "proxy_config_failed",
            ErrorKind::TunnelStartFailed => "tunnel_start_failed",
            ErrorKind::TunnelStopFailed => "tunnel_stop_failed",
            ErrorKind::TunnelUnavailable => "tunnel_unavailable",
            ErrorKind::Protocol => "protocol",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::OperationInProgress => "operation_in_progress",
            ErrorKind::Timeout => "timeout",
            ErrorKind::UnknownInterface => "unknown_interface",
            ErrorKind::InvariantViolation => "invariant_violation",
        };
        write!(f, "{}", name)
    }
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
