//! Structured results returned by orchestrator operations
//!
//! Operations never hand raw collaborator errors to callers. Each returns an
//! [`OperationReport`] that says whether the whole operation succeeded, only
//! some legs succeeded, or nothing did, plus a message fit for display.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ErrorKind, OrchestratorError};
use crate::types::{InterfaceName, InterfaceSnapshot};

/// Which orchestrator operation produced a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    RotateIp,
    ProxyStart,
    ProxyStop,
    ProxyRestart,
    ProxyConfigure,
    TunnelStart,
    TunnelStop,
    AutoRebind,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::RotateIp => "rotate-ip",
            Operation::ProxyStart => "proxy start",
            Operation::ProxyStop => "proxy stop",
            Operation::ProxyRestart => "proxy restart",
            Operation::ProxyConfigure => "proxy configure",
            Operation::TunnelStart => "tunnel start",
            Operation::TunnelStop => "tunnel stop",
            Operation::AutoRebind => "auto-rebind",
        };
        write!(f, "{}", name)
    }
}

/// A single collaborator-facing step inside an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    ModemQuery,
    ModemRotate,
    ProxyQuery,
    ProxyStart,
    ProxyStop,
    ProxyRestart,
    ProxyConfig,
    TunnelQuery,
    TunnelStart,
    TunnelStop,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::ModemQuery => "modem query",
            Step::ModemRotate => "modem rotation",
            Step::ProxyQuery => "proxy query",
            Step::ProxyStart => "proxy start",
            Step::ProxyStop => "proxy stop",
            Step::ProxyRestart => "proxy restart",
            Step::ProxyConfig => "proxy config",
            Step::TunnelQuery => "tunnel query",
            Step::TunnelStart => "tunnel start",
            Step::TunnelStop => "tunnel stop",
        };
        write!(f, "{}", name)
    }
}

/// Overall outcome of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    /// Every leg succeeded (or there was nothing to do)
    Success,
    /// Earlier legs were committed, `failed_step` was not
    Partial { failed_step: Step },
    /// Nothing was achieved
    Failed,
}

/// Result of one orchestrator operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationReport {
    pub interface: InterfaceName,
    pub operation: Operation,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub error_kind: Option<ErrorKind>,
    pub message: String,
    /// New modem address, for rotations
    pub new_ip: Option<String>,
    /// Registry entry after the operation committed
    pub entry: Option<InterfaceSnapshot>,
}

impl OperationReport {
    pub fn success(
        interface: InterfaceName,
        operation: Operation,
        message: impl Into<String>,
    ) -> Self {
        Self {
            interface,
            operation,
            outcome: Outcome::Success,
            error_kind: None,
            message: message.into(),
            new_ip: None,
            entry: None,
        }
    }

    pub fn partial(
        interface: InterfaceName,
        operation: Operation,
        failed_step: Step,
        error: &OrchestratorError,
        message: impl Into<String>,
    ) -> Self {
        Self {
            interface,
            operation,
            outcome: Outcome::Partial { failed_step },
            error_kind: Some(error.kind()),
            message: message.into(),
            new_ip: None,
            entry: None,
        }
    }

    pub fn failed(interface: InterfaceName, operation: Operation, error: &OrchestratorError) -> Self {
        Self {
            message: format!("{} on {} failed: {}", operation, interface, error),
            interface,
            operation,
            outcome: Outcome::Failed,
            error_kind: Some(error.kind()),
            new_ip: None,
            entry: None,
        }
    }

    pub fn with_entry(mut self, entry: Option<InterfaceSnapshot>) -> Self {
        self.entry = entry;
        self
    }

    pub fn with_new_ip(mut self, ip: impl Into<String>) -> Self {
        self.new_ip = Some(ip.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.outcome, Outcome::Partial { .. })
    }
}

/// Result of an auto-rebind request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RebindOutcome {
    pub success: bool,
    pub message: String,
    pub error_kind: Option<ErrorKind>,
}

impl From<&OperationReport> for RebindOutcome {
    fn from(report: &OperationReport) -> Self {
        Self {
            success: report.is_success(),
            message: report.message.clone(),
            error_kind: report.error_kind,
        }
    }
}

/// Summary of a full reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSummary {
    /// Interfaces whose entry was replaced
    pub reconciled: usize,
    /// Interfaces left alone because an operation held their lock
    pub skipped_busy: usize,
    /// Interfaces that could not be queried
    pub unreachable: usize,
    /// Interfaces that disappeared from the host
    pub removed: usize,
}
