//! pp-core: Core abstractions and configuration for Proxy Pilot
//!
//! This crate provides the modem/proxy/tunnel record types, the collaborator
//! traits, the error taxonomy, configuration structures and the IPC protocol
//! shared by the orchestrator daemon and the CLI.

pub mod config;
pub mod error;
pub mod ipc;
pub mod report;
pub mod traits;
pub mod types;

pub use error::{CollaboratorError, ErrorKind, InvariantViolation, OrchestratorError};
pub use report::{OperationReport, Outcome, RebindOutcome, Step};
pub use types::{InterfaceName, InterfaceSnapshot, TunnelId};
