//! IPC client for communicating with the orchestrator
//!
//! Uses TCP on localhost for cross-platform compatibility.

mod client;

pub use client::OrchestratorClient;

// Re-export constants and types from pp_core
pub use pp_core::config::DEFAULT_IPC_PORT;
pub use pp_core::ipc::{default_ipc_address, IpcEvent, OrchestratorStatus};
