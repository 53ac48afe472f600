//! pp-orchestrator: Modem, proxy and tunnel lifecycle daemon
//!
//! The orchestrator keeps a registry of every modem interface together with
//! the proxy bound to it and the public tunnel in front of that proxy. All
//! transitions (IP rotation, proxy start/stop/restart, tunnel start/stop,
//! rebinding) are serialized per interface and sequenced in dependency
//! order. The IPC interface serves the dashboard and the CLI.

pub mod backend;
pub mod coordinator;
pub mod daemon;
pub mod ipc;
pub mod lifecycle;
pub mod registry;
pub mod state;
pub mod tasks;

pub use coordinator::InterfaceLocks;
pub use lifecycle::{Collaborators, Orchestrator};
pub use registry::{Registry, RegistryEvent};
pub use state::OrchestratorState;
