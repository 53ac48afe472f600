//! IPC server for dashboard/CLI communication
//!
//! Provides a localhost TCP server that the dashboard and CLI
//! use to communicate with the running orchestrator daemon.

mod server;

pub use server::IpcServer;
