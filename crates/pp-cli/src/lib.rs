//! proxy-pilot: Command-line interface for Proxy Pilot
//!
//! Provides the `proxy-pilot` CLI for running the orchestrator daemon and
//! driving modem, proxy and tunnel operations through it.

pub mod commands;
pub mod ipc;
pub mod output;
