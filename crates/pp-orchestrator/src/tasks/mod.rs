//! Background tasks run by the daemon

pub mod rebind;
pub mod refresh;

pub use rebind::{run_rebind_watcher, IpDriftPolicy, RebindPolicy};
pub use refresh::run_periodic_refresh;
