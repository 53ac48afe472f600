//! Per-interface operation coordinator
//!
//! Every mutating operation on an interface (rotation, proxy or tunnel
//! transitions, rebinds) must hold that interface's lock for its whole
//! duration. Operations on different interfaces never contend.
//!
//! # Admission Model
//!
//! Locks are fair `tokio::sync::Mutex`es, so callers waiting on the same
//! interface are admitted in arrival order. A caller that cannot get in
//! within the admission timeout gives up with
//! [`OrchestratorError::OperationInProgress`].
//!
//! Reconciliation never waits: it uses [`InterfaceLocks::try_acquire`] and
//! skips interfaces that are busy, leaving their registry entry to the
//! operation that holds the lock.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use pp_core::error::OrchestratorError;
use pp_core::types::InterfaceName;

/// Proof that the holder has exclusive access to one interface
pub type InterfaceGuard = OwnedMutexGuard<()>;

/// Lazily created lock per interface name
#[derive(Default)]
pub struct InterfaceLocks {
    locks: DashMap<InterfaceName, Arc<Mutex<()>>>,
}

impl InterfaceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, interface: &InterfaceName) -> Arc<Mutex<()>> {
        self.locks
            .entry(interface.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access, at most `admission`
    pub async fn acquire(
        &self,
        interface: &InterfaceName,
        admission: Duration,
    ) -> Result<InterfaceGuard, OrchestratorError> {
        let lock = self.lock_for(interface);
        match tokio::time::timeout(admission, lock.lock_owned()).await {
            Ok(guard) => Ok(guard),
            Err(_) => {
                tracing::warn!(
                    "Gave up waiting for {} after {:?}: another operation is in progress",
                    interface,
                    admission
                );
                Err(OrchestratorError::OperationInProgress(interface.clone()))
            }
        }
    }

    /// Take the lock only if nobody holds it
    pub fn try_acquire(&self, interface: &InterfaceName) -> Option<InterfaceGuard> {
        self.lock_for(interface).try_lock_owned().ok()
    }

    /// Whether an operation currently holds the interface
    pub fn is_busy(&self, interface: &InterfaceName) -> bool {
        self.locks
            .get(interface)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }

    /// Drop locks for interfaces that no longer exist and are not held
    pub fn retain_known(&self, known: &[InterfaceName]) {
        self.locks
            .retain(|name, lock| known.contains(name) || Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
