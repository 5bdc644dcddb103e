//! Per-resource drain gate

use nanoclaw_core::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, MutexGuard};

/// Drain gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    Idle,
    Draining,
}

/// Admits one drain of a resource at a time
///
/// Callers that must not pile up use [`DrainGate::try_begin`]; callers that
/// may wait their turn use [`DrainGate::begin`]. The gate returns to
/// [`DrainState::Idle`] when the permit is dropped, including on unwind.
pub struct DrainGate {
    resource: &'static str,
    lock: Mutex<()>,
    draining: AtomicBool,
}

/// Held for the duration of one drain
pub struct DrainPermit<'a> {
    gate: &'a DrainGate,
    _guard: MutexGuard<'a, ()>,
}

impl DrainGate {
    pub fn new(resource: &'static str) -> Self {
        Self {
            resource,
            lock: Mutex::new(()),
            draining: AtomicBool::new(false),
        }
    }

    pub fn resource(&self) -> &'static str {
        self.resource
    }

    pub fn state(&self) -> DrainState {
        if self.draining.load(Ordering::SeqCst) {
            DrainState::Draining
        } else {
            DrainState::Idle
        }
    }

    /// Enter Draining, or fail with [`GatewayError::DrainInProgress`]
    pub fn try_begin(&self) -> Result<DrainPermit<'_>> {
        let guard = self
            .lock
            .try_lock()
            .map_err(|_| GatewayError::DrainInProgress { resource: self.resource })?;
        Ok(self.admit(guard))
    }

    /// Enter Draining once the current drain, if any, completes
    pub async fn begin(&self) -> DrainPermit<'_> {
        let guard = self.lock.lock().await;
        self.admit(guard)
    }

    fn admit<'a>(&'a self, guard: MutexGuard<'a, ()>) -> DrainPermit<'a> {
        self.draining.store(true, Ordering::SeqCst);
        DrainPermit { gate: self, _guard: guard }
    }
}

impl Drop for DrainPermit<'_> {
    fn drop(&mut self) {
        self.gate.draining.store(false, Ordering::SeqCst);
    }
}
