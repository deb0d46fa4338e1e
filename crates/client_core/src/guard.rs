//! In-memory mutual exclusion: at most one in-flight command per device.

use std::{
    collections::HashSet,
    sync::{Arc, Mutex, PoisonError},
};

use shared::domain::DeviceId;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CommandGuard {
    busy: Arc<Mutex<HashSet<DeviceId>>>,
}

impl CommandGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `device_id` busy and returns a permit, or `None` when a command for
    /// the device is already in flight. The device is released when the permit
    /// is dropped or explicitly released.
    pub fn try_acquire(&self, device_id: &DeviceId) -> Option<GuardPermit> {
        let inserted = self
            .busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.clone());
        if !inserted {
            debug!(device_id = %device_id, "actuation: guard already held");
            return None;
        }

        Some(GuardPermit {
            guard: self.clone(),
            device_id: device_id.clone(),
            released: false,
        })
    }

    pub fn is_busy(&self, device_id: &DeviceId) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(device_id)
    }

    /// Releases `device_id` regardless of who holds it. Returns whether it was busy.
    pub fn release(&self, device_id: &DeviceId) -> bool {
        self.busy
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id)
    }
}

#[derive(Debug)]
pub struct GuardPermit {
    guard: CommandGuard,
    device_id: DeviceId,
    released: bool,
}

impl GuardPermit {
    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.guard.release(&self.device_id);
        }
    }
}

impl Drop for GuardPermit {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
#[path = "tests/guard_tests.rs"]
mod tests;
