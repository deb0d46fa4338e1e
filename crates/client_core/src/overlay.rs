//! Provisional lock values shown to the UI while a command awaits confirmation.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use shared::domain::{CommandId, DeviceId};

/// Each entry remembers the command that set it, so a command can only clear
/// its own provisional value.
#[derive(Debug, Clone, Default)]
pub struct OptimisticOverlay {
    values: Arc<Mutex<HashMap<DeviceId, (CommandId, bool)>>>,
}

impl OptimisticOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, device_id: &DeviceId, command_id: CommandId, locked: bool) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device_id.clone(), (command_id, locked));
    }

    /// Removes the provisional value, returning it if one was present.
    pub fn clear(&self, device_id: &DeviceId) -> Option<bool> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(device_id)
            .map(|(_, locked)| locked)
    }

    /// Removes the provisional value only while it still belongs to `command_id`.
    pub fn clear_for(&self, device_id: &DeviceId, command_id: CommandId) -> Option<bool> {
        let mut values = self.values.lock().unwrap_or_else(PoisonError::into_inner);
        match values.get(device_id) {
            Some((owner, _)) if *owner == command_id => {
                values.remove(device_id).map(|(_, locked)| locked)
            }
            _ => None,
        }
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<bool> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .map(|(_, locked)| *locked)
    }

    pub fn is_empty(&self) -> bool {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

#[cfg(test)]
#[path = "tests/overlay_tests.rs"]
mod tests;
