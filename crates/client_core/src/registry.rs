//! Single source of truth for confirmed device state.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock},
};

use chrono::{DateTime, Utc};
use shared::domain::{Device, DeviceId, DeviceStatus};

#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<HashMap<DeviceId, Device>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: impl IntoIterator<Item = Device>) -> Self {
        let registry = Self::new();
        for device in devices {
            registry.register(device);
        }
        registry
    }

    /// Adds a device, replacing any earlier record with the same id.
    pub fn register(&self, device: Device) {
        self.devices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(device.device_id.clone(), device);
    }

    pub fn contains(&self, device_id: &DeviceId) -> bool {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(device_id)
    }

    pub fn get(&self, device_id: &DeviceId) -> Option<Device> {
        self.devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(device_id)
            .cloned()
    }

    pub fn list(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self
            .devices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        devices.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        devices
    }

    /// Only the controller writes canonical state, and only after a confirming read.
    pub(crate) fn record_confirmation(
        &self,
        device_id: &DeviceId,
        observed: &DeviceStatus,
        confirmed_at: DateTime<Utc>,
    ) -> bool {
        let mut devices = self.devices.write().unwrap_or_else(PoisonError::into_inner);
        let Some(device) = devices.get_mut(device_id) else {
            return false;
        };
        device.canonical_locked = observed.locked;
        device.online = observed.online;
        device.last_confirmed_at = Some(confirmed_at);
        true
    }
}

/// Read-only projection combining canonical and optimistic state for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceView {
    pub device_id: DeviceId,
    pub displayed_locked: bool,
    pub pending: bool,
    pub online: bool,
    pub last_confirmed_at: Option<DateTime<Utc>>,
}

impl DeviceView {
    pub fn project(device: &Device, optimistic_locked: Option<bool>) -> Self {
        Self {
            device_id: device.device_id.clone(),
            displayed_locked: optimistic_locked.unwrap_or(device.canonical_locked),
            pending: optimistic_locked.is_some(),
            online: device.online,
            last_confirmed_at: device.last_confirmed_at,
        }
    }
}
