//! In-memory fleet of binary actuators that settle some time after a command.

use std::{
    collections::BTreeMap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use shared::{
    domain::{lock_label, DeviceId},
    protocol::{DeviceStatusResponse, DeviceSummary, IssueCommandRequest, IssueCommandResponse},
};
use thiserror::Error;
use tokio::time::Instant;
use tracing::info;

/// Longest actuation lag the simulator will schedule.
pub const MAX_ACTUATION_LAG: Duration = Duration::from_secs(3_600);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SimError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
}

#[derive(Debug, Clone)]
struct PendingMove {
    target_locked: bool,
    lands_at: Instant,
}

#[derive(Debug, Clone)]
struct SimDevice {
    locked: bool,
    online: bool,
    battery: f64,
    signal: f64,
    last_update: DateTime<Utc>,
    pending: Option<PendingMove>,
}

impl SimDevice {
    /// Lands a due move. Offline devices hold their pending move until they reconnect.
    fn settle(&mut self, now: Instant) {
        if !self.online {
            return;
        }
        let Some(pending) = self.pending.as_ref() else {
            return;
        };
        if pending.lands_at > now {
            return;
        }
        self.locked = pending.target_locked;
        self.pending = None;
        self.last_update = Utc::now();
        self.battery = (self.battery - 0.5).max(0.0);
    }

    fn summary(&self, device_id: &DeviceId) -> DeviceSummary {
        DeviceSummary {
            device_id: device_id.clone(),
            online: self.online,
            lock_state: lock_label(self.locked).to_string(),
        }
    }
}

pub struct SimulatedFleet {
    devices: Mutex<BTreeMap<DeviceId, SimDevice>>,
    lag: Duration,
    reject_offline: bool,
}

impl SimulatedFleet {
    /// `lag` is capped at [`MAX_ACTUATION_LAG`].
    pub fn new(lag: Duration, reject_offline: bool) -> Self {
        Self {
            devices: Mutex::new(BTreeMap::new()),
            lag: lag.min(MAX_ACTUATION_LAG),
            reject_offline,
        }
    }

    pub fn with_device(self, device_id: impl Into<String>, locked: bool, online: bool) -> Self {
        self.devices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                DeviceId::new(device_id),
                SimDevice {
                    locked,
                    online,
                    battery: 100.0,
                    signal: -50.0,
                    last_update: Utc::now(),
                    pending: None,
                },
            );
        self
    }

    pub fn list(&self) -> Vec<DeviceSummary> {
        let now = Instant::now();
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        devices
            .iter_mut()
            .map(|(device_id, device)| {
                device.settle(now);
                device.summary(device_id)
            })
            .collect()
    }

    /// Accepts a command and schedules the state flip after the actuation lag.
    /// A later command replaces a move that has not landed yet.
    pub fn issue(
        &self,
        device_id: &DeviceId,
        request: &IssueCommandRequest,
    ) -> Result<IssueCommandResponse, SimError> {
        let now = Instant::now();
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| SimError::UnknownDevice(device_id.clone()))?;
        device.settle(now);

        if !device.online && self.reject_offline {
            info!(device_id = %device_id, command_id = %request.command_id, "sim: rejecting command for offline device");
            return Ok(IssueCommandResponse::rejected("device offline"));
        }

        device.pending = Some(PendingMove {
            target_locked: request.action.expected_locked(),
            lands_at: now + self.lag,
        });
        device.settle(now);
        info!(
            device_id = %device_id,
            command_id = %request.command_id,
            action = %request.action,
            actor = %request.actor,
            lag_ms = self.lag.as_millis() as u64,
            "sim: command accepted"
        );
        Ok(IssueCommandResponse::accepted(format!(
            "flow-{}",
            request.command_id
        )))
    }

    pub fn status(&self, device_id: &DeviceId) -> Result<DeviceStatusResponse, SimError> {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| SimError::UnknownDevice(device_id.clone()))?;
        device.settle(Instant::now());
        Ok(DeviceStatusResponse {
            locked: None,
            lock_state: Some(lock_label(device.locked).to_string()),
            online: device.online,
            battery: device.battery,
            signal: device.signal,
            last_update: device.last_update,
        })
    }

    pub fn set_online(&self, device_id: &DeviceId, online: bool) -> Result<DeviceSummary, SimError> {
        let mut devices = self.devices.lock().unwrap_or_else(PoisonError::into_inner);
        let device = devices
            .get_mut(device_id)
            .ok_or_else(|| SimError::UnknownDevice(device_id.clone()))?;
        device.online = online;
        device.settle(Instant::now());
        info!(device_id = %device_id, online, "sim: connectivity changed");
        Ok(device.summary(device_id))
    }
}

#[cfg(test)]
#[path = "tests/sim_tests.rs"]
mod tests;
