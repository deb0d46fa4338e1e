//! Scripted collaborators shared by the unit tests.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::{
    domain::{Command, Device, DeviceId, DeviceStatus},
    protocol::{CommandAck, UiNotification},
};

use crate::{
    clock::Clock,
    controller::{ActuationController, ControllerDependencies},
    notifier::NotificationSurface,
    poller::BackoffPolicy,
    registry::DeviceRegistry,
    DeviceCommandClient, DeviceStatusClient,
};

pub fn base_time() -> DateTime<Utc> {
    "2024-05-01T10:00:00Z".parse().expect("timestamp")
}

pub fn status(locked: bool) -> DeviceStatus {
    DeviceStatus {
        locked,
        online: true,
        battery: 90.0,
        signal: -55.0,
        last_update: base_time(),
    }
}

pub fn offline_status(locked: bool) -> DeviceStatus {
    DeviceStatus {
        online: false,
        ..status(locked)
    }
}

pub fn read(locked: bool) -> Result<DeviceStatus, String> {
    Ok(status(locked))
}

pub fn transport_error() -> Result<DeviceStatus, String> {
    Err("connection reset by peer".to_string())
}

pub struct ScriptedStatusClient {
    script: Mutex<VecDeque<Result<DeviceStatus, String>>>,
    exhausted: Result<DeviceStatus, String>,
    calls: Mutex<u32>,
}

impl ScriptedStatusClient {
    pub fn new(script: impl IntoIterator<Item = Result<DeviceStatus, String>>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            exhausted: Err("status script exhausted".to_string()),
            calls: Mutex::new(0),
        }
    }

    pub fn repeating(read: Result<DeviceStatus, String>) -> Self {
        Self::new(Vec::new()).then_always(read)
    }

    pub fn then_always(mut self, read: Result<DeviceStatus, String>) -> Self {
        self.exhausted = read;
        self
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().expect("calls lock")
    }
}

#[async_trait]
impl DeviceStatusClient for ScriptedStatusClient {
    async fn get_status(&self, _device_id: &DeviceId) -> Result<DeviceStatus> {
        *self.calls.lock().expect("calls lock") += 1;
        let next = self
            .script
            .lock()
            .expect("script lock")
            .pop_front()
            .unwrap_or_else(|| self.exhausted.clone());
        next.map_err(|err| anyhow!(err))
    }
}

pub struct ScriptedCommandClient {
    response: Result<CommandAck, String>,
    issued: Mutex<Vec<Command>>,
}

impl ScriptedCommandClient {
    pub fn accepting(flow_id: &str) -> Self {
        Self::with_response(Ok(CommandAck::Accepted {
            flow_id: flow_id.to_string(),
        }))
    }

    pub fn rejecting(reason: &str) -> Self {
        Self::with_response(Ok(CommandAck::Rejected {
            reason: reason.to_string(),
        }))
    }

    pub fn unreachable(message: &str) -> Self {
        Self::with_response(Err(message.to_string()))
    }

    fn with_response(response: Result<CommandAck, String>) -> Self {
        Self {
            response,
            issued: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.issued.lock().expect("issued lock").len()
    }

    pub fn issued(&self) -> Vec<Command> {
        self.issued.lock().expect("issued lock").clone()
    }
}

#[async_trait]
impl DeviceCommandClient for ScriptedCommandClient {
    async fn issue_command(&self, command: &Command) -> Result<CommandAck> {
        self.issued
            .lock()
            .expect("issued lock")
            .push(command.clone());
        self.response.clone().map_err(|err| anyhow!(err))
    }
}

/// Never answers, like a command service that accepted the connection and stalled.
pub struct HangingCommandClient;

#[async_trait]
impl DeviceCommandClient for HangingCommandClient {
    async fn issue_command(&self, _command: &Command) -> Result<CommandAck> {
        std::future::pending().await
    }
}

/// Records requested waits and advances its own notion of `now` instead of sleeping.
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    waits: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(base_time()),
            waits: Mutex::new(Vec::new()),
        }
    }

    pub fn waits(&self) -> Vec<Duration> {
        self.waits.lock().expect("waits lock").clone()
    }

    pub fn elapsed(&self) -> Duration {
        self.waits()
            .into_iter()
            .fold(Duration::ZERO, Duration::saturating_add)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("now lock")
    }

    async fn after(&self, duration: Duration) {
        self.waits.lock().expect("waits lock").push(duration);
        if let Ok(delta) = chrono::Duration::from_std(duration) {
            let mut now = self.now.lock().expect("now lock");
            if let Some(next) = now.checked_add_signed(delta) {
                *now = next;
            }
        }
        tokio::task::yield_now().await;
    }
}

#[derive(Default)]
pub struct RecordingSurface {
    notifications: Mutex<Vec<UiNotification>>,
}

impl RecordingSurface {
    pub fn notifications(&self) -> Vec<UiNotification> {
        self.notifications.lock().expect("notifications lock").clone()
    }
}

impl NotificationSurface for RecordingSurface {
    fn publish(&self, notification: UiNotification) {
        self.notifications
            .lock()
            .expect("notifications lock")
            .push(notification);
    }
}

pub fn device(id: &str, locked: bool) -> Device {
    Device::new(DeviceId::new(id), locked, true)
}

pub struct Harness {
    pub controller: Arc<ActuationController>,
    pub commands: Arc<ScriptedCommandClient>,
    pub statuses: Arc<ScriptedStatusClient>,
    pub clock: Arc<ManualClock>,
    pub surface: Arc<RecordingSurface>,
}

impl Harness {
    pub fn new(
        commands: ScriptedCommandClient,
        statuses: ScriptedStatusClient,
        devices: impl IntoIterator<Item = Device>,
    ) -> Self {
        Self::with_policy(commands, statuses, devices, BackoffPolicy::default())
    }

    pub fn with_policy(
        commands: ScriptedCommandClient,
        statuses: ScriptedStatusClient,
        devices: impl IntoIterator<Item = Device>,
        policy: BackoffPolicy,
    ) -> Self {
        let commands = Arc::new(commands);
        let statuses = Arc::new(statuses);
        let clock = Arc::new(ManualClock::new());
        let surface = Arc::new(RecordingSurface::default());
        let dependencies = ControllerDependencies::new(commands.clone(), statuses.clone())
            .with_clock(clock.clone())
            .with_surface(surface.clone());
        let controller = ActuationController::new(
            dependencies,
            DeviceRegistry::with_devices(devices),
            policy,
        );
        Self {
            controller,
            commands,
            statuses,
            clock,
            surface,
        }
    }
}
