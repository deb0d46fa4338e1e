use anyhow::Result;
use async_trait::async_trait;
use shared::{
    domain::{ActuatorAction, Command, DeviceId, DeviceStatus},
    protocol::CommandAck,
};
use thiserror::Error;

pub mod clock;
pub mod config;
pub mod controller;
pub mod convergence;
pub mod guard;
pub mod http;
pub mod notifier;
pub mod overlay;
pub mod poller;
pub mod reconcile;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use controller::{
    ActuationController, CancelMode, CommandCanceller, CommandHandle, CommandReport,
    ControllerDependencies, ControllerEvent,
};
pub use http::HttpDeviceApi;
pub use notifier::CommandOutcome;
pub use poller::BackoffPolicy;
pub use reconcile::FinalVerdict;
pub use registry::{DeviceRegistry, DeviceView};

/// Issues an actuation request. Not idempotent: every accepted call moves
/// hardware, so implementations must not retry internally.
#[async_trait]
pub trait DeviceCommandClient: Send + Sync {
    /// `Err` means the request may not have reached the device service.
    async fn issue_command(&self, command: &Command) -> Result<CommandAck>;
}

/// Reads the authoritative device state at call time. Safe to call repeatedly.
#[async_trait]
pub trait DeviceStatusClient: Send + Sync {
    async fn get_status(&self, device_id: &DeviceId) -> Result<DeviceStatus>;
}

#[derive(Debug, Error)]
pub enum ActuationError {
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
    #[error("a command for device {0} is already in flight")]
    Busy(DeviceId),
    #[error("{action} rejected for device {device_id}: {reason}")]
    Rejected {
        device_id: DeviceId,
        action: ActuatorAction,
        reason: String,
    },
    #[error("failed to reach the command service for device {device_id}: {source}")]
    Unreachable {
        device_id: DeviceId,
        source: anyhow::Error,
    },
    #[error("confirmation task ended unexpectedly: {0}")]
    TaskFailed(#[from] tokio::task::JoinError),
}
