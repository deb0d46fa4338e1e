use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(pub String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque token assigned when a command is issued. The remote API never echoes it
/// back, so it is only useful for idempotency keys and log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandId(pub Uuid);

impl CommandId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorAction {
    Lock,
    Unlock,
}

impl ActuatorAction {
    /// The `locked` value an authoritative read must report once this action took effect.
    pub fn expected_locked(self) -> bool {
        matches!(self, Self::Lock)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
        }
    }

    /// Past-tense label used in user-facing text.
    pub fn past_tense(self) -> &'static str {
        match self {
            Self::Lock => "locked",
            Self::Unlock => "unlocked",
        }
    }
}

impl fmt::Display for ActuatorAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActuatorAction {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "lock" => Ok(Self::Lock),
            "unlock" => Ok(Self::Unlock),
            other => Err(format!("unknown actuator action '{other}'")),
        }
    }
}

pub fn lock_label(locked: bool) -> &'static str {
    if locked {
        "locked"
    } else {
        "unlocked"
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub command_id: CommandId,
    pub device_id: DeviceId,
    pub action: ActuatorAction,
    pub issued_at: DateTime<Utc>,
    pub actor: String,
}

impl Command {
    pub fn issue(
        device_id: DeviceId,
        action: ActuatorAction,
        actor: impl Into<String>,
        issued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            command_id: CommandId::generate(),
            device_id,
            action,
            issued_at,
            actor: actor.into(),
        }
    }
}

/// Last authoritative knowledge about a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub device_id: DeviceId,
    pub canonical_locked: bool,
    pub online: bool,
    pub last_confirmed_at: Option<DateTime<Utc>>,
}

impl Device {
    pub fn new(device_id: DeviceId, canonical_locked: bool, online: bool) -> Self {
        Self {
            device_id,
            canonical_locked,
            online,
            last_confirmed_at: None,
        }
    }
}

/// Normalized result of one status read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub locked: bool,
    pub online: bool,
    pub battery: f64,
    pub signal: f64,
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerPhase {
    Idle,
    Dispatching,
    AwaitingConfirmation,
    Confirmed,
    ConfirmedLate,
    Unconfirmed,
    Failed,
}

impl ControllerPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::ConfirmedLate | Self::Unconfirmed | Self::Failed
        )
    }

    /// Terminal phases after which the canonical device state may be rewritten.
    pub fn is_confirmation(self) -> bool {
        matches!(self, Self::Confirmed | Self::ConfirmedLate)
    }
}

impl fmt::Display for ControllerPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Dispatching => "dispatching",
            Self::AwaitingConfirmation => "awaiting_confirmation",
            Self::Confirmed => "confirmed",
            Self::ConfirmedLate => "confirmed_late",
            Self::Unconfirmed => "unconfirmed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}
