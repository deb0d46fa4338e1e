use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{ActuatorAction, CommandId, DeviceStatus},
    error::ProtocolError,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueCommandRequest {
    pub command_id: CommandId,
    pub action: ActuatorAction,
    pub actor: String,
}

/// Raw acknowledgment from the command API. Different firmware generations report
/// either a boolean `accepted` or a free-form `status` string.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IssueCommandResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accepted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandAck {
    Accepted { flow_id: String },
    Rejected { reason: String },
}

impl IssueCommandResponse {
    pub fn accepted(flow_id: impl Into<String>) -> Self {
        Self {
            accepted: Some(true),
            flow_id: Some(flow_id.into()),
            ..Self::default()
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: Some(false),
            error: Some(reason.into()),
            ..Self::default()
        }
    }

    /// Collapses the response into the closed acknowledgment set. An explicit
    /// `accepted` flag wins over the status string.
    pub fn into_ack(self) -> Result<CommandAck, ProtocolError> {
        let accepted = match (self.accepted, self.status.as_deref()) {
            (Some(flag), _) => flag,
            (None, Some(raw)) => normalize_ack_status(raw)?,
            (None, None) => return Err(ProtocolError::MissingCommandStatus),
        };

        if accepted {
            Ok(CommandAck::Accepted {
                flow_id: self.flow_id.unwrap_or_default(),
            })
        } else {
            Ok(CommandAck::Rejected {
                reason: self
                    .error
                    .filter(|reason| !reason.trim().is_empty())
                    .unwrap_or_else(|| "command rejected by device service".to_string()),
            })
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceStatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_state: Option<String>,
    pub online: bool,
    #[serde(default)]
    pub battery: f64,
    #[serde(default)]
    pub signal: f64,
    pub last_update: DateTime<Utc>,
}

impl DeviceStatusResponse {
    pub fn into_status(self) -> Result<DeviceStatus, ProtocolError> {
        let locked = match (self.locked, self.lock_state.as_deref()) {
            (Some(locked), _) => locked,
            (None, Some(raw)) => normalize_lock_state(raw)?,
            (None, None) => return Err(ProtocolError::MissingLockState),
        };

        Ok(DeviceStatus {
            locked,
            online: self.online,
            battery: self.battery,
            signal: self.signal,
            last_update: self.last_update,
        })
    }
}

pub fn normalize_lock_state(raw: &str) -> Result<bool, ProtocolError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "locked" | "secured" | "closed" | "engaged" => Ok(true),
        "unlocked" | "open" | "released" | "disengaged" => Ok(false),
        _ => Err(ProtocolError::UnknownLockState(raw.to_string())),
    }
}

pub fn normalize_ack_status(raw: &str) -> Result<bool, ProtocolError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "accepted" | "queued" | "pending" | "success" | "completed" | "done" | "ok" => Ok(true),
        "rejected" | "failed" | "error" | "denied" => Ok(false),
        _ => Err(ProtocolError::UnknownCommandStatus(raw.to_string())),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Success,
    Error,
}

/// Message handed to the UI notification surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiNotification {
    pub kind: NotificationKind,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub device_id: crate::domain::DeviceId,
    pub online: bool,
    pub lock_state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetOnlineRequest {
    pub online: bool,
}
