use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    Validation,
    Internal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Raised when a device API answers with a value outside the closed set the
/// controller understands.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("unrecognized lock state '{0}'")]
    UnknownLockState(String),
    #[error("unrecognized command status '{0}'")]
    UnknownCommandStatus(String),
    #[error("status response carries neither `locked` nor `lock_state`")]
    MissingLockState,
    #[error("command response carries neither `accepted` nor `status`")]
    MissingCommandStatus,
}
