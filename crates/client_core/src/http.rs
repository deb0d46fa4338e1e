//! reqwest binding of the device command and status APIs.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use shared::{
    domain::{Command, DeviceId, DeviceStatus},
    error::ApiError,
    protocol::{CommandAck, DeviceStatusResponse, IssueCommandRequest, IssueCommandResponse},
};
use tracing::debug;
use url::Url;

use crate::{DeviceCommandClient, DeviceStatusClient};

#[derive(Debug, Clone)]
pub struct HttpDeviceApi {
    http: Client,
    base_url: Url,
}

impl HttpDeviceApi {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url.trim())
            .with_context(|| format!("invalid device api base url '{base_url}'"))?;
        if base_url.cannot_be_a_base() {
            bail!("device api base url '{base_url}' cannot carry a path");
        }
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn device_url(&self, device_id: &DeviceId, leaf: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("device api base url cannot carry a path"))?
            .pop_if_empty()
            .extend(["devices", device_id.as_str(), leaf]);
        Ok(url)
    }
}

fn rejection_reason(body: &[u8]) -> String {
    if let Ok(response) = serde_json::from_slice::<IssueCommandResponse>(body) {
        if let Some(reason) = response.error.filter(|reason| !reason.trim().is_empty()) {
            return reason;
        }
    }
    if let Ok(error) = serde_json::from_slice::<ApiError>(body) {
        return error.message;
    }
    let text = String::from_utf8_lossy(body).trim().to_string();
    if text.is_empty() {
        "command rejected by device service".to_string()
    } else {
        text
    }
}

#[async_trait]
impl DeviceCommandClient for HttpDeviceApi {
    async fn issue_command(&self, command: &Command) -> Result<CommandAck> {
        let url = self.device_url(&command.device_id, "commands")?;
        let res = self
            .http
            .post(url)
            .json(&IssueCommandRequest {
                command_id: command.command_id,
                action: command.action,
                actor: command.actor.clone(),
            })
            .send()
            .await
            .with_context(|| {
                format!(
                    "failed to reach command api for device {}",
                    command.device_id
                )
            })?;

        let status = res.status();
        if status.is_server_error() {
            bail!(
                "command api returned {status} for device {}",
                command.device_id
            );
        }
        let body = res
            .bytes()
            .await
            .context("failed to read command api response")?;

        if status.is_client_error() {
            let reason = rejection_reason(&body);
            debug!(device_id = %command.device_id, %status, %reason, "http: command rejected");
            return Ok(CommandAck::Rejected { reason });
        }

        let response: IssueCommandResponse =
            serde_json::from_slice(&body).context("malformed command api response")?;
        Ok(response.into_ack()?)
    }
}

#[async_trait]
impl DeviceStatusClient for HttpDeviceApi {
    async fn get_status(&self, device_id: &DeviceId) -> Result<DeviceStatus> {
        let url = self.device_url(device_id, "status")?;
        let response: DeviceStatusResponse = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to reach status api for device {device_id}"))?
            .error_for_status()?
            .json()
            .await
            .context("malformed status api response")?;
        Ok(response.into_status()?)
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
