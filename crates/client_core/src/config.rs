use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::{controller::CancelMode, poller::BackoffPolicy};

pub const DEFAULT_SETTINGS_FILE: &str = "actuation.toml";
pub const MAX_ATTEMPTS_LIMIT: u32 = 50;
/// Upper bound for `initial_wait_secs` and `increment_secs`.
pub const MAX_WAIT_SECS: u64 = 3_600;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSettings {
    pub api_base_url: String,
    pub max_attempts: u32,
    pub initial_wait_secs: u64,
    pub increment_secs: u64,
    pub require_online: bool,
    pub cancel_mode: CancelMode,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            api_base_url: "http://127.0.0.1:8787".into(),
            max_attempts: 5,
            initial_wait_secs: 5,
            increment_secs: 5,
            require_online: false,
            cancel_mode: CancelMode::DetachUi,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    api_base_url: Option<String>,
    max_attempts: Option<u32>,
    initial_wait_secs: Option<u64>,
    increment_secs: Option<u64>,
    require_online: Option<bool>,
    cancel_mode: Option<CancelMode>,
}

impl ControllerSettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_attempts,
            initial_wait: Duration::from_secs(self.initial_wait_secs),
            increment: Duration::from_secs(self.increment_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            bail!("max_attempts must be at least 1");
        }
        if self.increment_secs == 0 && self.max_attempts > 1 {
            bail!("increment_secs must be positive so waits keep growing");
        }
        if self.max_attempts > MAX_ATTEMPTS_LIMIT {
            bail!("max_attempts must be at most {MAX_ATTEMPTS_LIMIT}");
        }
        if self.initial_wait_secs > MAX_WAIT_SECS {
            bail!("initial_wait_secs must be at most {MAX_WAIT_SECS}");
        }
        if self.increment_secs > MAX_WAIT_SECS {
            bail!("increment_secs must be at most {MAX_WAIT_SECS}");
        }
        if self.api_base_url.trim().is_empty() {
            bail!("api_base_url must not be empty");
        }
        Ok(())
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.api_base_url {
            self.api_base_url = v;
        }
        if let Some(v) = file.max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = file.initial_wait_secs {
            self.initial_wait_secs = v;
        }
        if let Some(v) = file.increment_secs {
            self.increment_secs = v;
        }
        if let Some(v) = file.require_online {
            self.require_online = v;
        }
        if let Some(v) = file.cancel_mode {
            self.cancel_mode = v;
        }
    }

    /// Applies `APP__*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("APP__API_BASE_URL") {
            self.api_base_url = v;
        }
        if let Some(v) = lookup("APP__MAX_ATTEMPTS") {
            self.max_attempts = v
                .trim()
                .parse()
                .with_context(|| format!("APP__MAX_ATTEMPTS is not a number: '{v}'"))?;
        }
        if let Some(v) = lookup("APP__INITIAL_WAIT_SECS") {
            self.initial_wait_secs = v
                .trim()
                .parse()
                .with_context(|| format!("APP__INITIAL_WAIT_SECS is not a number: '{v}'"))?;
        }
        if let Some(v) = lookup("APP__INCREMENT_SECS") {
            self.increment_secs = v
                .trim()
                .parse()
                .with_context(|| format!("APP__INCREMENT_SECS is not a number: '{v}'"))?;
        }
        if let Some(v) = lookup("APP__REQUIRE_ONLINE") {
            self.require_online = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        if let Some(v) = lookup("APP__CANCEL_MODE") {
            self.cancel_mode = v.parse()?;
        }
        Ok(())
    }
}

pub fn parse_settings(raw: &str) -> Result<ControllerSettings> {
    let file: FileSettings = toml::from_str(raw).context("invalid controller settings file")?;
    let mut settings = ControllerSettings::default();
    settings.apply_file(file);
    Ok(settings)
}

/// Reads `path` when it exists, then environment overrides, then validates.
pub fn load_settings_from(path: &Path) -> Result<ControllerSettings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => parse_settings(&raw)
            .with_context(|| format!("failed to parse '{}'", path.display()))?,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
            ControllerSettings::default()
        }
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    settings.apply_env(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

pub fn load_settings() -> Result<ControllerSettings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
