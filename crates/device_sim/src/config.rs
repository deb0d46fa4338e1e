use std::{fs, path::Path, time::Duration};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::sim::MAX_ACTUATION_LAG;

pub const DEFAULT_SETTINGS_FILE: &str = "device_sim.toml";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: String,
    /// Time between an accepted command and the device reporting the new state.
    pub actuation_lag_ms: u64,
    pub devices: Vec<String>,
    pub offline_devices: Vec<String>,
    pub reject_offline: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8787".into(),
            actuation_lag_ms: 7_000,
            devices: vec!["front-door".into(), "garage".into(), "back-gate".into()],
            offline_devices: Vec::new(),
            reject_offline: true,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    actuation_lag_ms: Option<u64>,
    devices: Option<Vec<String>>,
    offline_devices: Option<Vec<String>>,
    reject_offline: Option<bool>,
}

impl Settings {
    pub fn actuation_lag(&self) -> Duration {
        Duration::from_millis(self.actuation_lag_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.actuation_lag() > MAX_ACTUATION_LAG {
            bail!(
                "actuation_lag_ms must be at most {}",
                MAX_ACTUATION_LAG.as_millis()
            );
        }
        if self.devices.is_empty() {
            bail!("at least one simulated device is required");
        }
        Ok(())
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.bind_addr {
            self.bind_addr = v;
        }
        if let Some(v) = file.actuation_lag_ms {
            self.actuation_lag_ms = v;
        }
        if let Some(v) = file.devices {
            self.devices = v;
        }
        if let Some(v) = file.offline_devices {
            self.offline_devices = v;
        }
        if let Some(v) = file.reject_offline {
            self.reject_offline = v;
        }
    }

    /// Applies `SIM__*` overrides read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("SIM__BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("SIM__ACTUATION_LAG_MS") {
            self.actuation_lag_ms = v
                .trim()
                .parse()
                .with_context(|| format!("SIM__ACTUATION_LAG_MS is not a number: '{v}'"))?;
        }
        if let Some(v) = lookup("SIM__DEVICES") {
            self.devices = split_list(&v);
        }
        if let Some(v) = lookup("SIM__OFFLINE_DEVICES") {
            self.offline_devices = split_list(&v);
        }
        if let Some(v) = lookup("SIM__REJECT_OFFLINE") {
            self.reject_offline = matches!(
                v.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn parse_settings(raw: &str) -> Result<Settings> {
    let file: FileSettings = toml::from_str(raw).context("invalid simulator settings file")?;
    let mut settings = Settings::default();
    settings.apply_file(file);
    Ok(settings)
}

pub fn load_settings_from(path: &Path) -> Result<Settings> {
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => parse_settings(&raw)
            .with_context(|| format!("failed to parse '{}'", path.display()))?,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Settings::default(),
        Err(error) => {
            return Err(error).with_context(|| format!("failed to read '{}'", path.display()))
        }
    };
    settings.apply_env(|key| std::env::var(key).ok())?;
    settings.validate()?;
    Ok(settings)
}

pub fn load_settings() -> Result<Settings> {
    load_settings_from(Path::new(DEFAULT_SETTINGS_FILE))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
