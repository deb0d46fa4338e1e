use std::collections::HashMap;

use super::*;

#[test]
fn defaults_cover_a_small_fleet() {
    let settings = Settings::default();
    assert_eq!(settings.bind_addr, "127.0.0.1:8787");
    assert_eq!(settings.actuation_lag(), Duration::from_secs(7));
    assert_eq!(settings.devices.len(), 3);
    assert!(settings.reject_offline);
}

#[test]
fn file_values_override_defaults() {
    let settings = parse_settings(
        r#"
        bind_addr = "0.0.0.0:9000"
        actuation_lag_ms = 250
        devices = ["valve-1", "valve-2"]
        offline_devices = ["valve-2"]
        "#,
    )
    .expect("settings");

    assert_eq!(settings.bind_addr, "0.0.0.0:9000");
    assert_eq!(settings.actuation_lag_ms, 250);
    assert_eq!(settings.devices, vec!["valve-1", "valve-2"]);
    assert_eq!(settings.offline_devices, vec!["valve-2"]);
    assert!(settings.reject_offline);
}

#[test]
fn env_overrides_split_device_lists() {
    let env: HashMap<&str, &str> = HashMap::from([
        ("SIM__DEVICES", " a , b,,c "),
        ("SIM__REJECT_OFFLINE", "off"),
        ("SIM__ACTUATION_LAG_MS", "0"),
    ]);
    let mut settings = Settings::default();
    settings
        .apply_env(|key: &str| env.get(key).map(|v| v.to_string()))
        .expect("env");

    assert_eq!(settings.devices, vec!["a", "b", "c"]);
    assert!(!settings.reject_offline);
    assert_eq!(settings.actuation_lag(), Duration::ZERO);
}

#[test]
fn malformed_lag_is_an_error() {
    let mut settings = Settings::default();
    let err = settings
        .apply_env(|key: &str| (key == "SIM__ACTUATION_LAG_MS").then(|| "soon".to_string()))
        .expect_err("must fail");
    assert!(err.to_string().contains("SIM__ACTUATION_LAG_MS"));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let path = std::env::temp_dir().join("device_sim_settings_that_do_not_exist.toml");
    let settings = load_settings_from(&path).expect("defaults");
    assert_eq!(settings.devices, Settings::default().devices);
}

#[test]
fn oversized_lag_is_rejected() {
    let settings = Settings {
        actuation_lag_ms: u64::MAX,
        ..Settings::default()
    };
    let err = settings.validate().expect_err("must fail");
    assert!(err.to_string().contains("actuation_lag_ms"));

    let at_limit = Settings {
        actuation_lag_ms: MAX_ACTUATION_LAG.as_millis() as u64,
        ..Settings::default()
    };
    at_limit.validate().expect("limit is inclusive");
    Settings::default().validate().expect("defaults are valid");
}

#[test]
fn empty_fleet_is_rejected() {
    let settings = Settings {
        devices: Vec::new(),
        ..Settings::default()
    };
    assert!(settings.validate().is_err());
}
