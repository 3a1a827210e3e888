//! TOML config file loading, environment overrides and validation.
//!
//! Every key has a default, so an empty (or absent) file yields a working
//! simulated node talking to a local broker.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::adc::ADC_MAX;
use crate::session::SessionTiming;
use crate::transport::MqttSettings;

/// Used when `CONFIG_PATH` is unset; allowed to be missing.
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Topic prefix, e.g. `anasanchez/diesel`.
    pub namespace: String,
    pub mqtt: MqttSection,
    pub timing: TimingSection,
    pub storage: StorageSection,
    pub sensor: SensorSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_sec: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub sample_interval_ms: u64,
    pub reconnect_interval_ms: u64,
    pub connect_timeout_ms: u64,
    pub loop_period_ms: u64,
    pub time_sync_poll_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub path: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorSource {
    Sim,
    Iio,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub source: SensorSource,
    pub iio_path: String,
    pub sim: SimSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimSection {
    pub empty_raw: u16,
    pub full_raw: u16,
    pub consumption_per_sample: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "anasanchez/diesel".into(),
            mqtt: MqttSection::default(),
            timing: TimingSection::default(),
            storage: StorageSection::default(),
            sensor: SensorSection::default(),
        }
    }
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 1883,
            client_id: "diesel-level".into(),
            username: None,
            password: None,
            keep_alive_sec: 15,
        }
    }
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            sample_interval_ms: 500,
            reconnect_interval_ms: 5000,
            connect_timeout_ms: 5000,
            loop_period_ms: 10,
            time_sync_poll_ms: 500,
        }
    }
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: "calibration.bin".into(),
        }
    }
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            source: SensorSource::Sim,
            iio_path: "/sys/bus/iio/devices/iio:device0/in_voltage0_raw".into(),
            sim: SimSection::default(),
        }
    }
}

impl Default for SimSection {
    fn default() -> Self {
        Self {
            empty_raw: 300,
            full_raw: 800,
            consumption_per_sample: 0.0005,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived settings
// ---------------------------------------------------------------------------

impl Config {
    pub fn mqtt_settings(&self) -> MqttSettings {
        let credentials = self
            .mqtt
            .username
            .as_ref()
            .map(|user| (user.clone(), self.mqtt.password.clone().unwrap_or_default()));
        MqttSettings {
            host: self.mqtt.host.clone(),
            port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            credentials,
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_sec),
        }
    }

    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            retry_interval_ms: self.timing.reconnect_interval_ms,
            connect_timeout_ms: self.timing.connect_timeout_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Environment overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Apply `MQTT_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("MQTT_HOST") {
            self.mqtt.host = host;
        }
        if let Some(port) = lookup("MQTT_PORT") {
            self.mqtt.port = port
                .trim()
                .parse()
                .with_context(|| format!("invalid MQTT_PORT: {port:?}"))?;
        }
        if let Some(id) = lookup("MQTT_CLIENT_ID") {
            self.mqtt.client_id = id;
        }
        if let Some(user) = lookup("MQTT_USERNAME") {
            self.mqtt.username = Some(user);
        }
        if let Some(pass) = lookup("MQTT_PASSWORD") {
            self.mqtt.password = Some(pass);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate every section. Returns `Ok(())` or an error describing every
    /// violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_namespace(&mut errors);
        self.validate_mqtt(&mut errors);
        self.validate_timing(&mut errors);
        self.validate_sensor(&mut errors);

        if self.storage.path.trim().is_empty() {
            errors.push("storage.path is empty".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_namespace(&self, errors: &mut Vec<String>) {
        let ns = &self.namespace;
        if ns.trim().is_empty() {
            errors.push("namespace is empty".into());
            return;
        }
        if ns.contains(['+', '#']) {
            errors.push(format!("namespace {ns:?} must not contain MQTT wildcards"));
        }
        if ns.starts_with('/') || ns.ends_with('/') {
            errors.push(format!("namespace {ns:?} must not start or end with '/'"));
        }
    }

    fn validate_mqtt(&self, errors: &mut Vec<String>) {
        let m = &self.mqtt;
        if m.host.trim().is_empty() {
            errors.push("mqtt.host is empty".into());
        }
        if m.port == 0 {
            errors.push("mqtt.port must be non-zero".into());
        }
        if m.client_id.trim().is_empty() {
            errors.push("mqtt.client_id is empty".into());
        }
        if m.password.is_some() && m.username.is_none() {
            errors.push("mqtt.password is set but mqtt.username is not".into());
        }
        if m.keep_alive_sec == 0 {
            errors.push("mqtt.keep_alive_sec must be positive".into());
        }
    }

    fn validate_timing(&self, errors: &mut Vec<String>) {
        let t = &self.timing;
        for (name, value) in [
            ("sample_interval_ms", t.sample_interval_ms),
            ("reconnect_interval_ms", t.reconnect_interval_ms),
            ("connect_timeout_ms", t.connect_timeout_ms),
            ("loop_period_ms", t.loop_period_ms),
            ("time_sync_poll_ms", t.time_sync_poll_ms),
        ] {
            if value == 0 {
                errors.push(format!("timing.{name} must be positive"));
            }
        }
        if t.loop_period_ms > 0 && t.loop_period_ms > t.sample_interval_ms {
            errors.push(format!(
                "timing.loop_period_ms ({}) exceeds sample_interval_ms ({})",
                t.loop_period_ms, t.sample_interval_ms
            ));
        }
    }

    fn validate_sensor(&self, errors: &mut Vec<String>) {
        let s = &self.sensor;
        match s.source {
            SensorSource::Iio => {
                if s.iio_path.trim().is_empty() {
                    errors.push("sensor.iio_path is empty (required for source = \"iio\")".into());
                }
            }
            SensorSource::Sim => {
                if !cfg!(feature = "sim") {
                    errors.push("sensor.source = \"sim\" but built without the `sim` feature".into());
                }
                let sim = &s.sim;
                for (name, value) in [("empty_raw", sim.empty_raw), ("full_raw", sim.full_raw)] {
                    if value > ADC_MAX {
                        errors.push(format!(
                            "sensor.sim.{name} {value} out of ADC range [0, {ADC_MAX}]"
                        ));
                    }
                }
                if sim.empty_raw == sim.full_raw {
                    errors.push(format!(
                        "sensor.sim.empty_raw and full_raw are both {}; range is zero",
                        sim.empty_raw
                    ));
                }
                if !(0.0..=1.0).contains(&sim.consumption_per_sample) {
                    errors.push(format!(
                        "sensor.sim.consumption_per_sample {} out of range [0.0, 1.0]",
                        sim.consumption_per_sample
                    ));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Build a config from TOML text (`None` means no file, all defaults), apply
/// env overrides through `lookup`, then validate the result.
pub fn from_sources<F>(contents: Option<&str>, lookup: F) -> Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = match contents {
        Some(text) => toml::from_str(text).context("failed to parse config")?,
        None => Config::default(),
    };
    config.apply_env(lookup)?;
    config.validate()?;
    Ok(config)
}

/// Read the config named by `CONFIG_PATH` (or `config.toml`), apply env
/// overrides and validate.
///
/// A missing default file means "all defaults"; a missing file that was
/// named explicitly is an error.
pub fn load_from_env() -> Result<Config> {
    let explicit = env::var("CONFIG_PATH").ok();
    let path = explicit.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);

    let contents = if explicit.is_none() && !Path::new(path).exists() {
        info!(path, "no config file, using defaults");
        None
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {path}"))?;
        Some(text)
    };

    from_sources(contents.as_deref(), |key| env::var(key).ok())
        .with_context(|| format!("invalid config: {path}"))
}

// ===========================================================================
// Tests
// ===========================================================================
