use std::{fs, path::Path};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::HubError;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Pause between two scheduler passes.
    pub tick_ms: u64,
    /// A single device poll taking longer than this is counted as slow.
    pub slow_poll_ms: u64,
    pub max_devices: usize,
    pub digital_pins: usize,
    pub analog_pins: usize,
    pub event_history_capacity: usize,
    pub broadcast_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            slow_poll_ms: 100,
            max_devices: 10,
            digital_pins: 13,
            analog_pins: 8,
            event_history_capacity: 32,
            broadcast_capacity: 64,
        }
    }
}

/// libgpiod line backing one digital pin id such as `D13`.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LineConfig {
    pub chip: String,
    pub line: u32,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct SensorsConfig {
    /// Pin id to IIO device directory exposing `in_temp_input` and
    /// `in_humidityrelative_input`.
    pub dht22: FxHashMap<String, String>,
    /// Pin id to w1 slave `temperature` file.
    pub dallas: FxHashMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub gpios: FxHashMap<String, LineConfig>,
    /// Analog pin id to IIO `in_voltageN_raw` file.
    #[serde(default)]
    pub analog: FxHashMap<String, String>,
    #[serde(default)]
    pub sensors: SensorsConfig,
    pub restore_from: Option<String>,
    pub interface: Option<String>,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, HubError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| HubError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, HubError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| HubError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), HubError> {
        if self.runtime.max_devices == 0 {
            return Err(HubError::Config("runtime.max_devices must be positive".into()));
        }
        if self.runtime.broadcast_capacity == 0 {
            return Err(HubError::Config(
                "runtime.broadcast_capacity must be positive".into(),
            ));
        }
        if self.http.unix_socket.is_none() && self.http.host.is_none() {
            return Err(HubError::Config(
                "either 'unix_socket' or 'host' must be specified".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_defaults_apply_when_section_missing() {
        let cfg = AppConfig::from_json(
            r#"{ "http": { "host": "127.0.0.1:8080", "path": "/api", "timeout": 30 } }"#,
        )
        .expect("valid config");
        assert_eq!(cfg.runtime.digital_pins, 13);
        assert_eq!(cfg.runtime.analog_pins, 8);
        assert_eq!(cfg.runtime.max_devices, 10);
        assert!(cfg.gpios.is_empty());
        assert!(cfg.restore_from.is_none());
    }

    #[test]
    fn rejects_config_without_listener() {
        let err = AppConfig::from_json(r#"{ "http": { "path": "/api", "timeout": 30 } }"#)
            .expect_err("no listener");
        assert!(matches!(err, HubError::Config(_)));
    }
}
