//! Device data model: types, typed configuration, pin bindings, push
//! callbacks and the displayed values of each device.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::HubError;
use crate::pins::{Level, PinId, PinMode};

pub const MAX_DEVICE_PINS: usize = 2;
pub const MAX_DEVICE_VALUES: usize = 2;

/// Poll interval marking a device that is driven by commands only.
pub const POLL_NEVER: i32 = -1;

pub const CALLBACK_HOST_CAPACITY: usize = 15;
pub const CALLBACK_PATH_CAPACITY: usize = 127;
pub const CALLBACK_AUTH_CAPACITY: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Button,
    Dht22,
    #[serde(rename = "GENERIC_ANALOG")]
    GenericAnalogInput,
    #[serde(rename = "GENERIC_DIGITAL")]
    GenericDigitalInput,
    Motion,
    Relay,
    Switch,
    TempDallas,
}

pub const ALL_DEVICE_TYPES: [DeviceType; 8] = [
    DeviceType::Button,
    DeviceType::Dht22,
    DeviceType::GenericAnalogInput,
    DeviceType::GenericDigitalInput,
    DeviceType::Motion,
    DeviceType::Relay,
    DeviceType::Switch,
    DeviceType::TempDallas,
];

impl DeviceType {
    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Button => "BUTTON",
            DeviceType::Dht22 => "DHT22",
            DeviceType::GenericAnalogInput => "GENERIC_ANALOG",
            DeviceType::GenericDigitalInput => "GENERIC_DIGITAL",
            DeviceType::Motion => "MOTION",
            DeviceType::Relay => "RELAY",
            DeviceType::Switch => "SWITCH",
            DeviceType::TempDallas => "TEMP_DALLAS",
        }
    }

    /// Names and units of the values this type displays, in order.
    pub fn value_specs(self) -> &'static [(&'static str, &'static str)] {
        match self {
            DeviceType::Button | DeviceType::Motion | DeviceType::Relay | DeviceType::Switch => {
                &[("state", "on/off")]
            }
            DeviceType::Dht22 => &[("temp", "C"), ("humid", "%")],
            DeviceType::GenericAnalogInput => &[("value", "conf(min)-conf(max)")],
            DeviceType::GenericDigitalInput => &[("value", "0/1")],
            DeviceType::TempDallas => &[("temp", "C")],
        }
    }

    pub fn default_poll_interval_ms(self) -> i32 {
        match self {
            DeviceType::Button | DeviceType::Switch | DeviceType::Motion => 0,
            DeviceType::GenericAnalogInput | DeviceType::GenericDigitalInput => 1000,
            DeviceType::Dht22 => 2000,
            DeviceType::TempDallas => 1000,
            DeviceType::Relay => POLL_NEVER,
        }
    }

    pub fn default_pin_mode(self) -> PinMode {
        match self {
            DeviceType::Relay => PinMode::Output,
            DeviceType::Button | DeviceType::Switch => PinMode::InputPullup,
            _ => PinMode::Input,
        }
    }

    pub fn required_pins(self) -> usize {
        1
    }

    pub fn is_output(self) -> bool {
        self == DeviceType::Relay
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ALL_DEVICE_TYPES
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| HubError::UnknownDeviceType(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AnalogConfig {
    pub min: f32,
    pub max: f32,
    pub read_count: u8,
    pub read_delay_ms: u32,
    pub remove_min_max: bool,
}

impl Default for AnalogConfig {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1023.0,
            read_count: 1,
            read_delay_ms: 0,
            remove_min_max: false,
        }
    }
}

/// Per-type configuration. The variant is fixed by the device type.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum DeviceConfig {
    Debounced { bounce: u32 },
    Dht22 { temp_adj: f32, humid_adj: f32 },
    Analog(AnalogConfig),
    Digital {},
    Relay {
        #[serde(serialize_with = "serialize_trigger")]
        trigger: Level,
    },
    Dallas { temp_adj: f32 },
}

fn serialize_trigger<S: serde::Serializer>(level: &Level, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(if level.is_high() { "HIGH" } else { "LOW" })
}

impl DeviceConfig {
    pub fn defaults_for(device_type: DeviceType) -> Self {
        match device_type {
            DeviceType::Button | DeviceType::Switch => DeviceConfig::Debounced { bounce: 20 },
            DeviceType::Motion => DeviceConfig::Debounced { bounce: 5 },
            DeviceType::Dht22 => DeviceConfig::Dht22 {
                temp_adj: 0.0,
                humid_adj: 0.0,
            },
            DeviceType::GenericAnalogInput => DeviceConfig::Analog(AnalogConfig::default()),
            DeviceType::GenericDigitalInput => DeviceConfig::Digital {},
            DeviceType::Relay => DeviceConfig::Relay {
                trigger: Level::High,
            },
            DeviceType::TempDallas => DeviceConfig::Dallas { temp_adj: 0.0 },
        }
    }

    pub fn matches(&self, device_type: DeviceType) -> bool {
        matches!(
            (self, device_type),
            (
                DeviceConfig::Debounced { .. },
                DeviceType::Button | DeviceType::Switch | DeviceType::Motion
            ) | (DeviceConfig::Dht22 { .. }, DeviceType::Dht22)
                | (DeviceConfig::Analog(_), DeviceType::GenericAnalogInput)
                | (DeviceConfig::Digital {}, DeviceType::GenericDigitalInput)
                | (DeviceConfig::Relay { .. }, DeviceType::Relay)
                | (DeviceConfig::Dallas { .. }, DeviceType::TempDallas)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DevicePin {
    pub pin: PinId,
    pub mode: PinMode,
}

/// Cuts `text` to at most `capacity` bytes without splitting a character.
pub fn truncate_to(text: &str, capacity: usize) -> String {
    if text.len() <= capacity {
        return text.to_string();
    }
    let mut end = capacity;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Destination of a push notification. Host, path and auth are bounded and
/// silently truncated at capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callback {
    host: String,
    port: u16,
    path: String,
    auth: String,
}

impl Callback {
    pub fn new(host: &str, port: u16, path: &str, auth: &str) -> Self {
        Self {
            host: truncate_to(host, CALLBACK_HOST_CAPACITY),
            port,
            path: truncate_to(path, CALLBACK_PATH_CAPACITY),
            auth: truncate_to(auth, CALLBACK_AUTH_CAPACITY),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn auth(&self) -> &str {
        &self.auth
    }

    pub fn set_auth(&mut self, auth: &str) {
        self.auth = truncate_to(auth, CALLBACK_AUTH_CAPACITY);
    }
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.host, self.port, self.path)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: usize,
    pub active: bool,
    pub device_type: DeviceType,
    pub poll_interval_ms: i32,
    pub pins: Vec<DevicePin>,
    pub config: DeviceConfig,
    pub callback: Option<Callback>,
}

impl Device {
    pub fn new(id: usize, device_type: DeviceType) -> Self {
        Self {
            id,
            active: true,
            device_type,
            poll_interval_ms: device_type.default_poll_interval_ms(),
            pins: Vec::with_capacity(MAX_DEVICE_PINS),
            config: DeviceConfig::defaults_for(device_type),
            callback: None,
        }
    }

    pub fn primary_pin(&self) -> Option<DevicePin> {
        self.pins.first().copied()
    }

    /// Whether the scheduler should call this device at `now_ms`.
    pub fn is_due(&self, last_poll_ms: Option<u64>, now_ms: u64) -> bool {
        if !self.active || self.poll_interval_ms < 0 {
            return false;
        }
        match last_poll_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.poll_interval_ms as u64,
        }
    }
}

/// Displayed values of one device: parallel names, units and current text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceValues {
    pub names: Vec<&'static str>,
    pub units: Vec<&'static str>,
    pub values: Vec<String>,
}

impl DeviceValues {
    pub fn for_type(device_type: DeviceType) -> Self {
        let specs = device_type.value_specs();
        Self {
            names: specs.iter().map(|(n, _)| *n).collect(),
            units: specs.iter().map(|(_, u)| *u).collect(),
            values: vec![String::new(); specs.len()],
        }
    }

    pub fn count(&self) -> usize {
        self.values.len()
    }

    pub fn get(&self, index: usize) -> &str {
        self.values.get(index).map(String::as_str).unwrap_or("")
    }

    pub fn set(&mut self, index: usize, value: impl Into<String>) {
        if let Some(slot) = self.values.get_mut(index) {
            *slot = value.into();
        }
    }

    pub fn name(&self, index: usize) -> &'static str {
        self.names.get(index).copied().unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_strings_round_trip() {
        for t in ALL_DEVICE_TYPES {
            assert_eq!(t.as_str().parse::<DeviceType>().unwrap(), t);
        }
        assert!(matches!(
            "LAMP".parse::<DeviceType>(),
            Err(HubError::UnknownDeviceType(_))
        ));
    }

    #[test]
    fn value_layout_is_fixed_by_type() {
        let dht = DeviceValues::for_type(DeviceType::Dht22);
        assert_eq!(dht.count(), 2);
        assert_eq!(dht.names, vec!["temp", "humid"]);
        assert_eq!(dht.units, vec!["C", "%"]);
        assert_eq!(DeviceValues::for_type(DeviceType::Relay).count(), 1);
    }

    #[test]
    fn default_configs_match_their_type() {
        for t in ALL_DEVICE_TYPES {
            assert!(DeviceConfig::defaults_for(t).matches(t), "{t}");
        }
        assert!(!DeviceConfig::Digital {}.matches(DeviceType::Relay));
    }

    #[test]
    fn callback_fields_truncate_at_capacity() {
        let cb = Callback::new("a-very-long-hostname.local", 80, "/x", "");
        assert_eq!(cb.host().len(), CALLBACK_HOST_CAPACITY);
        assert_eq!(cb.host(), "a-very-long-hos");
        assert_eq!(cb.to_string(), "a-very-long-hos:80/x");
    }

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_to("aéb", 2), "a");
        assert_eq!(truncate_to("abc", 10), "abc");
    }

    #[test]
    fn relay_is_never_due() {
        let dev = Device::new(0, DeviceType::Relay);
        assert!(!dev.is_due(None, 10_000));
    }

    #[test]
    fn due_after_interval_elapses() {
        let dev = Device::new(0, DeviceType::GenericDigitalInput);
        assert!(dev.is_due(None, 0));
        assert!(!dev.is_due(Some(500), 1499));
        assert!(dev.is_due(Some(500), 1500));
    }

    #[test]
    fn inactive_device_is_never_due() {
        let mut dev = Device::new(0, DeviceType::Button);
        dev.active = false;
        assert!(!dev.is_due(None, 0));
    }
}
