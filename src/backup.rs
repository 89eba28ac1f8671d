//! Configuration snapshot: server settings plus every device record.
//!
//! ```text
//! {"server":{"ssid":"..","pass":"<obf>","serverauth":"<obf>","callback":"host:port/path","callbackauth":"<obf>"},
//!  "devices":[{"id":"0","active":true,"type":"BUTTON","poll":0,"callback":"..","callbackauth":"<obf>",
//!              "config":{..},"pins":{"pin1":{"pin":"D2","mode":"INPUT"}},"values":{..},"units":{..}},..]}
//! ```
//!
//! Secrets are obfuscated, not encrypted. Restoring is not transactional:
//! records are applied as they are read and a bad record stops the restore
//! with the earlier ones in place.

use log::{info, warn};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::callback::parse_stored_callback;
use crate::device::{Callback, Device, DeviceConfig, DevicePin, DeviceType, DeviceValues};
use crate::error::HubError;
use crate::hub::{DeviceSlot, Hub};
use crate::pins::{Level, PinId, PinMode};

/// Number of Unicode scalar values; the obfuscation shift wraps around it.
const SCALAR_COUNT: u32 = 0x10F800;
const SURROGATE_START: u32 = 0xD800;
const SURROGATE_LEN: u32 = 0x800;
const SHIFT: u32 = 3;

fn scalar_index(c: char) -> u32 {
    let v = c as u32;
    if v >= SURROGATE_START { v - SURROGATE_LEN } else { v }
}

fn from_scalar_index(index: u32) -> char {
    let v = if index >= SURROGATE_START {
        index + SURROGATE_LEN
    } else {
        index
    };
    char::from_u32(v).unwrap_or(char::REPLACEMENT_CHARACTER)
}

fn shift(text: &str, by: u32) -> String {
    text.chars()
        .map(|c| from_scalar_index((scalar_index(c) + by) % SCALAR_COUNT))
        .collect()
}

/// Moves every character three code points up.
pub fn obfuscate(text: &str) -> String {
    shift(text, SHIFT)
}

pub fn deobfuscate(text: &str) -> String {
    shift(text, SCALAR_COUNT - SHIFT)
}

/// Top-level backup object. Devices are written as [`DeviceRecord`]s and
/// read back as raw values, so each record is decoded on its own.
#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct BackupDocument<D> {
    server: Option<ServerRecord>,
    devices: Option<Vec<D>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServerRecord {
    ssid: String,
    pass: String,
    serverauth: String,
    callback: String,
    callbackauth: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceRecord {
    // ids are positional; the stored one is informational
    #[serde(default)]
    id: String,
    #[serde(default = "active_by_default")]
    active: bool,
    #[serde(rename = "type")]
    device_type: String,
    #[serde(default)]
    poll: Option<i32>,
    #[serde(default)]
    callback: String,
    #[serde(default)]
    callbackauth: String,
    #[serde(default)]
    config: ConfigRecord,
    pins: PinsRecord,
    #[serde(default)]
    values: NamedValues,
    #[serde(default)]
    units: NamedValues,
}

fn active_by_default() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PinsRecord {
    pin1: PinRecord,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pin2: Option<PinRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct PinRecord {
    pin: String,
    mode: String,
}

impl From<&DevicePin> for PinRecord {
    fn from(pin: &DevicePin) -> Self {
        Self {
            pin: pin.pin.to_string(),
            mode: pin.mode.as_str().to_string(),
        }
    }
}

impl PinRecord {
    fn into_pin(self) -> Result<DevicePin, HubError> {
        let pin = self
            .pin
            .parse::<PinId>()
            .map_err(|e| HubError::Restore(e.to_string()))?;
        Ok(DevicePin {
            pin,
            mode: PinMode::from_text(&self.mode),
        })
    }
}

/// `{"name": "value", ..}` written in value-slot order.
#[derive(Debug, Default)]
struct NamedValues(Vec<(String, String)>);

impl Serialize for NamedValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.0.iter().map(|(name, value)| (name, value)))
    }
}

impl<'de> Deserialize<'de> for NamedValues {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = FxHashMap::<String, String>::deserialize(deserializer)?;
        Ok(NamedValues(map.into_iter().collect()))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
enum Trigger {
    High,
    Low,
}

impl From<Level> for Trigger {
    fn from(level: Level) -> Self {
        if level.is_high() { Trigger::High } else { Trigger::Low }
    }
}

impl From<Trigger> for Level {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::High => Level::High,
            Trigger::Low => Level::Low,
        }
    }
}

/// Union of every per-type config key. Only the keys of the device type
/// are written; a key foreign to the type fails the record on restore.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    bounce: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temp_adj: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    humid_adj: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    min: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    readcnt: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    readdelay: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    removeminmax: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger: Option<Trigger>,
}

fn finite(value: f32) -> Option<f32> {
    Some(if value.is_finite() { value } else { 0.0 })
}

fn take<T>(stored: &mut Option<T>, into: &mut T) {
    if let Some(value) = stored.take() {
        *into = value;
    }
}

impl From<&DeviceConfig> for ConfigRecord {
    fn from(config: &DeviceConfig) -> Self {
        let mut record = ConfigRecord::default();
        match config {
            DeviceConfig::Debounced { bounce } => record.bounce = Some(*bounce),
            DeviceConfig::Dht22 {
                temp_adj,
                humid_adj,
            } => {
                record.temp_adj = finite(*temp_adj);
                record.humid_adj = finite(*humid_adj);
            }
            DeviceConfig::Analog(analog) => {
                record.min = finite(analog.min);
                record.max = finite(analog.max);
                record.readcnt = Some(analog.read_count);
                record.readdelay = Some(analog.read_delay_ms);
                record.removeminmax = Some(analog.remove_min_max);
            }
            DeviceConfig::Digital {} => {}
            DeviceConfig::Relay { trigger } => record.trigger = Some((*trigger).into()),
            DeviceConfig::Dallas { temp_adj } => record.temp_adj = finite(*temp_adj),
        }
        record
    }
}

impl ConfigRecord {
    fn into_config(mut self, device_type: DeviceType) -> Result<DeviceConfig, HubError> {
        let mut config = DeviceConfig::defaults_for(device_type);
        match &mut config {
            DeviceConfig::Debounced { bounce } => take(&mut self.bounce, bounce),
            DeviceConfig::Dht22 {
                temp_adj,
                humid_adj,
            } => {
                take(&mut self.temp_adj, temp_adj);
                take(&mut self.humid_adj, humid_adj);
            }
            DeviceConfig::Analog(analog) => {
                take(&mut self.min, &mut analog.min);
                take(&mut self.max, &mut analog.max);
                take(&mut self.readcnt, &mut analog.read_count);
                take(&mut self.readdelay, &mut analog.read_delay_ms);
                take(&mut self.removeminmax, &mut analog.remove_min_max);
            }
            DeviceConfig::Digital {} => {}
            DeviceConfig::Relay { trigger } => {
                if let Some(stored) = self.trigger.take() {
                    *trigger = stored.into();
                }
            }
            DeviceConfig::Dallas { temp_adj } => take(&mut self.temp_adj, temp_adj),
        }

        match self.first_key() {
            Some(key) => Err(HubError::Restore(format!(
                "unexpected config key {key} for {device_type}"
            ))),
            None => Ok(config),
        }
    }

    fn first_key(&self) -> Option<&'static str> {
        [
            ("bounce", self.bounce.is_some()),
            ("temp_adj", self.temp_adj.is_some()),
            ("humid_adj", self.humid_adj.is_some()),
            ("min", self.min.is_some()),
            ("max", self.max.is_some()),
            ("readcnt", self.readcnt.is_some()),
            ("readdelay", self.readdelay.is_some()),
            ("removeminmax", self.removeminmax.is_some()),
            ("trigger", self.trigger.is_some()),
        ]
        .into_iter()
        .find_map(|(key, set)| set.then_some(key))
    }
}

fn callback_fields(callback: Option<&Callback>) -> (String, String) {
    (
        callback.map(Callback::to_string).unwrap_or_default(),
        obfuscate(callback.map(Callback::auth).unwrap_or("")),
    )
}

/// Stored callbacks are `host:port/path` with no scheme, so they skip the
/// URL checks applied to user input.
fn restore_callback(text: &str, obfuscated_auth: &str) -> Result<Option<Callback>, HubError> {
    if text.is_empty() {
        return Ok(None);
    }
    parse_stored_callback(text, &deobfuscate(obfuscated_auth))
        .map(Some)
        .map_err(|e| HubError::Restore(e.to_string()))
}

fn named_values(values: &DeviceValues, column: impl Fn(usize) -> String) -> NamedValues {
    NamedValues(
        (0..values.count())
            .map(|i| (values.name(i).to_string(), column(i)))
            .collect(),
    )
}

impl DeviceRecord {
    fn from_slot(slot: &DeviceSlot) -> Result<Self, HubError> {
        let device = &slot.device;
        let mut pins = device.pins.iter().map(PinRecord::from);
        let pin1 = pins
            .next()
            .ok_or_else(|| HubError::Backup(format!("device {} has no pins", device.id)))?;
        let (callback, callbackauth) = callback_fields(device.callback.as_ref());

        let values = &slot.values;

        Ok(Self {
            id: device.id.to_string(),
            active: device.active,
            device_type: device.device_type.to_string(),
            poll: Some(device.poll_interval_ms),
            callback,
            callbackauth,
            config: ConfigRecord::from(&device.config),
            pins: PinsRecord {
                pin1,
                pin2: pins.next(),
            },
            values: named_values(values, |i| values.get(i).to_string()),
            units: named_values(values, |i| {
                values.units.get(i).copied().unwrap_or("").to_string()
            }),
        })
    }

    fn into_device(self) -> Result<(Device, Vec<(String, String)>), HubError> {
        let device_type: DeviceType = self
            .device_type
            .parse()
            .map_err(|e: HubError| HubError::Restore(e.to_string()))?;

        let mut device = Device::new(0, device_type);
        device.active = self.active;
        if let Some(poll) = self.poll {
            device.poll_interval_ms = poll;
        }
        device.config = self.config.into_config(device_type)?;
        device.callback = restore_callback(&self.callback, &self.callbackauth)?;

        device.pins.push(self.pins.pin1.into_pin()?);
        if let Some(pin2) = self.pins.pin2 {
            device.pins.push(pin2.into_pin()?);
        }
        Ok((device, self.values.0))
    }
}

/// Serializes the server configuration and the whole registry.
pub fn backup(hub: &Hub) -> Result<String, HubError> {
    let server = hub.server();
    let (callback, callbackauth) = callback_fields(server.callback.as_ref());
    let devices = hub
        .slots()
        .iter()
        .map(DeviceRecord::from_slot)
        .collect::<Result<Vec<_>, _>>()?;

    let document = BackupDocument {
        server: Some(ServerRecord {
            ssid: server.ssid().to_string(),
            pass: obfuscate(server.pass()),
            serverauth: obfuscate(server.serverauth()),
            callback,
            callbackauth,
        }),
        devices: Some(devices),
    };
    serde_json::to_string(&document).map_err(|e| HubError::Backup(e.to_string()))
}

fn apply_server(hub: &mut Hub, record: ServerRecord) -> Result<(), HubError> {
    let callback = restore_callback(&record.callback, &record.callbackauth)?;
    let server = &mut hub.server;
    server.set_ssid(&record.ssid);
    server.set_pass(&deobfuscate(&record.pass));
    server.set_serverauth(&deobfuscate(&record.serverauth));
    server.callback = callback;
    Ok(())
}

fn apply_record(hub: &mut Hub, value: Value) -> Result<(), HubError> {
    let record: DeviceRecord =
        serde_json::from_value(value).map_err(|e| HubError::Restore(e.to_string()))?;
    let (device, values) = record.into_device()?;
    hub.restore_device(device, &values)?;
    Ok(())
}

fn record_error(index: usize, e: HubError) -> HubError {
    match e {
        HubError::Restore(msg) => HubError::Restore(format!("device {index}: {msg}")),
        other => HubError::Restore(format!("device {index}: {other}")),
    }
}

/// Replaces the server configuration and the registry with the content of
/// a backup. Pins are re-claimed in registry order without a conflict
/// check.
pub fn restore(hub: &mut Hub, text: &str) -> Result<(), HubError> {
    let document: BackupDocument<Value> = serde_json::from_str(text).map_err(|e| {
        warn!("Backup rejected: {e}");
        HubError::Restore(e.to_string())
    })?;

    if let Some(server) = document.server {
        apply_server(hub, server)?;
    }
    let Some(records) = document.devices else {
        return Ok(());
    };

    hub.clear_devices();
    for (restored, value) in records.into_iter().enumerate() {
        if let Err(e) = apply_record(hub, value) {
            let e = record_error(restored, e);
            warn!("Restore stopped after {restored} devices: {e}");
            return Err(e);
        }
    }
    info!("Restored {} devices", hub.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::hub::testing::{form, mock_hub};
    use crate::scheduler;

    fn record(device_type: &str, pin: &str, mode: &str, config: &str) -> String {
        format!(
            "{{\"id\":\"0\",\"active\":true,\"type\":\"{device_type}\",\"poll\":1000,\
             \"callback\":\"\",\"callbackauth\":\"\",\"config\":{config},\
             \"pins\":{{\"pin1\":{{\"pin\":\"{pin}\",\"mode\":\"{mode}\"}}}},\
             \"values\":{{}},\"units\":{{}}}}"
        )
    }

    fn document(records: &[String]) -> String {
        format!(
            "{{\"server\":{{\"ssid\":\"home\",\"pass\":\"\",\"serverauth\":\"\",\
             \"callback\":\"\",\"callbackauth\":\"\"}},\"devices\":[{}]}}",
            records.join(",")
        )
    }

    #[test]
    fn obfuscation_shifts_by_three() {
        assert_eq!(obfuscate("abc"), "def");
        assert_eq!(deobfuscate("def"), "abc");
        assert_eq!(obfuscate("\u{D7FF}"), "\u{E002}");
        assert_eq!(obfuscate("\u{10FFFF}"), "\u{2}");
    }

    #[test]
    fn obfuscation_round_trips_printable_ascii() {
        let printable: String = (0x20u8..0x7f).map(char::from).collect();
        assert_eq!(deobfuscate(&obfuscate(&printable)), printable);
        for c in printable.chars() {
            let s = c.to_string();
            assert_eq!(deobfuscate(&obfuscate(&s)), s);
        }
    }

    #[test]
    fn all_device_types_round_trip() {
        let (mut hub, mocks) = mock_hub(RuntimeConfig::default());
        hub.set_server_config(&form(
            "ssid=home%22net&pass=p%5Cw%22d&serverauth=tok%1Fen\
             &callback=http%3A%2F%2Fops%3A9000%2Fw%3Fm%3D%3Cmsg%3E&auth_header=Basic+abc",
        ))
        .unwrap();
        let cb = "callback=http%3A%2F%2Fcollector%3A8080%2Fv%2F%3Cstate%3E&auth_header=Bearer+x";
        for payload in [
            format!("type=BUTTON&pin=D2&bounce=35&{cb}"),
            "type=SWITCH&pin=D3".to_string(),
            "type=MOTION&pin=D4&active=false".to_string(),
            "type=DHT22&pin=D5&temp_adj=0.1&humid_adj=-0.25".to_string(),
            "type=GENERIC_ANALOG&pin=A0&min=-5.5&max=100&readcnt=4&readdelay=2&removeminmax=true"
                .to_string(),
            "type=GENERIC_DIGITAL&pin=D6&interval=250".to_string(),
            "type=RELAY&pin=D7&trigger=LOW".to_string(),
            "type=TEMP_DALLAS&pin=D8&temp_adj=0.05".to_string(),
        ] {
            hub.create_device(&form(&payload)).unwrap();
        }
        mocks.sensors.push_dht22(PinId::digital(5), 21.5, 40.0);
        mocks.pins.push_analog(PinId::analog(0), &[100, 200, 300, 400]);
        let shared = Mutex::new(hub);
        scheduler::poll_cycle(&shared);
        let hub = shared.into_inner();

        let text = backup(&hub).unwrap();
        assert!(text.starts_with("{\"server\":{\"ssid\":\"home\\\"net\",\"pass\":"));
        assert!(text.contains(
            "\"type\":\"RELAY\",\"poll\":-1,\"callback\":\"\",\"callbackauth\":\"\",\
             \"config\":{\"trigger\":\"LOW\"}"
        ));
        assert!(text.contains("\"config\":{\"min\":-5.5,\"max\":100.0,\"readcnt\":4"));
        assert!(text.contains("\"config\":{},\"pins\":{\"pin1\":{\"pin\":\"D6\""));

        let (mut restored, _) = mock_hub(RuntimeConfig::default());
        restore(&mut restored, &text).unwrap();

        assert_eq!(backup(&restored).unwrap(), text);
        assert_eq!(restored.len(), 8);
        assert_eq!(restored.server().pass(), "p\\w\"d");
        assert_eq!(restored.server().serverauth(), "tok\u{1f}en");
        assert_eq!(
            restored.server().callback.as_ref().map(|c| c.auth()),
            Some("Basic abc")
        );
        assert_eq!(restored.device(3).unwrap().values[1].value, "30.0");
        assert!(restored.pinout().is_used("A0"));
    }

    #[test]
    fn stored_callbacks_come_back_verbatim() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        hub.set_server_config(&form(
            "callback=http%3A%2F%2Fh%3A8080%2Fr%3Fto%3Dhttp%3A%2F%2Fx%2F%3Cstate%3E",
        ))
        .unwrap();
        hub.create_device(&form(
            "type=SWITCH&pin=D3&callback=http%3A%2F%2Fhttpsink%2Fb%2F%3Cstate%3E",
        ))
        .unwrap();

        let text = backup(&hub).unwrap();
        assert!(text.contains("\"callback\":\"httpsink:80/b/<state>\""));

        let (mut restored, _) = mock_hub(RuntimeConfig::default());
        restore(&mut restored, &text).unwrap();

        let server_cb = restored.server().callback.as_ref().map(Callback::to_string);
        assert_eq!(server_cb.as_deref(), Some("h:8080/r?to=http://x/<state>"));
        let device_cb = restored.slots()[0].device.callback.as_ref().map(Callback::to_string);
        assert_eq!(device_cb.as_deref(), Some("httpsink:80/b/<state>"));
        assert_eq!(backup(&restored).unwrap(), text);
    }

    #[test]
    fn relay_state_is_driven_again_on_restore() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        hub.create_device(&form(
            "type=RELAY&pin=D7&callback=http%3A%2F%2Fcollector%2Fr%2F%3Cstate%3E",
        ))
        .unwrap();
        hub.command_device(0, "on").unwrap();
        let text = backup(&hub).unwrap();

        let (mut restored, mocks) = mock_hub(RuntimeConfig::default());
        restore(&mut restored, &text).unwrap();

        assert_eq!(mocks.pins.level(PinId::digital(7)), Some(Level::High));
        assert_eq!(restored.device(0).unwrap().values[0].value, "on");
        assert!(mocks.connector.requests().is_empty());
        assert_eq!(backup(&restored).unwrap(), text);
    }

    #[test]
    fn secrets_are_not_stored_in_clear() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        hub.set_server_config(&form("pass=hunter2&serverauth=token")).unwrap();
        let text = backup(&hub).unwrap();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("\"pass\":\"kxqwhu5\""));
    }

    #[test]
    fn restore_skips_pin_conflict_check() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        let text = document(&[
            record("GENERIC_DIGITAL", "D2", "INPUT", "{}"),
            record("MOTION", "D2", "INPUT", "{\"bounce\":5}"),
        ]);

        restore(&mut hub, &text).unwrap();

        assert_eq!(hub.len(), 2);
        assert_eq!(hub.devices()[1].id, 1);
        assert_eq!(hub.server().ssid(), "home");
    }

    #[test]
    fn restore_replaces_previous_registry() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        hub.create_device(&form("type=BUTTON&pin=D9")).unwrap();

        restore(&mut hub, &document(&[record("SWITCH", "D2", "INPUT_PULLUP", "{}")])).unwrap();

        assert_eq!(hub.len(), 1);
        assert!(!hub.pinout().is_used("D9"));
        assert!(hub.pinout().is_used("D2"));
    }

    #[test]
    fn failed_record_keeps_earlier_ones() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        let text = document(&[
            record("BUTTON", "D2", "INPUT_PULLUP", "{\"bounce\":20}"),
            record("LAMP", "D3", "INPUT", "{}"),
            record("BUTTON", "D4", "INPUT_PULLUP", "{}"),
        ]);

        let err = restore(&mut hub, &text).expect_err("unknown type");

        assert!(matches!(&err, HubError::Restore(msg) if msg.starts_with("device 1:")));
        assert_eq!(hub.len(), 1);
        assert_eq!(hub.devices()[0].device_type, DeviceType::Button);
    }

    #[test]
    fn rejects_keys_foreign_to_the_type() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        let text = document(&[record("RELAY", "D2", "OUTPUT", "{\"bounce\":20}")]);
        let err = restore(&mut hub, &text).expect_err("bounce on a relay");
        assert!(matches!(&err, HubError::Restore(msg) if msg.contains("bounce for RELAY")));
        assert!(hub.is_empty());
    }

    #[test]
    fn rejects_unknown_fields() {
        let unknown_record = record("SWITCH", "D2", "INPUT_PULLUP", "{}")
            .replacen("\"active\"", "\"colour\":\"red\",\"active\"", 1);
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        let err = restore(&mut hub, &document(&[unknown_record])).expect_err("colour");
        assert!(matches!(&err, HubError::Restore(msg) if msg.starts_with("device 0:")));

        let unknown_pin = record("SWITCH", "D2", "INPUT_PULLUP", "{}")
            .replacen("\"mode\"", "\"pull\":1,\"mode\"", 1);
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        assert!(restore(&mut hub, &document(&[unknown_pin])).is_err());

        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        let err = restore(&mut hub, "{\"server\":{},\"extra\":1}").expect_err("extra");
        assert!(matches!(err, HubError::Restore(_)));
    }

    #[test]
    fn rejects_unbalanced_documents() {
        let full = document(&[record("BUTTON", "D2", "INPUT_PULLUP", "{}")]);
        for broken in [
            full[..full.len() - 1].to_string(),
            format!("{full}}}"),
            full.replacen("\"devices\":[", "\"devices\":[[", 1),
            "{\"server\":{\"ssid\":\"a\"]}".to_string(),
            "{\"server\":{\"ssid\":\"a}}".to_string(),
        ] {
            let (mut hub, _) = mock_hub(RuntimeConfig::default());
            assert!(
                matches!(restore(&mut hub, &broken), Err(HubError::Restore(_))),
                "{broken}"
            );
        }
    }

    #[test]
    fn values_may_contain_delimiters() {
        let (mut hub, _) = mock_hub(RuntimeConfig::default());
        let text = document(&[record("SWITCH", "D2", "INPUT_PULLUP", "{}").replacen(
            "\"values\":{}",
            r#""values":{"state":"x\",\"}é😀"}"#,
            1,
        )]);

        restore(&mut hub, &text).unwrap();

        assert_eq!(hub.device(0).unwrap().values[0].value, "x\",\"}é😀");
    }
}
