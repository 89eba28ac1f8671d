//! The device registry and the operations configuration clients run
//! against it. A `Hub` is shared by the poll thread and the HTTP workers
//! behind one mutex, so every method here runs to completion before the
//! next scheduler pass. Nothing here touches the network: callback pushes
//! are handed back to the caller, which sends them once the hub lock is
//! released (see [`crate::scheduler::deliver`]).

use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::Hardware;
use crate::callback::{Connector, Dispatcher, Push, render_path, validate_callback};
use crate::compiler;
use crate::config::RuntimeConfig;
use crate::device::{
    Callback, Device, DeviceConfig, DevicePin, DeviceType, DeviceValues, MAX_DEVICE_PINS,
    truncate_to,
};
use crate::error::HubError;
use crate::events::{ValueEvent, ValueEvents};
use crate::machines::{DeviceDriver, PollContext, SetupContext, driver_for};
use crate::options::{self, Options};
use crate::pins::{PinId, PinMode, Pinout};
use crate::status::{ServerStats, StatusReport, VERSION, memory_free};

pub const SSID_CAPACITY: usize = 31;
pub const PASS_CAPACITY: usize = 63;
pub const SERVER_AUTH_CAPACITY: usize = 63;

/// Network credentials, the API token and the warning callback.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    ssid: String,
    pass: String,
    serverauth: String,
    pub callback: Option<Callback>,
}

impl ServerConfig {
    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn pass(&self) -> &str {
        &self.pass
    }

    pub fn serverauth(&self) -> &str {
        &self.serverauth
    }

    pub fn set_ssid(&mut self, ssid: &str) {
        self.ssid = truncate_to(ssid, SSID_CAPACITY);
    }

    pub fn set_pass(&mut self, pass: &str) {
        self.pass = truncate_to(pass, PASS_CAPACITY);
    }

    pub fn set_serverauth(&mut self, serverauth: &str) {
        self.serverauth = truncate_to(serverauth, SERVER_AUTH_CAPACITY);
    }
}

pub struct DeviceSlot {
    pub device: Device,
    pub values: DeviceValues,
    pub(crate) driver: Box<dyn DeviceDriver>,
    pub last_poll: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueView {
    pub name: &'static str,
    pub unit: &'static str,
    pub value: String,
}

/// Read-only snapshot of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub id: usize,
    pub active: bool,
    #[serde(rename = "type")]
    pub device_type: DeviceType,
    pub poll: i32,
    pub pins: Vec<DevicePin>,
    pub config: DeviceConfig,
    pub callback: Option<String>,
    pub values: Vec<ValueView>,
}

impl DeviceView {
    fn of(slot: &DeviceSlot) -> Self {
        let values = &slot.values;
        Self {
            id: slot.device.id,
            active: slot.device.active,
            device_type: slot.device.device_type,
            poll: slot.device.poll_interval_ms,
            pins: slot.device.pins.clone(),
            config: slot.device.config,
            callback: slot.device.callback.as_ref().map(Callback::to_string),
            values: (0..values.count())
                .map(|i| ValueView {
                    name: values.name(i),
                    unit: values.units.get(i).copied().unwrap_or(""),
                    value: values.get(i).to_string(),
                })
                .collect(),
        }
    }
}

fn release_pins(pinout: &mut Pinout, device: &Device) {
    for pin in &device.pins {
        pinout.release(pin.pin);
    }
}

/// Builds the driver for `device` and runs its setup. Pins claimed by a
/// failed setup are released again.
fn set_up(hw: &Hardware, pinout: &mut Pinout, mut device: Device) -> Result<DeviceSlot, HubError> {
    let mut driver = driver_for(device.device_type);
    let mut values = DeviceValues::for_type(device.device_type);
    let mut ctx = SetupContext {
        hw,
        pinout: &mut *pinout,
    };
    if let Err(e) = driver.setup(&mut device, &mut values, &mut ctx) {
        release_pins(pinout, &device);
        return Err(e);
    }
    Ok(DeviceSlot {
        device,
        values,
        driver,
        last_poll: None,
    })
}

/// Broadcasts every value of `values` that differs from `before`.
pub(crate) fn publish_changes(
    events: &ValueEvents,
    device: &Device,
    before: &[String],
    values: &DeviceValues,
    now_ms: u64,
) {
    for (i, value) in values.values.iter().enumerate() {
        if before.get(i) == Some(value) {
            continue;
        }
        events.dispatch(ValueEvent {
            device_id: device.id,
            name: values.name(i).to_string(),
            value: value.clone(),
            timestamp_ms: now_ms,
        });
    }
}

fn active_option(opts: &Options) -> Option<bool> {
    options::get(opts, "active").map(|v| !matches!(v, "false" | "0" | "off"))
}

/// Reads `pin_key`/`mode_key`, falling back to the binding the device has
/// today. `None` when neither names a pin.
fn pin_option(
    opts: &Options,
    pin_key: &str,
    mode_key: &str,
    current: Option<DevicePin>,
    default_mode: PinMode,
) -> Result<Option<DevicePin>, HubError> {
    let pin = match options::get(opts, pin_key).filter(|t| !t.is_empty()) {
        Some(text) => text.parse::<PinId>()?,
        None => match current {
            Some(current) => current.pin,
            None => return Ok(None),
        },
    };
    let mode = options::get(opts, mode_key)
        .map(PinMode::from_text)
        .or(current.map(|c| c.mode))
        .unwrap_or(default_mode);
    Ok(Some(DevicePin { pin, mode }))
}

pub struct Hub {
    pub(crate) hw: Hardware,
    pub(crate) pinout: Pinout,
    pub(crate) slots: Vec<DeviceSlot>,
    pub(crate) server: ServerConfig,
    pub(crate) stats: ServerStats,
    pub(crate) dispatcher: Arc<Mutex<Dispatcher>>,
    pub(crate) events: Arc<ValueEvents>,
    pub(crate) runtime: RuntimeConfig,
    mac: String,
    ip: String,
}

impl Hub {
    pub fn new(hw: Hardware, connector: Box<dyn Connector>, runtime: RuntimeConfig) -> Self {
        let dispatcher = Arc::new(Mutex::new(Dispatcher::new(connector, hw.clock.clone())));
        Self {
            pinout: Pinout::new(runtime.digital_pins, runtime.analog_pins),
            slots: Vec::with_capacity(runtime.max_devices),
            server: ServerConfig::default(),
            stats: ServerStats::default(),
            events: Arc::new(ValueEvents::new(
                runtime.broadcast_capacity,
                runtime.event_history_capacity,
            )),
            dispatcher,
            runtime,
            hw,
            mac: String::new(),
            ip: String::new(),
        }
    }

    pub fn set_network(&mut self, mac: impl Into<String>, ip: impl Into<String>) {
        self.mac = mac.into();
        self.ip = ip.into();
    }

    pub fn events(&self) -> Arc<ValueEvents> {
        Arc::clone(&self.events)
    }

    /// The outbound connection owner. It has its own lock so pushes can be
    /// sent while the hub is free.
    pub fn dispatcher(&self) -> Arc<Mutex<Dispatcher>> {
        Arc::clone(&self.dispatcher)
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn pinout(&self) -> &Pinout {
        &self.pinout
    }

    pub fn slots(&self) -> &[DeviceSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Checks an `Authorization` header against the server token. Without a
    /// configured token the API is open.
    pub fn authorize(&self, header: Option<&str>) -> Result<(), HubError> {
        if self.server.serverauth.is_empty() || header == Some(self.server.serverauth.as_str()) {
            return Ok(());
        }
        Err(HubError::PermissionDenied("invalid Authorization header".into()))
    }

    fn slot(&self, id: usize) -> Result<&DeviceSlot, HubError> {
        self.slots.get(id).ok_or(HubError::NotFoundDevice(id))
    }

    fn check_pin_free(&self, pin: PinId, own: &[DevicePin]) -> Result<(), HubError> {
        if !self.pinout.contains(pin) {
            return Err(HubError::InvalidValue(format!("Pin {pin} does not exist")));
        }
        if own.iter().any(|p| p.pin == pin) {
            return Ok(());
        }
        if self.pinout.is_used(&pin.to_string()) {
            return Err(HubError::PinInUse(pin.to_string()));
        }
        Ok(())
    }

    /// Pin bindings requested by `opts`. `current` holds the bindings of
    /// the device being updated; its own pins never count as conflicts.
    fn requested_pins(
        &self,
        device_type: DeviceType,
        opts: &Options,
        current: &[DevicePin],
    ) -> Result<Vec<DevicePin>, HubError> {
        let default_mode = device_type.default_pin_mode();
        let primary = pin_option(opts, "pin", "mode", current.first().copied(), default_mode)?
            .ok_or_else(|| HubError::InvalidValue("pin is required".into()))?;

        let mut pins = Vec::with_capacity(MAX_DEVICE_PINS);
        pins.push(primary);
        if let Some(second) = pin_option(opts, "pin2", "mode2", current.get(1).copied(), default_mode)? {
            if second.pin == primary.pin {
                return Err(HubError::PinInUse(second.pin.to_string()));
            }
            pins.push(second);
        }

        for pin in &pins {
            self.check_pin_free(pin.pin, current)?;
        }
        Ok(pins)
    }

    pub fn create_device(&mut self, opts: &Options) -> Result<usize, HubError> {
        let device_type: DeviceType = options::get(opts, "type").unwrap_or("").parse()?;
        if self.slots.len() >= self.runtime.max_devices {
            return Err(HubError::CapacityExceeded(self.runtime.max_devices));
        }
        let pins = self.requested_pins(device_type, opts, &[])?;
        let callback = validate_callback(opts)?;

        let id = self.slots.len();
        let mut device = Device::new(id, device_type);
        device.pins = pins;
        device.callback = callback;
        if let Some(active) = active_option(opts) {
            device.active = active;
        }
        compiler::compile(&mut device, opts)?;

        let slot = set_up(&self.hw, &mut self.pinout, device)?;
        info!(
            "created device {id}: {device_type} on {}",
            slot.device
                .pins
                .iter()
                .map(|p| p.pin.to_string())
                .collect::<Vec<_>>()
                .join(",")
        );
        self.slots.push(slot);
        self.stats.devices = self.slots.len();
        Ok(id)
    }

    /// Recompiles a device from `opts` and runs its setup again. The
    /// device keeps its type; pins, callback and `active` change only when
    /// `opts` names them.
    pub fn update_device(&mut self, id: usize, opts: &Options) -> Result<(), HubError> {
        let current = self.slot(id)?.device.clone();
        let pins = self.requested_pins(current.device_type, opts, &current.pins)?;
        let callback = if options::get(opts, "callback").is_some() {
            validate_callback(opts)?
        } else {
            let mut callback = current.callback.clone();
            if let (Some(cb), Some(auth)) = (callback.as_mut(), options::get(opts, "auth_header")) {
                cb.set_auth(&auth.replace('+', " "));
            }
            callback
        };

        let mut device = current.clone();
        device.pins = pins;
        device.callback = callback;
        if let Some(active) = active_option(opts) {
            device.active = active;
        }
        compiler::compile(&mut device, opts)?;

        release_pins(&mut self.pinout, &current);
        match set_up(&self.hw, &mut self.pinout, device) {
            Ok(slot) => {
                info!("updated device {id}");
                self.slots[id] = slot;
                self.stats.devices = self.slots.len();
                Ok(())
            }
            Err(e) => {
                match set_up(&self.hw, &mut self.pinout, current) {
                    Ok(slot) => self.slots[id] = slot,
                    Err(re) => warn!("device {id} could not be set up again: {re}"),
                }
                Err(e)
            }
        }
    }

    /// Removes a device, frees its pins and closes the gap in the ids.
    pub fn delete_device(&mut self, id: usize) -> Result<(), HubError> {
        self.slot(id)?;
        let removed = self.slots.remove(id);
        release_pins(&mut self.pinout, &removed.device);
        for (i, slot) in self.slots.iter_mut().enumerate().skip(id) {
            slot.device.id = i;
        }
        self.events.forget(id);
        self.stats.devices = self.slots.len();
        info!("deleted device {id} ({})", removed.device.device_type);
        Ok(())
    }

    /// Writes a value to an output device. Returns the callback pushes the
    /// change produced, still to be delivered.
    pub fn command_device(&mut self, id: usize, value: &str) -> Result<Vec<Push>, HubError> {
        let now = self.hw.clock.now_ms();
        let slot = self.slots.get_mut(id).ok_or(HubError::NotFoundDevice(id))?;
        let before = slot.values.values.clone();
        let mut outbox = Vec::new();
        let mut ctx = PollContext {
            hw: &self.hw,
            stats: &mut self.stats,
            outbox: &mut outbox,
        };
        slot.driver
            .command(&slot.device, &mut slot.values, value, &mut ctx)?;
        publish_changes(&self.events, &slot.device, &before, &slot.values, now);
        Ok(outbox)
    }

    /// Applies `ssid`, `pass`, `serverauth`, `callback` and `auth_header`.
    /// Nothing changes when the callback is rejected.
    pub fn set_server_config(&mut self, opts: &Options) -> Result<(), HubError> {
        let callback = match options::get(opts, "callback") {
            Some(_) => Some(validate_callback(opts)?),
            None => None,
        };

        if let Some(ssid) = options::get(opts, "ssid") {
            self.server.set_ssid(ssid);
        }
        if let Some(pass) = options::get(opts, "pass") {
            self.server.set_pass(pass);
        }
        if let Some(serverauth) = options::get(opts, "serverauth") {
            self.server.set_serverauth(serverauth);
        }
        match callback {
            Some(callback) => self.server.callback = callback,
            None => {
                if let (Some(cb), Some(auth)) =
                    (self.server.callback.as_mut(), options::get(opts, "auth_header"))
                {
                    cb.set_auth(&auth.replace('+', " "));
                }
            }
        }
        info!("server configuration updated");
        Ok(())
    }

    pub fn devices(&self) -> Vec<DeviceView> {
        self.slots.iter().map(DeviceView::of).collect()
    }

    pub fn device(&self, id: usize) -> Result<DeviceView, HubError> {
        self.slot(id).map(DeviceView::of)
    }

    pub fn status(&self) -> StatusReport {
        StatusReport {
            version: VERSION,
            mac: self.mac.clone(),
            ssid: self.server.ssid.clone(),
            ip: self.ip.clone(),
            rssi: "0".into(),
            memory: memory_free(),
            devices: self.slots.len(),
            devices_slow_process: self.stats.slow_polls,
            warnings: self.stats.warnings,
            last_warn: self.stats.last_warning.clone(),
            now: self.hw.clock.now_ms(),
        }
    }

    /// Books the outcome of a delivery: every failed device push is one
    /// more warning on top of `warnings`. Returns the total and, when it is
    /// not zero, the push forwarding the last warning through the server
    /// callback's `<msg>` placeholder.
    pub(crate) fn settle(&mut self, warnings: u32, failed: &[Push]) -> (u32, Option<Push>) {
        let now = self.hw.clock.now_ms();
        for push in failed {
            if let Some(id) = push.device {
                self.stats
                    .warn(&format!("Callback failed for device: {id}"), now);
            }
        }
        let total = warnings + failed.len() as u32;
        if total == 0 {
            return (0, None);
        }
        self.stats.warnings += u64::from(total);

        let forward = self.server.callback.as_ref().map(|callback| Push {
            device: None,
            path: render_path(callback.path(), &[("msg", &self.stats.last_warning)]),
            callback: callback.clone(),
        });
        (total, forward)
    }

    /// Drops every device and frees the whole pinout.
    pub fn clear_devices(&mut self) {
        self.slots.clear();
        self.pinout.release_all();
        self.events.clear();
        self.stats.devices = 0;
    }

    /// Appends a device read from a backup. Its pins are claimed without
    /// checking for conflicts. Restored values replace the seeded ones for
    /// input devices. Outputs get their saved state written back to the
    /// pin; the callback push that would produce is dropped.
    pub(crate) fn restore_device(
        &mut self,
        mut device: Device,
        values: &[(String, String)],
    ) -> Result<usize, HubError> {
        if self.slots.len() >= self.runtime.max_devices {
            return Err(HubError::CapacityExceeded(self.runtime.max_devices));
        }
        let id = self.slots.len();
        device.id = id;
        let mut slot = set_up(&self.hw, &mut self.pinout, device)?;

        if slot.device.device_type.is_output() {
            let saved = values
                .iter()
                .find(|(name, value)| name == slot.values.name(0) && !value.is_empty());
            if let Some((_, value)) = saved {
                let mut muted = Vec::new();
                let mut ctx = PollContext {
                    hw: &self.hw,
                    stats: &mut self.stats,
                    outbox: &mut muted,
                };
                if let Err(e) = slot
                    .driver
                    .command(&slot.device, &mut slot.values, value, &mut ctx)
                {
                    warn!("device {id}: saved state {value} not applied: {e}");
                }
            }
        } else {
            for (name, value) in values {
                if let Some(i) = slot.values.names.iter().position(|n| n == name) {
                    slot.values.set(i, value.as_str());
                }
            }
        }
        self.slots.push(slot);
        self.stats.devices = self.slots.len();
        Ok(id)
    }
}
