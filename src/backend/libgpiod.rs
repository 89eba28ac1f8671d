use log::{debug, warn};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock as PLRwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use super::PinBackend;
use crate::config::LineConfig;
use crate::error::HubError;
use crate::pins::{Level, PinId, PinMode};

const ANALOG_MAX: u16 = 1023;

/// Digital pins mapped onto libgpiod lines; analog pins read from IIO
/// `in_voltageN_raw` files.
pub struct LibgpiodBackend {
    lines: FxHashMap<PinId, LineConfig>,
    analog: FxHashMap<PinId, PathBuf>,
    pins: PLRwLock<FxHashMap<PinId, RwLock<PinHandle>>>, // requested lines
}

struct PinHandle {
    line: u32,
    mode: PinMode,
    gpiod_handle: Arc<FairMutex<GpiodHandle>>,
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, HubError> {
        let chip = Self::open_chip(chip)?;
        let request = Self::request_lines(&chip, line_cfg)?;
        Ok(Self { request })
    }

    fn open_chip(path: &str) -> Result<Chip, HubError> {
        let p = PathBuf::from(path);
        Chip::open(&p).map_err(|e| HubError::Gpio(format!("open chip {path}: {e}")))
    }

    fn request_lines(chip: &Chip, line_cfg: &line::Config) -> Result<request::Request, HubError> {
        let mut req_cfg =
            request::Config::new().map_err(|e| HubError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| HubError::Gpio(format!("request consumer: {e}")))?;
        chip.request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| HubError::Gpio(format!("request lines: {e}")))
    }
}

fn parse_pin_keys<V, T>(
    entries: &FxHashMap<String, V>,
    map: impl Fn(&V) -> T,
) -> Result<FxHashMap<PinId, T>, HubError> {
    entries
        .iter()
        .map(|(key, value)| {
            key.parse::<PinId>()
                .map(|pin| (pin, map(value)))
                .map_err(|e| HubError::Config(format!("pin mapping {key}: {e}")))
        })
        .collect()
}

impl LibgpiodBackend {
    pub fn new(
        gpios: &FxHashMap<String, LineConfig>,
        analog: &FxHashMap<String, String>,
    ) -> Result<Self, HubError> {
        Ok(Self {
            lines: parse_pin_keys(gpios, LineConfig::clone)?,
            analog: parse_pin_keys(analog, PathBuf::from)?,
            pins: PLRwLock::new(FxHashMap::default()),
        })
    }

    fn make_line_settings(mode: PinMode) -> Result<line::Settings, HubError> {
        let mut ls =
            line::Settings::new().map_err(|e| HubError::Gpio(format!("libgpiod settings: {e}")))?;

        match mode {
            PinMode::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| HubError::Gpio(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| HubError::Gpio(format!("set drive: {e}")))?;
            }
            PinMode::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| HubError::Gpio(format!("set direction: {e}")))?;
                ls.set_bias(None)
                    .map_err(|e| HubError::Gpio(format!("set bias: {e}")))?;
            }
            PinMode::InputPullup => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| HubError::Gpio(format!("set direction: {e}")))?;
                ls.set_bias(Some(line::Bias::PullUp))
                    .map_err(|e| HubError::Gpio(format!("set bias: {e}")))?;
            }
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, settings: line::Settings) -> Result<line::Config, HubError> {
        let mut cfg =
            line::Config::new().map_err(|e| HubError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| HubError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }
}

impl PinBackend for LibgpiodBackend {
    fn set_pin_mode(&self, pin: PinId, mode: PinMode) -> Result<(), HubError> {
        if self.analog.contains_key(&pin) {
            if mode != PinMode::Input {
                return Err(HubError::Gpio(format!("analog pin {pin} is input only")));
            }
            return Ok(());
        }

        let pins = self.pins.upgradable_read();
        let line_settings = Self::make_line_settings(mode)?;

        match pins.get(&pin) {
            Some(handle) => {
                let mut handle = handle
                    .write()
                    .map_err(|e| HubError::Gpio(format!("lock poisoned: {e}")))?;
                let line_cfg = Self::make_line_config(handle.line, line_settings)?;

                handle
                    .gpiod_handle
                    .lock()
                    .request
                    .reconfigure_lines(&line_cfg)
                    .map_err(|e| HubError::Gpio(format!("reconfigure lines: {e}")))?;
                handle.mode = mode;
            }
            None => {
                let target = self
                    .lines
                    .get(&pin)
                    .ok_or_else(|| HubError::Gpio(format!("no gpio line mapped for pin {pin}")))?;
                let line_cfg = Self::make_line_config(target.line, line_settings)?;

                // the upgradable read is exclusive, so nobody else can insert this pin meanwhile
                let gpiod_handle = Arc::new(FairMutex::new(GpiodHandle::new(&target.chip, &line_cfg)?));
                let handle = RwLock::new(PinHandle {
                    line: target.line,
                    mode,
                    gpiod_handle,
                });

                let mut pins = RwLockUpgradableReadGuard::upgrade(pins);
                pins.insert(pin, handle);
            }
        }

        debug!("pin {pin} set to {}", mode.as_str());
        Ok(())
    }

    fn read_digital(&self, pin: PinId) -> Result<Level, HubError> {
        let pins = self.pins.read();
        let handle_lock = pins
            .get(&pin)
            .ok_or_else(|| HubError::Gpio(format!("pin {pin} not configured, set mode first")))?;
        let handle = handle_lock
            .read()
            .map_err(|e| HubError::Gpio(format!("lock poisoned: {e}")))?;

        let value = handle
            .gpiod_handle
            .lock()
            .request
            .value(handle.line)
            .map_err(|e| HubError::Gpio(format!("get value: {e}")))?;
        Ok(match value {
            line::Value::InActive => Level::Low,
            line::Value::Active => Level::High,
        })
    }

    fn write_digital(&self, pin: PinId, level: Level) -> Result<(), HubError> {
        let pins = self.pins.read();
        let handle_lock = pins
            .get(&pin)
            .ok_or_else(|| HubError::Gpio(format!("pin {pin} not configured, set mode first")))?;
        let handle = handle_lock
            .read()
            .map_err(|e| HubError::Gpio(format!("lock poisoned: {e}")))?;

        if handle.mode != PinMode::Output {
            return Err(HubError::Gpio(format!(
                "pin {pin} must be in output mode to set value"
            )));
        }

        handle
            .gpiod_handle
            .lock()
            .request
            .set_value(
                handle.line,
                if level.is_high() {
                    line::Value::Active
                } else {
                    line::Value::InActive
                },
            )
            .map_err(|e| HubError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }

    fn read_analog(&self, pin: PinId) -> Result<u16, HubError> {
        let path = self
            .analog
            .get(&pin)
            .ok_or_else(|| HubError::Gpio(format!("no analog input mapped for pin {pin}")))?;
        let text = fs::read_to_string(path)
            .map_err(|e| HubError::Gpio(format!("read {}: {e}", path.display())))?;
        let raw = text
            .trim()
            .parse::<u32>()
            .map_err(|e| HubError::Gpio(format!("parse {}: {e}", path.display())))?;
        if raw > u32::from(ANALOG_MAX) {
            warn!("analog pin {pin} sample {raw} clipped to {ANALOG_MAX}");
        }
        Ok(raw.min(u32::from(ANALOG_MAX)) as u16)
    }
}
