use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use rustc_hash::FxHashMap;

use super::{DALLAS_DISCONNECTED_C, SensorBus};
use crate::config::SensorsConfig;
use crate::pins::PinId;

const DHT22_MIN_DELAY_MS: u32 = 2000;
const DALLAS_CONVERSION_MS: u32 = 750;

/// Sensor reads through kernel drivers: the IIO `dht11` driver for DHT22
/// and the `w1_therm` driver for Dallas probes.
pub struct SysfsSensorBus {
    dht22: FxHashMap<PinId, PathBuf>,
    dallas: FxHashMap<PinId, PathBuf>,
}

fn map_paths(entries: &FxHashMap<String, String>) -> FxHashMap<PinId, PathBuf> {
    entries
        .iter()
        .filter_map(|(pin, path)| match pin.parse::<PinId>() {
            Ok(pin) => Some((pin, PathBuf::from(path))),
            Err(e) => {
                warn!("ignoring sensor entry {pin}: {e}");
                None
            }
        })
        .collect()
}

/// Reads a file holding one integer in milli-units.
fn read_milli(path: &Path) -> Option<f32> {
    let text = fs::read_to_string(path)
        .inspect_err(|e| debug!("read {} failed: {e}", path.display()))
        .ok()?;
    let milli = text.trim().parse::<i64>().ok()?;
    Some(milli as f32 / 1000.0)
}

impl SysfsSensorBus {
    pub fn new(config: &SensorsConfig) -> Self {
        Self {
            dht22: map_paths(&config.dht22),
            dallas: map_paths(&config.dallas),
        }
    }
}

impl SensorBus for SysfsSensorBus {
    fn dht22_min_delay_ms(&self, _pin: PinId) -> u32 {
        DHT22_MIN_DELAY_MS
    }

    fn read_dht22(&self, pin: PinId) -> (f32, f32) {
        let Some(dir) = self.dht22.get(&pin) else {
            return (f32::NAN, f32::NAN);
        };
        let temperature = read_milli(&dir.join("in_temp_input")).unwrap_or(f32::NAN);
        let humidity = read_milli(&dir.join("in_humidityrelative_input")).unwrap_or(f32::NAN);
        (temperature, humidity)
    }

    // w1_therm converts on read, so there is nothing to start.
    fn dallas_request_conversion(&self, _pin: PinId) -> u32 {
        DALLAS_CONVERSION_MS
    }

    fn dallas_read_temp_c(&self, pin: PinId) -> f32 {
        self.dallas
            .get(&pin)
            .and_then(|path| read_milli(path))
            .unwrap_or(DALLAS_DISCONNECTED_C)
    }
}
