//! Turns a generic option bag into a device's typed configuration.
//!
//! | type | options (default) |
//! |---|---|
//! | BUTTON, SWITCH | `bounce` (20) |
//! | MOTION | `bounce` (5) |
//! | DHT22 | `temp_adj`, `humid_adj` (0.0) |
//! | GENERIC_ANALOG | `min` (0.0), `max` (1023.0), `readcnt` (1), `readdelay` (0), `removeminmax` (false) |
//! | GENERIC_DIGITAL | none |
//! | RELAY | `trigger` HIGH/LOW (HIGH) |
//! | TEMP_DALLAS | `temp_adj` (0.0) |
//!
//! `interval` overrides the poll interval for any type. Options that are
//! absent fall back to the defaults, so recompiling an existing device with
//! a partial bag resets everything it does not mention.

use log::debug;

use crate::device::{AnalogConfig, Device, DeviceConfig, DeviceType};
use crate::error::HubError;
use crate::options::{self, Options, to_float, to_int};
use crate::pins::Level;

fn int_option(opts: &Options, key: &str, default: i64) -> i64 {
    options::get(opts, key).map(to_int).unwrap_or(default)
}

fn float_option(opts: &Options, key: &str, default: f32) -> f32 {
    options::get(opts, key).map(to_float).unwrap_or(default)
}

fn clamp_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

pub fn compile_config(device_type: DeviceType, opts: &Options) -> Result<DeviceConfig, HubError> {
    let config = match device_type {
        DeviceType::Button | DeviceType::Switch | DeviceType::Motion => {
            let default = match device_type {
                DeviceType::Motion => 5,
                _ => 20,
            };
            DeviceConfig::Debounced {
                bounce: clamp_u32(int_option(opts, "bounce", default)),
            }
        }
        DeviceType::Dht22 => DeviceConfig::Dht22 {
            temp_adj: float_option(opts, "temp_adj", 0.0),
            humid_adj: float_option(opts, "humid_adj", 0.0),
        },
        DeviceType::GenericAnalogInput => {
            let defaults = AnalogConfig::default();
            DeviceConfig::Analog(AnalogConfig {
                min: float_option(opts, "min", defaults.min),
                max: float_option(opts, "max", defaults.max),
                read_count: int_option(opts, "readcnt", i64::from(defaults.read_count))
                    .clamp(0, i64::from(u8::MAX)) as u8,
                read_delay_ms: clamp_u32(int_option(
                    opts,
                    "readdelay",
                    i64::from(defaults.read_delay_ms),
                )),
                remove_min_max: options::get(opts, "removeminmax") == Some("true"),
            })
        }
        DeviceType::GenericDigitalInput => DeviceConfig::Digital {},
        DeviceType::Relay => DeviceConfig::Relay {
            trigger: match options::get(opts, "trigger") {
                Some("LOW") => Level::Low,
                _ => Level::High,
            },
        },
        DeviceType::TempDallas => DeviceConfig::Dallas {
            temp_adj: float_option(opts, "temp_adj", 0.0),
        },
    };
    Ok(config)
}

/// Applies `opts` to `device`: the typed config and the optional interval
/// override. The device is left untouched when compilation fails.
pub fn compile(device: &mut Device, opts: &Options) -> Result<(), HubError> {
    let config = compile_config(device.device_type, opts)?;
    if let Some(interval) = options::get(opts, "interval") {
        device.poll_interval_ms = to_int(interval).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
    }
    device.config = config;
    debug!(
        "device {} ({}) compiled: {:?}, poll {} ms",
        device.id, device.device_type, device.config, device.poll_interval_ms
    );
    Ok(())
}
