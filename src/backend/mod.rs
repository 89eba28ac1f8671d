//! Hardware seams: pin I/O, sensor buses and time.

#[cfg(feature = "hardware-gpio")]
pub mod libgpiod;
pub mod mock;
pub mod sysfs;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::HubError;
use crate::pins::{Level, PinId, PinMode};

#[cfg(feature = "hardware-gpio")]
pub use libgpiod::LibgpiodBackend;
pub use mock::{ManualClock, MockPinBackend, MockSensorBus, RecordingConnector};
pub use sysfs::SysfsSensorBus;

/// Reading reported by the Dallas driver when no probe answers.
pub const DALLAS_DISCONNECTED_C: f32 = -127.0;

pub trait PinBackend: Send + Sync {
    fn set_pin_mode(&self, pin: PinId, mode: PinMode) -> Result<(), HubError>;
    fn read_digital(&self, pin: PinId) -> Result<Level, HubError>;
    fn write_digital(&self, pin: PinId, level: Level) -> Result<(), HubError>;
    /// Raw 10-bit sample in `0..=1023`.
    fn read_analog(&self, pin: PinId) -> Result<u16, HubError>;
}

pub trait SensorBus: Send + Sync {
    /// Minimum spacing between two DHT22 reads.
    fn dht22_min_delay_ms(&self, pin: PinId) -> u32;
    /// Temperature in °C and relative humidity in %. A channel that could
    /// not be read is NaN.
    fn read_dht22(&self, pin: PinId) -> (f32, f32);
    /// Starts a temperature conversion without waiting for it and returns
    /// how long the probe needs before the result can be read.
    fn dallas_request_conversion(&self, pin: PinId) -> u32;
    /// Last converted temperature, [`DALLAS_DISCONNECTED_C`] when the probe
    /// is gone.
    fn dallas_read_temp_c(&self, pin: PinId) -> f32;
}

pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
    fn delay_ms(&self, ms: u64);
}

pub struct SystemClock {
    started: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn delay_ms(&self, ms: u64) {
        if ms > 0 {
            std::thread::sleep(Duration::from_millis(ms));
        }
    }
}

/// The collaborators every device state machine talks to.
#[derive(Clone)]
pub struct Hardware {
    pub pins: Arc<dyn PinBackend>,
    pub sensors: Arc<dyn SensorBus>,
    pub clock: Arc<dyn Clock>,
}
