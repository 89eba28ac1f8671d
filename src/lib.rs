pub mod backend;
pub mod backup;
pub mod callback;
pub mod compiler;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod hub;
pub mod machines;
pub mod options;
pub mod pins;
pub mod routes;
pub mod scheduler;
pub mod status;
pub mod urlcode;

pub use backup::{backup, restore};
pub use config::{AppConfig, HttpConfig, LineConfig, RuntimeConfig, SensorsConfig};
pub use device::{Callback, Device, DeviceConfig, DeviceType, DeviceValues};
pub use error::HubError;
pub use events::{ValueEvent, ValueEvents};
pub use hub::{DeviceView, Hub, ServerConfig};
pub use pins::{Level, PinId, PinMode, Pinout};
pub use routes::AppState;
pub use status::StatusReport;

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::{
    Clock, Hardware, ManualClock, MockPinBackend, MockSensorBus, PinBackend, RecordingConnector,
    SensorBus, SysfsSensorBus, SystemClock,
};
pub use callback::TcpConnector;
