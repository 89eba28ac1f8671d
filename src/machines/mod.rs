//! One sampling strategy per device type.
//!
//! `setup` runs once when a device is created (or reconfigured): it claims
//! the device's pins, configures them on the backend and seeds the
//! displayed values. `poll` runs whenever the scheduler finds the device
//! due and returns how many warnings it produced. Callback pushes are only
//! queued on the context; sending them is left to the caller.

mod analog;
mod button;
mod dallas;
mod debounce;
mod dht22;
mod digital;
mod relay;

pub use analog::AnalogMachine;
pub use button::{ButtonKind, ButtonMachine};
pub use dallas::DallasMachine;
pub use debounce::Debouncer;
pub use dht22::Dht22Machine;
pub use digital::DigitalMachine;
pub use relay::RelayMachine;

use crate::backend::Hardware;
use crate::callback::{Push, render_path};
use crate::device::{Device, DevicePin, DeviceType, DeviceValues};
use crate::error::HubError;
use crate::pins::Pinout;
use crate::status::ServerStats;

pub struct SetupContext<'a> {
    pub hw: &'a Hardware,
    pub pinout: &'a mut Pinout,
}

pub struct PollContext<'a> {
    pub hw: &'a Hardware,
    pub stats: &'a mut ServerStats,
    pub outbox: &'a mut Vec<Push>,
}

impl PollContext<'_> {
    pub fn now_ms(&self) -> u64 {
        self.hw.clock.now_ms()
    }

    /// Records a sensor failure and returns the warning count for it.
    pub fn warn(&mut self, msg: &str) -> u32 {
        let now = self.now_ms();
        self.stats.warn(msg, now);
        1
    }
}

pub trait DeviceDriver: Send {
    fn setup(
        &mut self,
        device: &mut Device,
        values: &mut DeviceValues,
        ctx: &mut SetupContext<'_>,
    ) -> Result<(), HubError>;

    fn poll(&mut self, device: &Device, values: &mut DeviceValues, ctx: &mut PollContext<'_>)
    -> u32;

    /// Handles a value written by a client. Only output devices accept one.
    fn command(
        &mut self,
        device: &Device,
        _values: &mut DeviceValues,
        _value: &str,
        _ctx: &mut PollContext<'_>,
    ) -> Result<(), HubError> {
        Err(HubError::InvalidValue(format!(
            "device {} ({}) does not accept values",
            device.id, device.device_type
        )))
    }
}

pub fn driver_for(device_type: DeviceType) -> Box<dyn DeviceDriver> {
    match device_type {
        DeviceType::Button => Box::new(ButtonMachine::new(ButtonKind::Toggle)),
        DeviceType::Switch => Box::new(ButtonMachine::new(ButtonKind::Switch)),
        DeviceType::Motion => Box::new(ButtonMachine::new(ButtonKind::Motion)),
        DeviceType::Dht22 => Box::new(Dht22Machine),
        DeviceType::GenericAnalogInput => Box::new(AnalogMachine),
        DeviceType::GenericDigitalInput => Box::new(DigitalMachine),
        DeviceType::Relay => Box::new(RelayMachine),
        DeviceType::TempDallas => Box::new(DallasMachine::default()),
    }
}

/// Claims every pin of `device` and applies its mode on the backend.
pub fn claim_pins(device: &Device, ctx: &mut SetupContext<'_>) -> Result<(), HubError> {
    for DevicePin { pin, mode } in &device.pins {
        ctx.pinout.claim(*pin, *mode)?;
        ctx.hw.pins.set_pin_mode(*pin, *mode)?;
    }
    Ok(())
}

pub fn primary_pin(device: &Device) -> Result<DevicePin, HubError> {
    device
        .primary_pin()
        .ok_or_else(|| HubError::InvalidValue(format!("device {} has no pin", device.id)))
}

/// Relative correction: `value + adjustment * value`.
pub fn adjust_percent(original: f32, adjustment: f32) -> f32 {
    if adjustment == 0.0 {
        return original;
    }
    original + adjustment * original
}

/// Queues the values at `indices` for the device callback, if any.
pub fn report(device: &Device, values: &DeviceValues, indices: &[usize], ctx: &mut PollContext<'_>) {
    let Some(callback) = &device.callback else {
        return;
    };
    let pairs: Vec<(&str, &str)> = indices
        .iter()
        .map(|&i| (values.name(i), values.get(i)))
        .collect();
    ctx.outbox.push(Push {
        device: Some(device.id),
        path: render_path(callback.path(), &pairs),
        callback: callback.clone(),
    });
}

#[cfg(test)]
pub(crate) mod rig {
    use std::sync::Arc;

    use super::*;
    use crate::backend::{ManualClock, MockPinBackend, MockSensorBus, RecordingConnector};
    use crate::callback::Dispatcher;
    use crate::compiler;
    use crate::device::Callback;
    use crate::options::parse_form;
    use crate::pins::{PinId, PinMode};

    /// One device wired to mock hardware. Queued pushes go straight to a
    /// recording dispatcher.
    pub struct Rig {
        pub pins: Arc<MockPinBackend>,
        pub sensors: Arc<MockSensorBus>,
        pub clock: Arc<ManualClock>,
        pub connector: RecordingConnector,
        pub hw: Hardware,
        pub pinout: Pinout,
        pub stats: ServerStats,
        pub dispatcher: Dispatcher,
        pub device: Device,
        pub values: DeviceValues,
        pub driver: Box<dyn DeviceDriver>,
    }

    impl Rig {
        pub fn new(device_type: DeviceType, pin: PinId, options: &str) -> Self {
            let pins = Arc::new(MockPinBackend::default());
            let sensors = Arc::new(MockSensorBus::default());
            let clock = Arc::new(ManualClock::default());
            let connector = RecordingConnector::default();
            let hw = Hardware {
                pins: pins.clone(),
                sensors: sensors.clone(),
                clock: clock.clone(),
            };
            let dispatcher = Dispatcher::new(Box::new(connector.clone()), clock.clone());

            let mut device = Device::new(0, device_type);
            device.pins.push(DevicePin {
                pin,
                mode: device_type.default_pin_mode(),
            });
            compiler::compile(&mut device, &parse_form(options)).expect("compiles");

            Self {
                pins,
                sensors,
                clock,
                connector,
                hw,
                pinout: Pinout::new(13, 8),
                stats: ServerStats::default(),
                dispatcher,
                values: DeviceValues::for_type(device_type),
                driver: driver_for(device_type),
                device,
            }
        }

        pub fn with_callback(mut self, path: &str) -> Self {
            self.device.callback = Some(Callback::new("collector", 80, path, ""));
            self
        }

        pub fn setup(&mut self) {
            let mut ctx = SetupContext {
                hw: &self.hw,
                pinout: &mut self.pinout,
            };
            self.driver
                .setup(&mut self.device, &mut self.values, &mut ctx)
                .expect("setup succeeds");
        }

        pub fn poll(&mut self) -> u32 {
            let mut outbox = Vec::new();
            let mut ctx = PollContext {
                hw: &self.hw,
                stats: &mut self.stats,
                outbox: &mut outbox,
            };
            let warnings = self.driver.poll(&self.device, &mut self.values, &mut ctx);
            self.dispatcher.deliver(outbox);
            warnings
        }

        pub fn command(&mut self, value: &str) -> Result<(), HubError> {
            let mut outbox = Vec::new();
            let mut ctx = PollContext {
                hw: &self.hw,
                stats: &mut self.stats,
                outbox: &mut outbox,
            };
            let result = self
                .driver
                .command(&self.device, &mut self.values, value, &mut ctx);
            self.dispatcher.deliver(outbox);
            result
        }

        pub fn value(&self, index: usize) -> &str {
            self.values.get(index)
        }

        pub fn pin_mode(&self, pin: PinId) -> Option<PinMode> {
            self.pinout.mode(pin)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::rig::Rig;
    use super::*;
    use crate::device::ALL_DEVICE_TYPES;
    use crate::pins::PinId;

    #[test]
    fn adjustment_is_relative() {
        assert_eq!(adjust_percent(20.0, 0.0), 20.0);
        assert_eq!(adjust_percent(20.0, 0.1), 22.0);
        assert_eq!(adjust_percent(-10.0, 0.5), -15.0);
    }

    #[test]
    fn setup_claims_the_device_pin() {
        for t in ALL_DEVICE_TYPES {
            let mut rig = Rig::new(t, PinId::digital(3), "");
            rig.setup();
            assert_eq!(rig.pin_mode(PinId::digital(3)), Some(t.default_pin_mode()), "{t}");
        }
    }

    #[test]
    fn unchanged_input_never_reaches_edge_triggered_callbacks() {
        for t in [DeviceType::Button, DeviceType::Motion, DeviceType::Relay] {
            let mut rig = Rig::new(t, PinId::digital(3), "").with_callback("/x/<state>");
            rig.setup();
            for _ in 0..5 {
                rig.clock.advance(100);
                assert_eq!(rig.poll(), 0);
            }
            assert!(rig.connector.requests().is_empty(), "{t}");
        }
    }

    #[test]
    fn input_devices_reject_commands() {
        let mut rig = Rig::new(DeviceType::Button, PinId::digital(3), "");
        rig.setup();
        assert!(matches!(rig.command("on"), Err(HubError::InvalidValue(_))));
    }
}
