use super::{DeviceDriver, PollContext, SetupContext, claim_pins, primary_pin, report};
use crate::device::{Device, DeviceConfig, DeviceValues};
use crate::error::HubError;
use crate::machines::Debouncer;
use crate::pins::Level;

const ON: &str = "on";
const OFF: &str = "off";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonKind {
    /// Every debounced press (LOW) flips the state.
    Toggle,
    /// State follows the pin: LOW is on, HIGH is off.
    Switch,
    /// HIGH turns on and LOW turns off, only when that differs from the
    /// stored state.
    Motion,
}

pub struct ButtonMachine {
    kind: ButtonKind,
    debouncer: Option<Debouncer>,
}

impl ButtonMachine {
    pub fn new(kind: ButtonKind) -> Self {
        Self {
            kind,
            debouncer: None,
        }
    }

    fn next_state(&self, level: Level, current: &str) -> Option<&'static str> {
        match self.kind {
            ButtonKind::Toggle => match level {
                Level::Low if current == ON => Some(OFF),
                Level::Low => Some(ON),
                Level::High => None,
            },
            ButtonKind::Switch => Some(if level == Level::Low { ON } else { OFF }),
            ButtonKind::Motion => match level {
                Level::High if current == OFF => Some(ON),
                Level::Low if current == ON => Some(OFF),
                _ => None,
            },
        }
    }
}

impl DeviceDriver for ButtonMachine {
    fn setup(
        &mut self,
        device: &mut Device,
        values: &mut DeviceValues,
        ctx: &mut SetupContext<'_>,
    ) -> Result<(), HubError> {
        claim_pins(device, ctx)?;
        let pin = primary_pin(device)?;
        let bounce = match device.config {
            DeviceConfig::Debounced { bounce } => bounce,
            _ => 0,
        };
        self.debouncer = Some(Debouncer::attach(
            pin.pin,
            u64::from(bounce),
            ctx.hw.pins.as_ref(),
        )?);
        values.set(0, OFF);
        Ok(())
    }

    fn poll(&mut self, device: &Device, values: &mut DeviceValues, ctx: &mut PollContext<'_>) -> u32 {
        let now = ctx.now_ms();
        let Some(debouncer) = self.debouncer.as_mut() else {
            return 0;
        };
        match debouncer.update(ctx.hw.pins.as_ref(), now) {
            Ok(true) => {}
            Ok(false) => return 0,
            Err(e) => return ctx.warn(&format!("Reading device {} failed: {e}", device.id)),
        }
        let level = debouncer.read();
        let Some(next) = self.next_state(level, values.get(0)) else {
            return 0;
        };
        values.set(0, next);
        report(device, values, &[0], ctx);
        0
    }
}

#[cfg(test)]
mod tests {
    use crate::device::DeviceType;
    use crate::machines::rig::Rig;
    use crate::pins::{Level, PinId};

    const PIN: PinId = PinId::digital(2);

    #[test]
    fn button_toggles_on_each_press() {
        let mut rig = Rig::new(DeviceType::Button, PIN, "bounce=20").with_callback("/b/<state>");
        rig.setup();
        assert_eq!(rig.value(0), "off");

        rig.pins.set_level(PIN, Level::Low);
        rig.clock.advance(10);
        rig.poll();
        assert_eq!(rig.value(0), "on");

        rig.pins.set_level(PIN, Level::High);
        rig.clock.advance(30);
        rig.poll();
        assert_eq!(rig.value(0), "on");

        rig.pins.set_level(PIN, Level::Low);
        rig.clock.advance(30);
        rig.poll();
        assert_eq!(rig.value(0), "off");

        assert_eq!(rig.connector.paths(), vec!["/b/on", "/b/off"]);
    }

    #[test]
    fn switch_follows_pin_level() {
        let mut rig = Rig::new(DeviceType::Switch, PIN, "").with_callback("/s/<state>");
        rig.setup();

        rig.pins.set_level(PIN, Level::Low);
        rig.clock.advance(25);
        rig.poll();
        assert_eq!(rig.value(0), "on");

        rig.pins.set_level(PIN, Level::High);
        rig.clock.advance(25);
        rig.poll();
        assert_eq!(rig.value(0), "off");
        assert_eq!(rig.connector.paths(), vec!["/s/on", "/s/off"]);
    }

    #[test]
    fn motion_reports_edges_relative_to_stored_state() {
        let mut rig = Rig::new(DeviceType::Motion, PIN, "").with_callback("/m/<state>");
        rig.setup();
        let mut seen = Vec::new();

        for level in [Level::High, Level::High, Level::Low, Level::Low] {
            rig.pins.set_level(PIN, level);
            rig.clock.advance(10);
            rig.poll();
            seen.push(rig.value(0).to_string());
        }

        assert_eq!(seen, vec!["on", "on", "off", "off"]);
        assert_eq!(rig.connector.paths(), vec!["/m/on", "/m/off"]);
    }

    #[test]
    fn bounce_window_suppresses_flapping() {
        let mut rig = Rig::new(DeviceType::Switch, PIN, "bounce=50").with_callback("/s/<state>");
        rig.setup();

        rig.pins.set_level(PIN, Level::Low);
        rig.clock.advance(100);
        rig.poll();
        rig.pins.set_level(PIN, Level::High);
        rig.clock.advance(10);
        rig.poll();
        assert_eq!(rig.value(0), "on");
        assert_eq!(rig.connector.requests().len(), 1);
    }

    #[test]
    fn works_without_callback() {
        let mut rig = Rig::new(DeviceType::Button, PIN, "");
        rig.setup();
        rig.pins.set_level(PIN, Level::Low);
        rig.clock.advance(50);
        assert_eq!(rig.poll(), 0);
        assert_eq!(rig.value(0), "on");
    }
}
