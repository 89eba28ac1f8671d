use log::info;

use super::{DeviceDriver, PollContext, SetupContext, claim_pins, primary_pin, report};
use crate::device::{Device, DeviceConfig, DeviceValues};
use crate::error::HubError;
use crate::pins::Level;

/// Output driven by client commands. Polling never touches it.
pub struct RelayMachine;

fn trigger(device: &Device) -> Level {
    match device.config {
        DeviceConfig::Relay { trigger } => trigger,
        _ => Level::High,
    }
}

impl DeviceDriver for RelayMachine {
    fn setup(
        &mut self,
        device: &mut Device,
        values: &mut DeviceValues,
        ctx: &mut SetupContext<'_>,
    ) -> Result<(), HubError> {
        claim_pins(device, ctx)?;
        let pin = primary_pin(device)?;
        ctx.hw.pins.write_digital(pin.pin, !trigger(device))?;
        values.set(0, "off");
        Ok(())
    }

    fn poll(&mut self, _device: &Device, _values: &mut DeviceValues, _ctx: &mut PollContext<'_>) -> u32 {
        0
    }

    fn command(
        &mut self,
        device: &Device,
        values: &mut DeviceValues,
        value: &str,
        ctx: &mut PollContext<'_>,
    ) -> Result<(), HubError> {
        let on = match value {
            "on" | "1" => true,
            "off" | "0" => false,
            other => {
                return Err(HubError::InvalidValue(format!(
                    "relay accepts on/off, got {other}"
                )));
            }
        };
        let pin = primary_pin(device)?;
        let level = if on { trigger(device) } else { !trigger(device) };
        ctx.hw.pins.write_digital(pin.pin, level)?;
        info!("relay {} on {} set {}", device.id, pin.pin, if on { "on" } else { "off" });

        values.set(0, if on { "on" } else { "off" });
        report(device, values, &[0], ctx);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::device::DeviceType;
    use crate::error::HubError;
    use crate::machines::rig::Rig;
    use crate::pins::{Level, PinId};

    const PIN: PinId = PinId::digital(8);

    #[test]
    fn active_high_relay_starts_low() {
        let mut rig = Rig::new(DeviceType::Relay, PIN, "");
        rig.setup();
        assert_eq!(rig.pins.level(PIN), Some(Level::Low));
        assert_eq!(rig.value(0), "off");

        rig.command("on").unwrap();
        assert_eq!(rig.pins.level(PIN), Some(Level::High));
        assert_eq!(rig.value(0), "on");
    }

    #[test]
    fn active_low_relay_inverts_levels() {
        let mut rig = Rig::new(DeviceType::Relay, PIN, "trigger=LOW").with_callback("/r/<state>");
        rig.setup();
        assert_eq!(rig.pins.level(PIN), Some(Level::High));

        rig.command("on").unwrap();
        assert_eq!(rig.pins.level(PIN), Some(Level::Low));
        rig.command("off").unwrap();
        assert_eq!(rig.pins.level(PIN), Some(Level::High));
        assert_eq!(rig.connector.paths(), vec!["/r/on", "/r/off"]);
    }

    #[test]
    fn rejects_unknown_command() {
        let mut rig = Rig::new(DeviceType::Relay, PIN, "");
        rig.setup();
        assert!(matches!(rig.command("toggle"), Err(HubError::InvalidValue(_))));
        assert_eq!(rig.value(0), "off");
    }

    #[test]
    fn polling_does_nothing() {
        let mut rig = Rig::new(DeviceType::Relay, PIN, "").with_callback("/r/<state>");
        rig.setup();
        assert_eq!(rig.poll(), 0);
        assert_eq!(rig.pins.level(PIN), Some(Level::Low));
        assert!(rig.connector.requests().is_empty());
    }
}
