use super::{DeviceDriver, PollContext, SetupContext, claim_pins, primary_pin, report};
use crate::device::{Device, DeviceValues};
use crate::error::HubError;

/// Reports the raw pin level as `0`/`1` on every poll.
pub struct DigitalMachine;

impl DeviceDriver for DigitalMachine {
    fn setup(
        &mut self,
        device: &mut Device,
        values: &mut DeviceValues,
        ctx: &mut SetupContext<'_>,
    ) -> Result<(), HubError> {
        claim_pins(device, ctx)?;
        values.set(0, "0");
        Ok(())
    }

    fn poll(&mut self, device: &Device, values: &mut DeviceValues, ctx: &mut PollContext<'_>) -> u32 {
        let level = match primary_pin(device).and_then(|p| ctx.hw.pins.read_digital(p.pin)) {
            Ok(level) => level,
            Err(e) => return ctx.warn(&format!("Reading device {} failed: {e}", device.id)),
        };
        values.set(0, if level.is_high() { "1" } else { "0" });
        report(device, values, &[0], ctx);
        0
    }
}
