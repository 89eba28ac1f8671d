use super::{
    DeviceDriver, PollContext, SetupContext, adjust_percent, claim_pins, primary_pin, report,
};
use crate::backend::DALLAS_DISCONNECTED_C;
use crate::device::{Device, DeviceConfig, DeviceValues};
use crate::error::HubError;

/// Power-on reset value of the probe's scratchpad.
const POWER_ON_RESET_C: f32 = 85.0;

fn is_sentinel(temp_c: f32) -> bool {
    temp_c == DALLAS_DISCONNECTED_C || temp_c == POWER_ON_RESET_C
}

/// Two-phase one-wire read: a poll with no conversion pending starts one;
/// the first poll after its wait time elapsed collects the result.
#[derive(Debug, Default)]
pub struct DallasMachine {
    /// Non-zero while a conversion is pending.
    conversion_wait_ms: u32,
    last_measurement_ms: u64,
}

impl DeviceDriver for DallasMachine {
    fn setup(
        &mut self,
        device: &mut Device,
        values: &mut DeviceValues,
        ctx: &mut SetupContext<'_>,
    ) -> Result<(), HubError> {
        claim_pins(device, ctx)?;
        self.conversion_wait_ms = 0;
        self.last_measurement_ms = ctx.hw.clock.now_ms();
        values.set(0, "0.0");
        Ok(())
    }

    fn poll(&mut self, device: &Device, values: &mut DeviceValues, ctx: &mut PollContext<'_>) -> u32 {
        let pin = match primary_pin(device) {
            Ok(pin) => pin,
            Err(e) => return ctx.warn(&e.to_string()),
        };

        if self.conversion_wait_ms == 0 {
            self.conversion_wait_ms = ctx.hw.sensors.dallas_request_conversion(pin.pin).max(1);
        }

        let now = ctx.now_ms();
        if now.saturating_sub(self.last_measurement_ms) <= u64::from(self.conversion_wait_ms) {
            return 0;
        }
        self.conversion_wait_ms = 0;
        self.last_measurement_ms = now;

        let temp_c = ctx.hw.sensors.dallas_read_temp_c(pin.pin);
        if is_sentinel(temp_c) {
            return ctx.warn(&format!("WARN: Could not read TEMP for device: {}", device.id));
        }

        let adj = match device.config {
            DeviceConfig::Dallas { temp_adj } => temp_adj,
            _ => 0.0,
        };
        values.set(0, format!("{:.1}", adjust_percent(temp_c, adj)));
        report(device, values, &[0], ctx);
        0
    }
}
