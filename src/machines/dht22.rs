use log::info;

use super::{
    DeviceDriver, PollContext, SetupContext, adjust_percent, claim_pins, primary_pin, report,
};
use crate::device::{Device, DeviceConfig, DeviceValues};
use crate::error::HubError;

/// Temperature and humidity from a DHT22. A channel that fails to read
/// keeps its previous value; the callback only fires when both channels
/// read this poll.
pub struct Dht22Machine;

impl DeviceDriver for Dht22Machine {
    fn setup(
        &mut self,
        device: &mut Device,
        values: &mut DeviceValues,
        ctx: &mut SetupContext<'_>,
    ) -> Result<(), HubError> {
        claim_pins(device, ctx)?;
        let pin = primary_pin(device)?;

        let min_delay = ctx.hw.sensors.dht22_min_delay_ms(pin.pin);
        info!("DHT22 on {} DELAY: {min_delay}", pin.pin);
        let min_delay = i32::try_from(min_delay).unwrap_or(i32::MAX);
        if min_delay > device.poll_interval_ms {
            device.poll_interval_ms = min_delay;
        }

        values.set(0, "0.0");
        values.set(1, "0.0");
        Ok(())
    }

    fn poll(&mut self, device: &Device, values: &mut DeviceValues, ctx: &mut PollContext<'_>) -> u32 {
        let pin = match primary_pin(device) {
            Ok(pin) => pin,
            Err(e) => return ctx.warn(&e.to_string()),
        };
        let (temp_adj, humid_adj) = match device.config {
            DeviceConfig::Dht22 {
                temp_adj,
                humid_adj,
            } => (temp_adj, humid_adj),
            _ => (0.0, 0.0),
        };

        let (temperature, humidity) = ctx.hw.sensors.read_dht22(pin.pin);
        let mut warnings = 0;
        let mut both = true;

        if temperature.is_nan() {
            warnings += ctx.warn("Reading DHT22 TEMP failed!");
            both = false;
        } else {
            values.set(0, format!("{:.1}", adjust_percent(temperature, temp_adj)));
        }

        if humidity.is_nan() {
            warnings += ctx.warn("Reading DHT22 HUMID failed!");
            both = false;
        } else {
            values.set(1, format!("{:.1}", adjust_percent(humidity, humid_adj)));
        }

        if both {
            report(device, values, &[0, 1], ctx);
        }
        warnings
    }
}
