use super::{DeviceDriver, PollContext, SetupContext, claim_pins, primary_pin, report};
use crate::device::{AnalogConfig, Device, DeviceConfig, DeviceValues};
use crate::error::HubError;

const RAW_MAX: f64 = 1023.0;

/// Averages `readcnt` samples and rescales them from the raw ADC range to
/// the configured `[min, max]`.
pub struct AnalogMachine;

/// Sum of `samples` divided by `read_count`. With `remove_min_max` the
/// smallest and largest sample are dropped from the sum, but the divisor
/// stays `read_count`.
pub fn average_samples(samples: &[u16], read_count: u8, remove_min_max: bool) -> f64 {
    let read_count = read_count.max(1);
    let mut sum = 0.0;
    let mut min = u16::MAX;
    let mut max = u16::MIN;
    for &s in samples {
        min = min.min(s);
        max = max.max(s);
        sum += f64::from(s);
    }
    if remove_min_max && !samples.is_empty() {
        sum -= f64::from(min);
        sum -= f64::from(max);
    }
    sum / f64::from(read_count)
}

pub fn rescale(raw: f64, min: f32, max: f32) -> f64 {
    let (min, max) = (f64::from(min), f64::from(max));
    min + raw * (max - min) / RAW_MAX
}

impl AnalogMachine {
    fn sample(
        device: &Device,
        config: &AnalogConfig,
        ctx: &mut PollContext<'_>,
    ) -> Result<Vec<u16>, HubError> {
        let pin = primary_pin(device)?;
        let count = config.read_count.max(1);
        let mut samples = Vec::with_capacity(count as usize);
        for i in 0..count {
            if i > 0 {
                ctx.hw.clock.delay_ms(u64::from(config.read_delay_ms));
            }
            samples.push(ctx.hw.pins.read_analog(pin.pin)?);
        }
        Ok(samples)
    }
}

impl DeviceDriver for AnalogMachine {
    fn setup(
        &mut self,
        device: &mut Device,
        values: &mut DeviceValues,
        ctx: &mut SetupContext<'_>,
    ) -> Result<(), HubError> {
        claim_pins(device, ctx)?;
        values.set(0, "0.0");
        Ok(())
    }

    fn poll(&mut self, device: &Device, values: &mut DeviceValues, ctx: &mut PollContext<'_>) -> u32 {
        let config = match device.config {
            DeviceConfig::Analog(config) => config,
            _ => AnalogConfig::default(),
        };
        let samples = match Self::sample(device, &config, ctx) {
            Ok(samples) => samples,
            Err(e) => return ctx.warn(&format!("Reading device {} failed: {e}", device.id)),
        };
        let raw = average_samples(&samples, config.read_count, config.remove_min_max);
        let value = rescale(raw, config.min, config.max);
        values.set(0, format!("{value:.2}"));
        report(device, values, &[0], ctx);
        0
    }
}
