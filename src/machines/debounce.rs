use crate::backend::PinBackend;
use crate::error::HubError;
use crate::pins::{Level, PinId};

/// Lock-out debounce filter bound to one input pin.
///
/// A level change is accepted on the first read that sees it, provided at
/// least `interval_ms` passed since the previously accepted change; reads
/// inside that window are ignored.
#[derive(Debug, Clone)]
pub struct Debouncer {
    pin: PinId,
    interval_ms: u64,
    state: Level,
    last_change_ms: Option<u64>,
}

impl Debouncer {
    /// Binds to `pin`, taking its current level as the stable state.
    pub fn attach(pin: PinId, interval_ms: u64, pins: &dyn PinBackend) -> Result<Self, HubError> {
        Ok(Self {
            pin,
            interval_ms,
            state: pins.read_digital(pin)?,
            last_change_ms: None,
        })
    }

    /// Samples the pin; true when the debounced level changed.
    pub fn update(&mut self, pins: &dyn PinBackend, now_ms: u64) -> Result<bool, HubError> {
        let unlocked = self
            .last_change_ms
            .map(|t| now_ms.saturating_sub(t) >= self.interval_ms)
            .unwrap_or(true);
        if !unlocked {
            return Ok(false);
        }
        let level = pins.read_digital(self.pin)?;
        if level == self.state {
            return Ok(false);
        }
        self.state = level;
        self.last_change_ms = Some(now_ms);
        Ok(true)
    }

    pub fn read(&self) -> Level {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockPinBackend;
    use crate::pins::PinMode;

    fn input(pins: &MockPinBackend, pin: PinId) {
        pins.set_pin_mode(pin, PinMode::Input).unwrap();
    }

    #[test]
    fn reports_each_accepted_change_once() {
        let pins = MockPinBackend::default();
        let pin = PinId::digital(2);
        input(&pins, pin);
        let mut db = Debouncer::attach(pin, 20, &pins).unwrap();
        assert_eq!(db.read(), Level::Low);

        pins.set_level(pin, Level::High);
        assert!(db.update(&pins, 100).unwrap());
        assert_eq!(db.read(), Level::High);
        assert!(!db.update(&pins, 200).unwrap());
    }

    #[test]
    fn bounces_inside_the_window_are_ignored() {
        let pins = MockPinBackend::default();
        let pin = PinId::digital(2);
        input(&pins, pin);
        let mut db = Debouncer::attach(pin, 20, &pins).unwrap();

        pins.set_level(pin, Level::High);
        assert!(db.update(&pins, 100).unwrap());
        pins.set_level(pin, Level::Low);
        assert!(!db.update(&pins, 105).unwrap());
        pins.set_level(pin, Level::High);
        assert!(!db.update(&pins, 119).unwrap());
        assert_eq!(db.read(), Level::High);

        pins.set_level(pin, Level::Low);
        assert!(db.update(&pins, 120).unwrap());
        assert_eq!(db.read(), Level::Low);
    }

    #[test]
    fn unconfigured_pin_fails_to_attach() {
        let pins = MockPinBackend::default();
        assert!(Debouncer::attach(PinId::digital(9), 5, &pins).is_err());
    }
}
