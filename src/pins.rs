//! Physical pin identifiers and the allocator that keeps two devices from
//! claiming the same pin.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::HubError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PinBus {
    Digital,
    Analog,
}

impl PinBus {
    pub fn letter(self) -> char {
        match self {
            PinBus::Digital => 'D',
            PinBus::Analog => 'A',
        }
    }
}

/// A pin as written on the board: bus letter followed by the pin number,
/// e.g. `D13` or `A0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PinId {
    pub bus: PinBus,
    pub number: u8,
}

impl PinId {
    pub const fn digital(number: u8) -> Self {
        Self {
            bus: PinBus::Digital,
            number,
        }
    }

    pub const fn analog(number: u8) -> Self {
        Self {
            bus: PinBus::Analog,
            number,
        }
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.bus.letter(), self.number)
    }
}

impl FromStr for PinId {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let bus = match chars.next() {
            Some('D') => PinBus::Digital,
            Some('A') => PinBus::Analog,
            _ => return Err(HubError::InvalidValue(format!("Invalid pin id: {s}"))),
        };
        let number = chars
            .as_str()
            .parse::<u8>()
            .map_err(|_| HubError::InvalidValue(format!("Invalid pin id: {s}")))?;
        Ok(Self { bus, number })
    }
}

impl Serialize for PinId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum PinMode {
    #[default]
    #[serde(rename = "INPUT")]
    Input,
    #[serde(rename = "OUTPUT")]
    Output,
    #[serde(rename = "INPUT_PULLUP")]
    InputPullup,
}

impl PinMode {
    /// Unrecognised text falls back to `INPUT`.
    pub fn from_text(text: &str) -> Self {
        match text {
            "OUTPUT" => PinMode::Output,
            "INPUT_PULLUP" => PinMode::InputPullup,
            _ => PinMode::Input,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PinMode::Input => "INPUT",
            PinMode::Output => "OUTPUT",
            PinMode::InputPullup => "INPUT_PULLUP",
        }
    }

    pub fn code(self) -> u8 {
        match self {
            PinMode::Input => 0,
            PinMode::Output => 1,
            PinMode::InputPullup => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn is_high(self) -> bool {
        self == Level::High
    }
}

impl std::ops::Not for Level {
    type Output = Level;

    fn not(self) -> Level {
        match self {
            Level::Low => Level::High,
            Level::High => Level::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct PinSlot {
    used: bool,
    mode: PinMode,
}

/// Claim table over every digital and analog pin of the board.
///
/// The allocator records claims but never refuses one: callers creating a
/// device must check [`Pinout::is_used`] first. Restoring a backup
/// deliberately skips that check.
#[derive(Debug, Clone)]
pub struct Pinout {
    digital: Vec<PinSlot>,
    analog: Vec<PinSlot>,
}

impl Pinout {
    pub fn new(digital_pins: usize, analog_pins: usize) -> Self {
        Self {
            digital: vec![PinSlot::default(); digital_pins],
            analog: vec![PinSlot::default(); analog_pins],
        }
    }

    fn slot(&self, pin: PinId) -> Option<&PinSlot> {
        match pin.bus {
            PinBus::Digital => self.digital.get(pin.number as usize),
            PinBus::Analog => self.analog.get(pin.number as usize),
        }
    }

    fn slot_mut(&mut self, pin: PinId) -> Result<&mut PinSlot, HubError> {
        let slot = match pin.bus {
            PinBus::Digital => self.digital.get_mut(pin.number as usize),
            PinBus::Analog => self.analog.get_mut(pin.number as usize),
        };
        slot.ok_or_else(|| HubError::InvalidValue(format!("Pin {pin} does not exist")))
    }

    pub fn contains(&self, pin: PinId) -> bool {
        self.slot(pin).is_some()
    }

    pub fn claim(&mut self, pin: PinId, mode: PinMode) -> Result<(), HubError> {
        let slot = self.slot_mut(pin)?;
        slot.used = true;
        slot.mode = mode;
        Ok(())
    }

    pub fn release(&mut self, pin: PinId) {
        if let Ok(slot) = self.slot_mut(pin) {
            slot.used = false;
        }
    }

    pub fn release_all(&mut self) {
        self.digital.iter_mut().chain(self.analog.iter_mut()).for_each(|slot| {
            slot.used = false;
        });
    }

    pub fn is_claimed(&self, pin: PinId) -> bool {
        self.slot(pin).map(|s| s.used).unwrap_or(false)
    }

    /// Claim state for a textual pin id. Ids that do not parse or name a
    /// pin the board does not have are reported as free.
    pub fn is_used(&self, pin_id: &str) -> bool {
        pin_id
            .parse::<PinId>()
            .map(|pin| self.is_claimed(pin))
            .unwrap_or(false)
    }

    pub fn mode(&self, pin: PinId) -> Option<PinMode> {
        self.slot(pin).filter(|s| s.used).map(|s| s.mode)
    }

    pub fn claimed(&self) -> impl Iterator<Item = (PinId, PinMode)> + '_ {
        let digital = self
            .digital
            .iter()
            .enumerate()
            .filter(|(_, s)| s.used)
            .map(|(n, s)| (PinId::digital(n as u8), s.mode));
        let analog = self
            .analog
            .iter()
            .enumerate()
            .filter(|(_, s)| s.used)
            .map(|(n, s)| (PinId::analog(n as u8), s.mode));
        digital.chain(analog)
    }
}
