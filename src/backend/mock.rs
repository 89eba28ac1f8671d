use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use parking_lot::Mutex as PLMutex;

use super::{Clock, DALLAS_DISCONNECTED_C, PinBackend, SensorBus};
use crate::callback::{Connection, Connector};
use crate::error::HubError;
use crate::pins::{Level, PinId, PinMode};

const MOCK_DALLAS_CONVERSION_MS: u32 = 750;
const MOCK_DHT22_MIN_DELAY_MS: u32 = 2000;

#[derive(Default)]
pub struct MockPinBackend {
    pins: RwLock<HashMap<PinId, Mutex<MockPinState>>>, // keyed by pin id
}

#[derive(Clone)]
struct MockPinState {
    mode: Option<PinMode>,
    level: Level,
    analog: VecDeque<u16>,
    last_analog: u16,
}

impl MockPinState {
    fn new() -> Self {
        Self {
            mode: None,
            level: Level::Low,
            analog: VecDeque::new(),
            last_analog: 0,
        }
    }
}

impl MockPinBackend {
    fn with_pin<T>(
        &self,
        pin: PinId,
        f: impl FnOnce(&mut MockPinState) -> Result<T, HubError>,
    ) -> Result<T, HubError> {
        let mut pins = self
            .pins
            .write()
            .map_err(|e| HubError::Gpio(format!("lock poisoned: {e}")))?;
        let entry = pins
            .entry(pin)
            .or_insert_with(|| Mutex::new(MockPinState::new()));
        let mut state = entry
            .lock()
            .map_err(|e| HubError::Gpio(format!("lock poisoned: {e}")))?;
        f(&mut state)
    }

    /// Drives an input pin as an external signal would.
    pub fn set_level(&self, pin: PinId, level: Level) {
        let _ = self.with_pin(pin, |state| {
            state.level = level;
            Ok(())
        });
    }

    /// Queues raw samples returned by successive analog reads. Once the
    /// queue is drained the last sample repeats.
    pub fn push_analog(&self, pin: PinId, samples: &[u16]) {
        let _ = self.with_pin(pin, |state| {
            state.analog.extend(samples.iter().copied());
            Ok(())
        });
    }

    pub fn level(&self, pin: PinId) -> Option<Level> {
        self.with_pin(pin, |state| Ok(state.mode.map(|_| state.level)))
            .ok()
            .flatten()
    }

    pub fn mode(&self, pin: PinId) -> Option<PinMode> {
        self.with_pin(pin, |state| Ok(state.mode)).ok().flatten()
    }
}

impl PinBackend for MockPinBackend {
    fn set_pin_mode(&self, pin: PinId, mode: PinMode) -> Result<(), HubError> {
        self.with_pin(pin, |state| {
            if state.mode.is_none() && mode == PinMode::InputPullup {
                state.level = Level::High;
            }
            state.mode = Some(mode);
            Ok(())
        })
    }

    fn read_digital(&self, pin: PinId) -> Result<Level, HubError> {
        self.with_pin(pin, |state| match state.mode {
            Some(_) => Ok(state.level),
            None => Err(HubError::Gpio(format!(
                "pin {pin} not configured, set mode first"
            ))),
        })
    }

    fn write_digital(&self, pin: PinId, level: Level) -> Result<(), HubError> {
        self.with_pin(pin, |state| {
            if state.mode != Some(PinMode::Output) {
                return Err(HubError::Gpio(format!(
                    "pin {pin} must be in output mode to set value"
                )));
            }
            state.level = level;
            Ok(())
        })
    }

    fn read_analog(&self, pin: PinId) -> Result<u16, HubError> {
        self.with_pin(pin, |state| {
            if let Some(sample) = state.analog.pop_front() {
                state.last_analog = sample;
            }
            Ok(state.last_analog)
        })
    }
}

#[derive(Default)]
struct MockSensorState {
    dht22: HashMap<PinId, VecDeque<(f32, f32)>>,
    dallas: HashMap<PinId, VecDeque<f32>>,
    conversions: HashMap<PinId, usize>,
}

/// Scripted DHT22 and Dallas readings. Unscripted reads behave like a
/// missing sensor.
#[derive(Default)]
pub struct MockSensorBus {
    state: PLMutex<MockSensorState>,
}

impl MockSensorBus {
    pub fn push_dht22(&self, pin: PinId, temperature: f32, humidity: f32) {
        self.state
            .lock()
            .dht22
            .entry(pin)
            .or_default()
            .push_back((temperature, humidity));
    }

    pub fn push_dallas(&self, pin: PinId, temperature: f32) {
        self.state
            .lock()
            .dallas
            .entry(pin)
            .or_default()
            .push_back(temperature);
    }

    pub fn conversions(&self, pin: PinId) -> usize {
        self.state.lock().conversions.get(&pin).copied().unwrap_or(0)
    }
}

impl SensorBus for MockSensorBus {
    fn dht22_min_delay_ms(&self, _pin: PinId) -> u32 {
        MOCK_DHT22_MIN_DELAY_MS
    }

    fn read_dht22(&self, pin: PinId) -> (f32, f32) {
        self.state
            .lock()
            .dht22
            .get_mut(&pin)
            .and_then(VecDeque::pop_front)
            .unwrap_or((f32::NAN, f32::NAN))
    }

    fn dallas_request_conversion(&self, pin: PinId) -> u32 {
        *self.state.lock().conversions.entry(pin).or_default() += 1;
        MOCK_DALLAS_CONVERSION_MS
    }

    fn dallas_read_temp_c(&self, pin: PinId) -> f32 {
        self.state
            .lock()
            .dallas
            .get_mut(&pin)
            .and_then(VecDeque::pop_front)
            .unwrap_or(DALLAS_DISCONNECTED_C)
    }
}

/// Clock that only moves when told to. `delay_ms` advances it.
#[derive(Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn delay_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

#[derive(Debug, Clone)]
pub struct SentRequest {
    pub host: String,
    pub port: u16,
    pub request: String,
}

impl SentRequest {
    /// Target of the request line.
    pub fn path(&self) -> &str {
        self.request
            .lines()
            .next()
            .and_then(|line| line.split(' ').nth(1))
            .unwrap_or("")
    }
}

#[derive(Default)]
struct RecordingState {
    requests: Vec<SentRequest>,
    fail_connects: bool,
    keep_open: bool,
    closed: usize,
}

/// Connector capturing requests instead of opening sockets. Clones share
/// the same record.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    state: Arc<PLMutex<RecordingState>>,
}

impl RecordingConnector {
    pub fn requests(&self) -> Vec<SentRequest> {
        self.state.lock().requests.clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|r| r.path().to_string())
            .collect()
    }

    pub fn fail_connects(&self, fail: bool) {
        self.state.lock().fail_connects = fail;
    }

    /// Simulates a peer that never closes its side.
    pub fn keep_open(&self, open: bool) {
        self.state.lock().keep_open = open;
    }

    pub fn closed(&self) -> usize {
        self.state.lock().closed
    }
}

impl Connector for RecordingConnector {
    fn connect(&mut self, host: &str, port: u16) -> Result<Box<dyn Connection>, HubError> {
        if self.state.lock().fail_connects {
            return Err(HubError::Network(format!("connect {host}:{port} refused")));
        }
        Ok(Box::new(RecordingConnection {
            state: self.state.clone(),
            host: host.to_string(),
            port,
        }))
    }
}

struct RecordingConnection {
    state: Arc<PLMutex<RecordingState>>,
    host: String,
    port: u16,
}

impl Connection for RecordingConnection {
    fn is_open(&mut self) -> bool {
        self.state.lock().keep_open
    }

    fn send(&mut self, bytes: &[u8]) -> Result<(), HubError> {
        self.state.lock().requests.push(SentRequest {
            host: self.host.clone(),
            port: self.port,
            request: String::from_utf8_lossy(bytes).into_owned(),
        });
        Ok(())
    }

    fn close(&mut self) {
        self.state.lock().closed += 1;
    }
}
