//! Device doubles for tests and benchmarks.
//!
//! Every double is `Clone` and shares its state between clones, so a test
//! keeps one handle to steer or inspect the device while the core owns the
//! other.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bench_traits::{
    DeviceHandles, DeviceProvider, DeviceResult, DualReading, FlowController, Heater,
    ThermoHygrometer,
};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
struct Script {
    queue: VecDeque<DualReading>,
    last: DualReading,
    reads: u64,
}

/// Plays back queued readings, then repeats the last one.
#[derive(Debug, Clone)]
pub struct ScriptedThermo {
    script: Arc<Mutex<Script>>,
}

impl ScriptedThermo {
    pub fn new(readings: Vec<DualReading>) -> Self {
        let last = readings.last().copied().unwrap_or(DualReading {
            temperature_1: 20.0,
            humidity_1: 40.0,
            temperature_2: 20.0,
            humidity_2: 40.0,
        });
        Self {
            script: Arc::new(Mutex::new(Script {
                queue: readings.into(),
                last,
                reads: 0,
            })),
        }
    }

    pub fn constant(reading: DualReading) -> Self {
        Self::new(vec![reading])
    }

    /// Replace whatever is queued with a single steady reading.
    pub fn set(&self, reading: DualReading) {
        let mut s = lock(&self.script);
        s.queue.clear();
        s.last = reading;
    }

    pub fn push(&self, reading: DualReading) {
        lock(&self.script).queue.push_back(reading);
    }

    pub fn reads(&self) -> u64 {
        lock(&self.script).reads
    }
}

impl ThermoHygrometer for ScriptedThermo {
    fn read_dual(&mut self, _timeout: Duration) -> DeviceResult<DualReading> {
        let mut s = lock(&self.script);
        s.reads += 1;
        if let Some(r) = s.queue.pop_front() {
            s.last = r;
        }
        Ok(s.last)
    }
}

/// Sleeps `delay` before every read, ignoring the caller's timeout.
#[derive(Debug, Clone)]
pub struct HangingThermo {
    delay: Duration,
    reading: DualReading,
}

impl HangingThermo {
    pub fn new(delay: Duration, reading: DualReading) -> Self {
        Self { delay, reading }
    }
}

impl ThermoHygrometer for HangingThermo {
    fn read_dual(&mut self, _timeout: Duration) -> DeviceResult<DualReading> {
        std::thread::sleep(self.delay);
        Ok(self.reading)
    }
}

/// Always fails with `message`.
#[derive(Debug, Clone)]
pub struct FailingThermo {
    pub message: String,
}

impl ThermoHygrometer for FailingThermo {
    fn read_dual(&mut self, _timeout: Duration) -> DeviceResult<DualReading> {
        Err(self.message.clone().into())
    }
}

/// Flow controller whose measured flow equals the last setpoint.
#[derive(Debug, Clone)]
pub struct SettableFlow {
    slm: Arc<Mutex<f64>>,
}

impl SettableFlow {
    pub fn new(slm: f64) -> Self {
        Self {
            slm: Arc::new(Mutex::new(slm)),
        }
    }

    pub fn current(&self) -> f64 {
        *lock(&self.slm)
    }

    /// Change the measured flow behind the core's back.
    pub fn force(&self, slm: f64) {
        *lock(&self.slm) = slm;
    }
}

impl FlowController for SettableFlow {
    fn read_flow(&mut self, _timeout: Duration) -> DeviceResult<f64> {
        Ok(self.current())
    }

    fn set_flow(&mut self, slm: f64, _timeout: Duration) -> DeviceResult<()> {
        self.force(slm);
        Ok(())
    }
}

/// Records every raw duty written.
#[derive(Debug, Clone, Default)]
pub struct RecordingHeater {
    writes: Arc<Mutex<Vec<u32>>>,
}

impl RecordingHeater {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> Vec<u32> {
        lock(&self.writes).clone()
    }

    pub fn last(&self) -> Option<u32> {
        lock(&self.writes).last().copied()
    }
}

impl Heater for RecordingHeater {
    fn write_duty(&mut self, raw: u32, _timeout: Duration) -> DeviceResult<()> {
        lock(&self.writes).push(raw);
        Ok(())
    }
}

/// Rejects raw duties above `limit` until healed; accepted writes are
/// recorded.
#[derive(Debug, Clone, Default)]
pub struct FlakyHeater {
    accepted: RecordingHeater,
    limit: Arc<Mutex<Option<u32>>>,
}

impl FlakyHeater {
    pub fn rejecting_above(limit: u32) -> Self {
        Self {
            accepted: RecordingHeater::new(),
            limit: Arc::new(Mutex::new(Some(limit))),
        }
    }

    /// Accept every write from now on.
    pub fn heal(&self) {
        *lock(&self.limit) = None;
    }

    pub fn writes(&self) -> Vec<u32> {
        self.accepted.writes()
    }

    pub fn last(&self) -> Option<u32> {
        self.accepted.last()
    }
}

impl Heater for FlakyHeater {
    fn write_duty(&mut self, raw: u32, timeout: Duration) -> DeviceResult<()> {
        if let Some(limit) = *lock(&self.limit)
            && raw > limit
        {
            return Err(format!("heater rejected duty {raw}").into());
        }
        self.accepted.write_duty(raw, timeout)
    }
}

/// Hands out prepared handles once.
#[derive(Debug, Default)]
pub struct MockProvider {
    handles: Option<DeviceHandles>,
}

impl MockProvider {
    pub fn new(
        thermo: impl ThermoHygrometer + Send + 'static,
        flow: impl FlowController + Send + 'static,
        heater: impl Heater + Send + 'static,
    ) -> Self {
        Self {
            handles: Some(DeviceHandles {
                thermo: Box::new(thermo),
                flow: Box::new(flow),
                heater: Box::new(heater),
            }),
        }
    }
}

impl DeviceProvider for MockProvider {
    fn open_devices(&mut self) -> DeviceResult<DeviceHandles> {
        self.handles
            .take()
            .ok_or_else(|| "devices unavailable: already opened".into())
    }
}

/// Provider whose `open_devices` always fails with `message`.
#[derive(Debug, Clone)]
pub struct FailingProvider {
    pub message: String,
}

impl DeviceProvider for FailingProvider {
    fn open_devices(&mut self) -> DeviceResult<DeviceHandles> {
        Err(self.message.clone().into())
    }
}
