//! Observable state of the bench, returned by `Setup::status` and
//! `Setup::run_cycle`.
use std::fmt;

use crate::mode::Mode;
use crate::pid::Gains;
use crate::safety::SafetyFault;

/// Conditions that forced the heater to zero for a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    LowFlow,
    HighTemperature,
    /// A bounded sensor acquisition expired.
    SensorTimeout,
    /// A device call failed or returned an unusable value.
    DeviceError,
}

impl From<SafetyFault> for Fault {
    fn from(f: SafetyFault) -> Self {
        match f {
            SafetyFault::LowFlow => Fault::LowFlow,
            SafetyFault::HighTemperature => Fault::HighTemperature,
        }
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LowFlow => "low flow",
            Self::HighTemperature => "high temperature",
            Self::SensorTimeout => "sensor timeout",
            Self::DeviceError => "device error",
        })
    }
}

/// Number of cycles in which each fault forced the heater off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FaultCounters {
    pub low_flow: u64,
    pub high_temperature: u64,
    pub sensor_timeout: u64,
    pub device_error: u64,
}

impl FaultCounters {
    pub fn record(&mut self, fault: Fault) {
        let slot = match fault {
            Fault::LowFlow => &mut self.low_flow,
            Fault::HighTemperature => &mut self.high_temperature,
            Fault::SensorTimeout => &mut self.sensor_timeout,
            Fault::DeviceError => &mut self.device_error,
        };
        *slot = slot.saturating_add(1);
    }

    pub fn total(&self) -> u64 {
        self.low_flow
            .saturating_add(self.high_temperature)
            .saturating_add(self.sensor_timeout)
            .saturating_add(self.device_error)
    }
}

/// What one control cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// Frame built; `duty` is what the heater accepted and `fault` is set
    /// when an interlock fired or the heater write failed.
    Completed { duty: f64, fault: Option<Fault> },
    /// No usable measurement; heater forced to zero, nothing appended.
    AcquisitionFailed { fault: Fault },
    /// The loop is stopping; nothing was done.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BenchStatus {
    pub mode: Mode,
    /// Duty last written to the heater
    pub applied_duty: f64,
    pub manual_duty: f64,
    pub setpoint: f64,
    pub gains: Gains,
    pub calibration_offset: f64,
    pub active_fault: Option<Fault>,
    pub faults: FaultCounters,
    /// Scheduler slots skipped because a cycle overran its period
    pub overruns: u64,
    pub simulated: bool,
    pub running: bool,
    pub buffering: bool,
    pub history_len: usize,
}
