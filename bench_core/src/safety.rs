//! Heater interlocks.
//!
//! `evaluate` is a pure function of the latest frame, the configured
//! limits and the duty about to be commanded. Interlocks are only armed
//! while that duty is non-zero: low flow with the heater off is the resting
//! state, not a fault. When both conditions hold, over-temperature wins.
use std::fmt;

use crate::frame::SensorFrame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SafetyFault {
    LowFlow,
    HighTemperature,
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::LowFlow => "low flow",
            Self::HighTemperature => "high temperature",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SafetyLimits {
    /// SLM
    pub lower_flow_limit: f64,
    /// °C, applied to both sensors
    pub upper_temperature_limit: f64,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            lower_flow_limit: 1.0,
            upper_temperature_limit: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interlock {
    Allow(f64),
    ForceZero(SafetyFault),
}

impl Interlock {
    /// Duty to apply after the decision.
    pub fn duty(&self) -> f64 {
        match *self {
            Self::Allow(d) => d,
            Self::ForceZero(_) => 0.0,
        }
    }

    pub fn fault(&self) -> Option<SafetyFault> {
        match *self {
            Self::Allow(_) => None,
            Self::ForceZero(f) => Some(f),
        }
    }
}

/// Decide whether `duty` may reach the heater given `frame`.
///
/// A reading that is not a number trips the corresponding interlock.
pub fn evaluate(frame: &SensorFrame, limits: &SafetyLimits, duty: f64) -> Interlock {
    if duty <= 0.0 || duty.is_nan() {
        return Interlock::Allow(0.0);
    }
    let within = |t: f64| t <= limits.upper_temperature_limit;
    if !(within(frame.temperature_1) && within(frame.temperature_2)) {
        return Interlock::ForceZero(SafetyFault::HighTemperature);
    }
    let flow_ok = frame.flow >= limits.lower_flow_limit;
    if !flow_ok {
        return Interlock::ForceZero(SafetyFault::LowFlow);
    }
    Interlock::Allow(duty)
}
