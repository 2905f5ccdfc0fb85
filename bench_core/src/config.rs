//! Runtime configuration of the bench core.
//!
//! These are the structs `Setup` consumes. They are separate from the
//! TOML-deserialized config in `bench_config`; see `conversions`.
use std::time::Duration;

use crate::error::BuildError;
use crate::flow::EstimatorConstants;
use crate::pid::{Discretization, PidSettings};
use crate::safety::SafetyLimits;

#[derive(Debug, Clone)]
pub struct SamplingCfg {
    /// Control cycle period.
    pub period: Duration,
    /// History window; capacity is `floor(buffer_interval / period)`.
    pub buffer_interval: Duration,
    /// Upper bound on one acquisition; must be shorter than `period`.
    pub sensor_timeout: Duration,
}

impl Default for SamplingCfg {
    fn default() -> Self {
        Self {
            period: Duration::from_millis(200),
            buffer_interval: Duration::from_secs(60),
            sensor_timeout: Duration::from_millis(150),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ControllerCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub filter_time_constant_s: f64,
    pub output_min: f64,
    pub output_max: f64,
    /// Largest accepted setpoint (°C).
    pub max_setpoint: f64,
    pub discretization: Discretization,
}

impl Default for ControllerCfg {
    fn default() -> Self {
        Self {
            kp: 0.05,
            ki: 0.01,
            kd: 0.0,
            filter_time_constant_s: 1.0,
            output_min: 0.0,
            output_max: 1.0,
            max_setpoint: 30.0,
            discretization: Discretization::Tustin,
        }
    }
}

impl ControllerCfg {
    pub fn pid_settings(&self, period: Duration) -> PidSettings {
        PidSettings {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
            filter_time_constant_s: self.filter_time_constant_s,
            sample_period_s: period.as_secs_f64(),
            output_min: self.output_min,
            output_max: self.output_max,
            discretization: self.discretization,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FlowCfg {
    /// Setpoint commanded by `set_nominal_flow` (SLM).
    pub nominal_slm: f64,
    pub max_slm: f64,
}

impl Default for FlowCfg {
    fn default() -> Self {
        Self {
            nominal_slm: 10.0,
            max_slm: 50.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CalibrationCfg {
    /// Offsets with a larger magnitude are rejected (°C).
    pub max_offset_c: f64,
    /// Buffered samples averaged when capturing the offset.
    pub window: usize,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            max_offset_c: 0.5,
            window: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BenchCfg {
    pub sampling: SamplingCfg,
    pub safety: SafetyLimits,
    pub controller: ControllerCfg,
    pub estimator: EstimatorConstants,
    pub flow: FlowCfg,
    /// Width of the heater duty register (1..=32 bits).
    pub duty_resolution_bits: u8,
    pub calibration: CalibrationCfg,
    /// Go straight to the simulated bench without probing devices.
    pub simulate: bool,
}

impl Default for BenchCfg {
    fn default() -> Self {
        Self {
            sampling: SamplingCfg::default(),
            safety: SafetyLimits::default(),
            controller: ControllerCfg::default(),
            estimator: EstimatorConstants::default(),
            flow: FlowCfg::default(),
            duty_resolution_bits: 16,
            calibration: CalibrationCfg::default(),
            simulate: false,
        }
    }
}

impl BenchCfg {
    /// History capacity derived from the sampling settings.
    pub fn buffer_capacity(&self) -> usize {
        crate::util::capacity_for(self.sampling.buffer_interval, self.sampling.period)
    }

    /// Re-check the invariants the core relies on.
    pub fn validate(&self) -> Result<(), BuildError> {
        let s = &self.sampling;
        if s.period.is_zero() {
            return Err(BuildError::InvalidConfig("sampling period must be > 0"));
        }
        if s.sensor_timeout.is_zero() || s.sensor_timeout >= s.period {
            return Err(BuildError::InvalidConfig(
                "sensor timeout must be > 0 and shorter than the sampling period",
            ));
        }
        if self.buffer_capacity() == 0 {
            return Err(BuildError::InvalidConfig(
                "buffer interval must cover at least one sampling period",
            ));
        }
        let c = &self.controller;
        if ![c.kp, c.ki, c.kd].iter().all(|g| g.is_finite() && *g >= 0.0) {
            return Err(BuildError::InvalidConfig("gains must be finite and >= 0"));
        }
        if !(c.filter_time_constant_s.is_finite() && c.filter_time_constant_s > 0.0) {
            return Err(BuildError::InvalidConfig(
                "filter time constant must be > 0",
            ));
        }
        if !(c.output_min.is_finite() && c.output_max.is_finite())
            || c.output_min < 0.0
            || c.output_max > 1.0
            || c.output_min >= c.output_max
        {
            return Err(BuildError::InvalidConfig(
                "controller output limits must satisfy 0 <= min < max <= 1",
            ));
        }
        if !(c.max_setpoint.is_finite() && c.max_setpoint > 0.0) {
            return Err(BuildError::InvalidConfig("max setpoint must be > 0"));
        }
        if !(self.flow.max_slm.is_finite()
            && self.flow.max_slm > 0.0
            && (0.0..=self.flow.max_slm).contains(&self.flow.nominal_slm))
        {
            return Err(BuildError::InvalidConfig(
                "flow limits must satisfy 0 <= nominal <= max",
            ));
        }
        if !(1..=32).contains(&self.duty_resolution_bits) {
            return Err(BuildError::InvalidConfig(
                "duty resolution must be within 1..=32 bits",
            ));
        }
        if self.calibration.window == 0 {
            return Err(BuildError::InvalidConfig("calibration window must be >= 1"));
        }
        let lim = &self.safety;
        if !(lim.lower_flow_limit.is_finite() && lim.upper_temperature_limit.is_finite()) {
            return Err(BuildError::InvalidConfig("safety limits must be finite"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = BenchCfg::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.buffer_capacity(), 300);
    }

    #[test]
    fn rejects_timeout_not_shorter_than_period() {
        let mut cfg = BenchCfg::default();
        cfg.sampling.sensor_timeout = cfg.sampling.period;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_window_shorter_than_period() {
        let mut cfg = BenchCfg::default();
        cfg.sampling.buffer_interval = Duration::from_millis(100);
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("buffer interval"));
    }
}
