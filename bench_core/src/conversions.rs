//! `From` implementations bridging `bench_config` types to `bench_core` types.

use std::time::Duration;

use crate::config::{BenchCfg, CalibrationCfg, ControllerCfg, FlowCfg, SamplingCfg};
use crate::flow::EstimatorConstants;
use crate::pid::Discretization;
use crate::safety::SafetyLimits;

// ── Sampling ─────────────────────────────────────────────────────────────────

impl From<&bench_config::Sampling> for SamplingCfg {
    fn from(c: &bench_config::Sampling) -> Self {
        Self {
            period: Duration::from_millis(c.period_ms),
            // Validated finite and positive by bench_config.
            buffer_interval: Duration::try_from_secs_f64(c.buffer_interval_s)
                .unwrap_or(Duration::ZERO),
            sensor_timeout: Duration::from_millis(c.sensor_timeout_ms),
        }
    }
}

// ── Safety ───────────────────────────────────────────────────────────────────

impl From<&bench_config::Safety> for SafetyLimits {
    fn from(c: &bench_config::Safety) -> Self {
        Self {
            lower_flow_limit: c.lower_flow_limit_slm,
            upper_temperature_limit: c.upper_temperature_limit_c,
        }
    }
}

// ── Controller ───────────────────────────────────────────────────────────────

impl From<bench_config::Discretization> for Discretization {
    fn from(d: bench_config::Discretization) -> Self {
        match d {
            bench_config::Discretization::Tustin => Discretization::Tustin,
            bench_config::Discretization::BackwardEuler => Discretization::BackwardEuler,
        }
    }
}

impl From<&bench_config::Controller> for ControllerCfg {
    fn from(c: &bench_config::Controller) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
            filter_time_constant_s: c.filter_time_constant_s,
            output_min: c.output_min,
            output_max: c.output_max,
            max_setpoint: c.max_target_delta_t_c,
            discretization: c.discretization.into(),
        }
    }
}

// ── Flow ─────────────────────────────────────────────────────────────────────

impl From<&bench_config::FlowEstimate> for EstimatorConstants {
    fn from(c: &bench_config::FlowEstimate) -> Self {
        Self {
            specific_heat: c.specific_heat_j_per_kg_k,
            resistance: c.heater_resistance_ohm,
            voltage: c.heater_voltage_v,
            conversion_constant: c.conversion_constant,
        }
    }
}

impl From<&bench_config::Flow> for FlowCfg {
    fn from(c: &bench_config::Flow) -> Self {
        Self {
            nominal_slm: c.nominal_slm,
            max_slm: c.max_slm,
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

impl From<&bench_config::Calibration> for CalibrationCfg {
    fn from(c: &bench_config::Calibration) -> Self {
        Self {
            max_offset_c: c.max_offset_c,
            window: c.window,
        }
    }
}

// ── BenchCfg ─────────────────────────────────────────────────────────────────

impl From<&bench_config::Config> for BenchCfg {
    fn from(c: &bench_config::Config) -> Self {
        Self {
            sampling: (&c.sampling).into(),
            safety: (&c.safety).into(),
            controller: (&c.controller).into(),
            estimator: (&c.flow_estimate).into(),
            flow: (&c.flow).into(),
            duty_resolution_bits: c.heater.duty_resolution_bits,
            calibration: (&c.calibration).into(),
            simulate: c.hardware.simulate,
        }
    }
}
