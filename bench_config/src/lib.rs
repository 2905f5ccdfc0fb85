#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for the flow bench.
//!
//! `Config` and its sections are deserialized from TOML and checked with
//! `Config::validate()`. Every section has defaults, so an empty file is a
//! valid simulation-only configuration.
use std::path::{Path, PathBuf};

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Sampling {
    /// Control cycle period (ms)
    pub period_ms: u64,
    /// Length of the measurement history window (s)
    pub buffer_interval_s: f64,
    /// Upper bound on one sensor acquisition (ms); must be below the period
    pub sensor_timeout_ms: u64,
}

impl Default for Sampling {
    fn default() -> Self {
        Self {
            period_ms: 200,
            buffer_interval_s: 60.0,
            sensor_timeout_ms: 150,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Safety {
    /// Heater is forced off below this flow (SLM)
    pub lower_flow_limit_slm: f64,
    /// Heater is forced off when either sensor exceeds this temperature (°C)
    pub upper_temperature_limit_c: f64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            lower_flow_limit_slm: 1.0,
            upper_temperature_limit_c: 60.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Discretization {
    #[default]
    Tustin,
    BackwardEuler,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Controller {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Derivative low-pass time constant τ (s)
    pub filter_time_constant_s: f64,
    pub output_min: f64,
    pub output_max: f64,
    /// Largest accepted temperature-differential setpoint (°C)
    pub max_target_delta_t_c: f64,
    pub discretization: Discretization,
}

impl Default for Controller {
    fn default() -> Self {
        Self {
            kp: 0.05,
            ki: 0.01,
            kd: 0.0,
            filter_time_constant_s: 1.0,
            output_min: 0.0,
            output_max: 1.0,
            max_target_delta_t_c: 30.0,
            discretization: Discretization::Tustin,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FlowEstimate {
    /// Specific heat of the medium (J/(kg·K))
    pub specific_heat_j_per_kg_k: f64,
    pub heater_resistance_ohm: f64,
    pub heater_voltage_v: f64,
    /// Converts kg/s into SLM for the medium
    pub conversion_constant: f64,
}

impl Default for FlowEstimate {
    fn default() -> Self {
        Self {
            specific_heat_j_per_kg_k: 1005.0,
            heater_resistance_ohm: 10.0,
            heater_voltage_v: 12.0,
            conversion_constant: 49_830.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Flow {
    pub nominal_slm: f64,
    pub max_slm: f64,
}

impl Default for Flow {
    fn default() -> Self {
        Self {
            nominal_slm: 10.0,
            max_slm: 50.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaterCfg {
    /// Width of the heater's duty register
    pub duty_resolution_bits: u8,
}

impl Default for HeaterCfg {
    fn default() -> Self {
        Self {
            duty_resolution_bits: 16,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Calibration {
    /// Offsets larger than this (°C) are rejected
    pub max_offset_c: f64,
    /// Number of buffered samples averaged when capturing the offset
    pub window: usize,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            max_offset_c: 0.5,
            window: 10,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Hardware {
    /// Skip the device probe and run on the simulated bench
    pub simulate: bool,
    pub thermo_port: Option<PathBuf>,
    pub flow_port: Option<PathBuf>,
    pub heater_port: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Simulation {
    pub ambient_c: f64,
    pub humidity_pct: f64,
    pub time_constant_s: f64,
    pub noise_c: f64,
    pub seed: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            ambient_c: 22.0,
            humidity_pct: 40.0,
            time_constant_s: 8.0,
            noise_c: 0.02,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct Config {
    pub sampling: Sampling,
    pub safety: Safety,
    pub controller: Controller,
    pub flow_estimate: FlowEstimate,
    pub flow: Flow,
    pub heater: HeaterCfg,
    pub calibration: Calibration,
    pub hardware: Hardware,
    pub simulation: Simulation,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_file(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = load_toml(&text).wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()
        .wrap_err_with(|| format!("invalid configuration in {}", path.display()))?;
    Ok(cfg)
}

fn positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn non_negative(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Sampling
        let s = &self.sampling;
        if s.period_ms == 0 {
            eyre::bail!("sampling.period_ms must be > 0");
        }
        if s.sensor_timeout_ms == 0 {
            eyre::bail!("sampling.sensor_timeout_ms must be >= 1");
        }
        if s.sensor_timeout_ms >= s.period_ms {
            eyre::bail!("sampling.sensor_timeout_ms must be < sampling.period_ms");
        }
        if !positive(s.buffer_interval_s) {
            eyre::bail!("sampling.buffer_interval_s must be > 0");
        }
        if s.buffer_interval_s * 1000.0 < s.period_ms as f64 {
            eyre::bail!("sampling.buffer_interval_s must cover at least one period");
        }

        // Safety
        if !non_negative(self.safety.lower_flow_limit_slm) {
            eyre::bail!("safety.lower_flow_limit_slm must be >= 0");
        }
        if !self.safety.upper_temperature_limit_c.is_finite() {
            eyre::bail!("safety.upper_temperature_limit_c must be finite");
        }

        // Controller
        let c = &self.controller;
        for (name, v) in [("kp", c.kp), ("ki", c.ki), ("kd", c.kd)] {
            if !non_negative(v) {
                eyre::bail!("controller.{name} must be >= 0");
            }
        }
        if !positive(c.filter_time_constant_s) {
            eyre::bail!("controller.filter_time_constant_s must be > 0");
        }
        if !(c.output_min.is_finite() && c.output_max.is_finite()) {
            eyre::bail!("controller output limits must be finite");
        }
        if c.output_min < 0.0 || c.output_max > 1.0 || c.output_min >= c.output_max {
            eyre::bail!("controller output limits must satisfy 0 <= output_min < output_max <= 1");
        }
        if !positive(c.max_target_delta_t_c) {
            eyre::bail!("controller.max_target_delta_t_c must be > 0");
        }

        // Flow estimate
        let f = &self.flow_estimate;
        for (name, v) in [
            ("specific_heat_j_per_kg_k", f.specific_heat_j_per_kg_k),
            ("heater_resistance_ohm", f.heater_resistance_ohm),
            ("heater_voltage_v", f.heater_voltage_v),
            ("conversion_constant", f.conversion_constant),
        ] {
            if !positive(v) {
                eyre::bail!("flow_estimate.{name} must be > 0");
            }
        }

        // Flow
        if !non_negative(self.flow.nominal_slm) {
            eyre::bail!("flow.nominal_slm must be >= 0");
        }
        if !positive(self.flow.max_slm) {
            eyre::bail!("flow.max_slm must be > 0");
        }
        if self.flow.nominal_slm > self.flow.max_slm {
            eyre::bail!("flow.nominal_slm must not exceed flow.max_slm");
        }

        // Heater
        if !(1..=32).contains(&self.heater.duty_resolution_bits) {
            eyre::bail!("heater.duty_resolution_bits must be in 1..=32");
        }

        // Calibration
        if !positive(self.calibration.max_offset_c) {
            eyre::bail!("calibration.max_offset_c must be > 0");
        }
        if self.calibration.window == 0 {
            eyre::bail!("calibration.window must be >= 1");
        }

        // Simulation
        let sim = &self.simulation;
        if !positive(sim.time_constant_s) {
            eyre::bail!("simulation.time_constant_s must be > 0");
        }
        if !non_negative(sim.noise_c) {
            eyre::bail!("simulation.noise_c must be >= 0");
        }
        if !(sim.ambient_c.is_finite() && (0.0..=100.0).contains(&sim.humidity_pct)) {
            eyre::bail!("simulation ambient/humidity out of range");
        }

        // Logging
        if let Some(rot) = self.logging.rotation.as_deref()
            && !matches!(rot, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
