use thiserror::Error;

use crate::mode::{Action, Mode};

/// Rejected call-site arguments. Never clamped silently.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid gain {name} = {value}: must be finite and >= 0")]
    InvalidGain { name: &'static str, value: f64 },
    #[error("invalid controller parameter {name} = {value}")]
    InvalidControllerParameter { name: &'static str, value: f64 },
    #[error("invalid setpoint {value}: must be within [0, {max}]")]
    InvalidSetpoint { value: f64, max: f64 },
    #[error("invalid duty {0}: must be within [0, 1]")]
    InvalidDuty(f64),
    #[error("invalid flow {value} SLM: must be within [0, {max}]")]
    InvalidFlow { value: f64, max: f64 },
    #[error("calibration offset {offset:.3} °C exceeds limit {limit:.3} °C")]
    CalibrationRejected { offset: f64, limit: f64 },
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BenchError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("device error: {0}")]
    Device(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("invalid transition: {action} is not allowed in {from}")]
    InvalidTransition { from: Mode, action: Action },
    #[error("measurement loop already running")]
    AlreadyRunning,
    #[error("measurement loop not running")]
    NotRunning,
    #[error("signal set mismatch (missing: {missing:?}, unexpected: {unexpected:?})")]
    SignalSetMismatch {
        missing: Vec<String>,
        unexpected: Vec<String>,
    },
    #[error("unknown signal: {0}")]
    UnknownSignal(String),
    #[error("no measurement available yet")]
    NoMeasurement,
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing device provider")]
    MissingProvider,
    #[error("simulation requested but no simulated bench was provided")]
    MissingFallback,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type BenchResult<T> = std::result::Result<T, BenchError>;
pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
