//! Discrete PID controller with a low-pass filtered derivative.
//!
//! The continuous controller is
//!
//! ```text
//! C(s) = Kp + Ki/s + Kd·N·s / (s + N),    N = 1/τ
//! ```
//!
//! discretized as a single second-order IIR filter
//!
//! ```text
//! u[k] = -a1·u[k-1] - a2·u[k-2] + b0·e[k] + b1·e[k-1] + b2·e[k-2]
//! ```
//!
//! using either the bilinear (Tustin) or backward-Euler substitution for
//! `s`. `Kd` multiplies the derivative of the error; there is no hidden sign
//! flip. Coefficients are recomputed lazily after a gain, `τ` or
//! discretization change, never on an unchanged tick.
//!
//! Anti-windup is by clamping: the output is clamped to `[lo, hi]` and the
//! *clamped* value is what enters `u[k-1]` for the next step. The integral
//! is never frozen separately; because the recursion is driven by the
//! clamped history, the implied integral state stops growing while the
//! output sits on a limit.

use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Discretization {
    /// Bilinear transform `s = (2/Ts)·(1 - z⁻¹)/(1 + z⁻¹)`.
    #[default]
    Tustin,
    /// `s = (1 - z⁻¹)/Ts`.
    BackwardEuler,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidSettings {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Derivative filter time constant τ (s)
    pub filter_time_constant_s: f64,
    /// Ts (s)
    pub sample_period_s: f64,
    pub output_min: f64,
    pub output_max: f64,
    pub discretization: Discretization,
}

impl Default for PidSettings {
    fn default() -> Self {
        Self {
            kp: 0.05,
            ki: 0.01,
            kd: 0.0,
            filter_time_constant_s: 1.0,
            sample_period_s: 0.2,
            output_min: 0.0,
            output_max: 1.0,
            discretization: Discretization::Tustin,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

/// Result of one update: the clamped output and its decomposition.
///
/// `p = Kp·e`, `d` is the filtered derivative term, and `i` is whatever
/// remains of the clamped output, so `p + i + d == output`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PidOutput {
    pub output: f64,
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

#[derive(Debug, Clone, Copy, Default)]
struct Coefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    /// d[k] = d_pole·d[k-1] + d_gain·(e[k] - e[k-1])
    d_pole: f64,
    d_gain: f64,
}

impl Coefficients {
    fn compute(s: &PidSettings) -> Self {
        let (kp, ki, kd) = (s.kp, s.ki, s.kd);
        let ts = s.sample_period_s;
        let n = 1.0 / s.filter_time_constant_s;
        let nts = n * ts;
        match s.discretization {
            Discretization::Tustin => {
                let a0 = 2.0 + nts;
                let beta = 2.0 - nts;
                let ki_half = ki * ts / 2.0;
                Self {
                    b0: kp + ki_half + 2.0 * kd * n / a0,
                    b1: (-4.0 * kp + 2.0 * ki_half * nts - 4.0 * kd * n) / a0,
                    b2: (kp * beta - ki_half * beta + 2.0 * kd * n) / a0,
                    a1: -4.0 / a0,
                    a2: beta / a0,
                    d_pole: beta / a0,
                    d_gain: 2.0 * kd * n / a0,
                }
            }
            Discretization::BackwardEuler => {
                let a0 = 1.0 + nts;
                Self {
                    b0: (kp * a0 + ki * ts * a0 + kd * n) / a0,
                    b1: -(kp * (2.0 + nts) + ki * ts + 2.0 * kd * n) / a0,
                    b2: (kp + kd * n) / a0,
                    a1: -(2.0 + nts) / a0,
                    a2: 1.0 / a0,
                    d_pole: 1.0 / a0,
                    d_gain: kd * n / a0,
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PidController {
    settings: PidSettings,
    setpoint: f64,
    coeffs: Coefficients,
    dirty: bool,
    /// e[k-1], e[k-2]
    errors: [f64; 2],
    /// u[k-1], u[k-2] (clamped)
    outputs: [f64; 2],
    /// Filtered derivative term d[k-1]
    d_prev: f64,
}

fn check_gain(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidGain { name, value })
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<f64, ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(value)
    } else {
        Err(ConfigError::InvalidControllerParameter { name, value })
    }
}

impl PidController {
    pub fn new(settings: PidSettings) -> Result<Self, ConfigError> {
        check_gain("kp", settings.kp)?;
        check_gain("ki", settings.ki)?;
        check_gain("kd", settings.kd)?;
        check_positive("filter_time_constant_s", settings.filter_time_constant_s)?;
        check_positive("sample_period_s", settings.sample_period_s)?;
        let (lo, hi) = (settings.output_min, settings.output_max);
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(ConfigError::InvalidControllerParameter {
                name: "output_min",
                value: lo,
            });
        }
        Ok(Self {
            settings,
            setpoint: 0.0,
            coeffs: Coefficients::compute(&settings),
            dirty: false,
            errors: [0.0; 2],
            outputs: [0.0; 2],
            d_prev: 0.0,
        })
    }

    /// One controller step for `measurement`.
    ///
    /// A non-finite measurement yields the lower output limit and leaves
    /// the history untouched.
    pub fn update(&mut self, measurement: f64) -> PidOutput {
        let (lo, hi) = (self.settings.output_min, self.settings.output_max);
        let e = self.setpoint - measurement;
        if !e.is_finite() {
            return PidOutput {
                output: lo,
                ..PidOutput::default()
            };
        }
        if self.dirty {
            self.coeffs = Coefficients::compute(&self.settings);
            self.dirty = false;
        }
        let c = self.coeffs;
        let [e1, e2] = self.errors;
        let [u1, u2] = self.outputs;

        let raw = -c.a1 * u1 - c.a2 * u2 + c.b0 * e + c.b1 * e1 + c.b2 * e2;
        let u = if raw.is_nan() { lo } else { raw.clamp(lo, hi) };

        let mut p = self.settings.kp * e;
        let mut d = c.d_pole * self.d_prev + c.d_gain * (e - e1);
        if !d.is_finite() {
            d = 0.0;
        }
        let mut i = u - p - d;
        // Huge gains can overflow the breakdown; `u` itself is always clamped.
        if !(p.is_finite() && i.is_finite()) {
            p = 0.0;
            i = u - d;
        }

        self.errors = [e, e1];
        self.outputs = [u, u1];
        self.d_prev = d;

        PidOutput {
            output: u,
            p,
            i,
            d,
        }
    }

    /// Forget all history; gains, limits and setpoint are kept.
    pub fn reset(&mut self) {
        self.errors = [0.0; 2];
        self.outputs = [0.0; 2];
        self.d_prev = 0.0;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn set_kp(&mut self, kp: f64) -> Result<(), ConfigError> {
        self.settings.kp = check_gain("kp", kp)?;
        self.dirty = true;
        Ok(())
    }

    pub fn set_ki(&mut self, ki: f64) -> Result<(), ConfigError> {
        self.settings.ki = check_gain("ki", ki)?;
        self.dirty = true;
        Ok(())
    }

    pub fn set_kd(&mut self, kd: f64) -> Result<(), ConfigError> {
        self.settings.kd = check_gain("kd", kd)?;
        self.dirty = true;
        Ok(())
    }

    pub fn set_filter_time_constant(&mut self, tau_s: f64) -> Result<(), ConfigError> {
        self.settings.filter_time_constant_s = check_positive("filter_time_constant_s", tau_s)?;
        self.dirty = true;
        Ok(())
    }

    pub fn set_discretization(&mut self, d: Discretization) {
        if self.settings.discretization != d {
            self.settings.discretization = d;
            self.dirty = true;
        }
    }

    pub fn gains(&self) -> Gains {
        Gains {
            kp: self.settings.kp,
            ki: self.settings.ki,
            kd: self.settings.kd,
        }
    }

    pub fn settings(&self) -> &PidSettings {
        &self.settings
    }
}
