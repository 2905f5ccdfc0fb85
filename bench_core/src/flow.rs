//! Mass-flow estimate from the heater's energy balance.

/// Physical constants of the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConstants {
    /// J/(kg·K)
    pub specific_heat: f64,
    /// Ω
    pub resistance: f64,
    /// V
    pub voltage: f64,
    /// kg/s → SLM for the medium
    pub conversion_constant: f64,
}

impl Default for EstimatorConstants {
    fn default() -> Self {
        Self {
            specific_heat: 1005.0,
            resistance: 10.0,
            voltage: 12.0,
            conversion_constant: 49_830.0,
        }
    }
}

impl EstimatorConstants {
    #[inline]
    pub fn estimate(&self, delta_t: f64, duty_cycle: f64) -> f64 {
        estimate(
            delta_t,
            duty_cycle,
            self.specific_heat,
            self.resistance,
            self.voltage,
            self.conversion_constant,
        )
    }
}

/// `k · duty · V² / (R · c_p · ΔT)`.
///
/// Returns exactly 0 when `delta_t == 0`, and 0 for any combination that
/// would not produce a finite value.
pub fn estimate(
    delta_t: f64,
    duty_cycle: f64,
    c_p: f64,
    resistance: f64,
    voltage: f64,
    flow_conversion_constant: f64,
) -> f64 {
    if delta_t == 0.0 {
        return 0.0;
    }
    let flow =
        flow_conversion_constant * duty_cycle * voltage * voltage / (resistance * c_p * delta_t);
    if flow.is_finite() { flow } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_differential_yields_zero() {
        assert_eq!(estimate(0.0, 1.0, 1005.0, 10.0, 12.0, 49_830.0), 0.0);
        assert_eq!(estimate(-0.0, 0.3, 1.0, 1.0, 1.0, 1.0), 0.0);
    }

    #[test]
    fn matches_formula() {
        let c = EstimatorConstants::default();
        let got = c.estimate(10.0, 0.5);
        let want = 49_830.0 * 0.5 * 144.0 / (10.0 * 1005.0 * 10.0);
        assert!((got - want).abs() < 1e-12);
    }

    #[test]
    fn degenerate_constants_do_not_escape_as_infinity() {
        assert_eq!(estimate(1.0, 1.0, 0.0, 10.0, 12.0, 1.0), 0.0);
        assert_eq!(estimate(f64::NAN, 1.0, 1.0, 1.0, 1.0, 1.0), 0.0);
    }
}
