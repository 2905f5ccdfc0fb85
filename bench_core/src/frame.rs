//! One control cycle's worth of measurements and derived values.

/// Signal names in the order `SensorFrame::values` yields them.
pub const SIGNALS: [&str; 14] = [
    "temperature_1",
    "temperature_2",
    "humidity_1",
    "humidity_2",
    "flow",
    "timestamp",
    "temperature_difference",
    "duty_cycle",
    "flow_estimate",
    "target_delta_t",
    "controller_p",
    "controller_i",
    "controller_d",
    "controller_output",
];

/// Built fresh by the orchestrator each cycle; every field is finite.
///
/// Fields that do not apply in the current mode (`controller_*` outside
/// PID control, `duty_cycle` with output disabled) are zero, never absent.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorFrame {
    /// °C, upstream sensor (raw)
    pub temperature_1: f64,
    /// °C, downstream sensor (raw)
    pub temperature_2: f64,
    /// % RH
    pub humidity_1: f64,
    /// % RH
    pub humidity_2: f64,
    /// SLM, measured by the flow controller
    pub flow: f64,
    /// Seconds since the setup was assembled (monotonic)
    pub timestamp: f64,
    /// `temperature_2 - temperature_1 - calibration_offset`
    pub temperature_difference: f64,
    /// Heater fraction resolved for this cycle, 0..1
    pub duty_cycle: f64,
    pub flow_estimate: f64,
    pub target_delta_t: f64,
    pub controller_p: f64,
    pub controller_i: f64,
    pub controller_d: f64,
    pub controller_output: f64,
}

impl SensorFrame {
    /// `(signal, value)` pairs, one per entry of `SIGNALS`.
    pub fn values(&self) -> [(&'static str, f64); 14] {
        [
            (SIGNALS[0], self.temperature_1),
            (SIGNALS[1], self.temperature_2),
            (SIGNALS[2], self.humidity_1),
            (SIGNALS[3], self.humidity_2),
            (SIGNALS[4], self.flow),
            (SIGNALS[5], self.timestamp),
            (SIGNALS[6], self.temperature_difference),
            (SIGNALS[7], self.duty_cycle),
            (SIGNALS[8], self.flow_estimate),
            (SIGNALS[9], self.target_delta_t),
            (SIGNALS[10], self.controller_p),
            (SIGNALS[11], self.controller_i),
            (SIGNALS[12], self.controller_d),
            (SIGNALS[13], self.controller_output),
        ]
    }

    pub fn is_finite(&self) -> bool {
        self.values().iter().all(|(_, v)| v.is_finite())
    }

    /// Differential without the calibration offset applied.
    pub fn raw_difference(&self) -> f64 {
        self.temperature_2 - self.temperature_1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_follow_signal_order() {
        let f = SensorFrame {
            temperature_1: 1.0,
            controller_output: 14.0,
            ..SensorFrame::default()
        };
        let v = f.values();
        assert_eq!(v.len(), SIGNALS.len());
        for ((name, _), expected) in v.iter().zip(SIGNALS) {
            assert_eq!(*name, expected);
        }
        assert_eq!(v[0].1, 1.0);
        assert_eq!(v[13].1, 14.0);
    }

    #[test]
    fn non_finite_field_is_detected() {
        let f = SensorFrame {
            flow: f64::NAN,
            ..SensorFrame::default()
        };
        assert!(!f.is_finite());
        assert!(SensorFrame::default().is_finite());
    }
}
