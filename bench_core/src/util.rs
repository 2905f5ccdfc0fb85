//! Sampling and duty-register helpers.
use std::time::Duration;

/// History capacity for a window of `interval` sampled every `period`:
/// `floor(interval / period)`, computed in whole microseconds.
#[inline]
pub fn capacity_for(interval: Duration, period: Duration) -> usize {
    let period_us = period.as_micros();
    if period_us == 0 {
        return 0;
    }
    usize::try_from(interval.as_micros() / period_us).unwrap_or(usize::MAX)
}

/// Full-scale value of a `bits`-wide duty register (1..=32).
#[inline]
pub fn duty_max_raw(bits: u8) -> u32 {
    match bits {
        0 => 1,
        32..=u8::MAX => u32::MAX,
        b => (1u32 << b) - 1,
    }
}

/// Linear scale of a normalized duty onto the device register.
/// Non-finite input maps to 0; out-of-range input is clamped.
#[inline]
pub fn duty_to_raw(duty: f64, max_raw: u32) -> u32 {
    let d = if duty.is_finite() {
        duty.clamp(0.0, 1.0)
    } else {
        0.0
    };
    // d in [0, 1] so the product fits in u32.
    (d * f64::from(max_raw)).round() as u32
}
