#![no_main]
use bench_core::pid::{Discretization, PidController, PidSettings};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, libfuzzer_sys::arbitrary::Arbitrary)]
struct Input {
    kp: f64,
    ki: f64,
    kd: f64,
    tau: f64,
    backward_euler: bool,
    setpoint: f64,
    measurements: Vec<f64>,
}

fuzz_target!(|input: Input| {
    let settings = PidSettings {
        kp: input.kp.abs(),
        ki: input.ki.abs(),
        kd: input.kd.abs(),
        filter_time_constant_s: input.tau.abs().max(1e-3),
        sample_period_s: 0.2,
        output_min: 0.0,
        output_max: 1.0,
        discretization: if input.backward_euler {
            Discretization::BackwardEuler
        } else {
            Discretization::Tustin
        },
    };
    let Ok(mut pid) = PidController::new(settings) else {
        return;
    };
    pid.set_setpoint(input.setpoint);
    for m in input.measurements {
        let out = pid.update(m);
        // The clamp must hold for every finite step.
        if out.output.is_finite() {
            assert!((0.0..=1.0).contains(&out.output));
        }
    }
});
