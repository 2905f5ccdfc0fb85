//! Control-cycle behaviour driven step by step through `run_cycle`.
use std::sync::Arc;
use std::time::Duration;

use bench_core::flow::EstimatorConstants;
use bench_core::mocks::{
    FailingThermo, FlakyHeater, HangingThermo, MockProvider, RecordingHeater, ScriptedThermo,
    SettableFlow,
};
use bench_core::{
    Action, BenchCfg, BenchError, ConfigError, CycleOutcome, Fault, Mode, NoopObserver, Setup,
};
use bench_traits::{DualReading, ManualClock};
use rstest::rstest;

struct Rig {
    setup: Arc<Setup>,
    thermo: ScriptedThermo,
    flow: SettableFlow,
    heater: RecordingHeater,
}

fn reading(t1: f64, t2: f64) -> DualReading {
    DualReading {
        temperature_1: t1,
        humidity_1: 40.0,
        temperature_2: t2,
        humidity_2: 30.0,
    }
}

fn rig_with(cfg: BenchCfg, t1: f64, t2: f64, flow: f64) -> Rig {
    let thermo = ScriptedThermo::constant(reading(t1, t2));
    let flow_dev = SettableFlow::new(flow);
    let heater = RecordingHeater::new();
    let setup = Setup::builder()
        .with_config(cfg)
        .with_observer(Arc::new(NoopObserver))
        .with_provider(MockProvider::new(
            thermo.clone(),
            flow_dev.clone(),
            heater.clone(),
        ))
        .build()
        .unwrap();
    Rig {
        setup,
        thermo,
        flow: flow_dev,
        heater,
    }
}

fn rig(t1: f64, t2: f64, flow: f64) -> Rig {
    rig_with(BenchCfg::default(), t1, t2, flow)
}

fn manual_on(r: &Rig, duty: f64) {
    r.setup.start_direct_power_setting().unwrap();
    r.setup.set_duty(duty).unwrap();
    r.setup.enable_output().unwrap();
}

const RAW_MAX: f64 = 65_535.0;

fn raw(duty: f64) -> u32 {
    (duty * RAW_MAX).round() as u32
}

#[test]
fn build_starts_with_heater_off() {
    let r = rig(20.0, 20.0, 5.0);
    assert_eq!(r.heater.writes(), vec![0]);
    let s = r.setup.status();
    assert_eq!(s.mode, Mode::Idle);
    assert!(!s.simulated);
    assert!(!s.running);
    assert!(s.buffering);
    assert_eq!(s.history_len, 0);
}

#[test]
fn idle_cycle_zero_fills_controller_fields() {
    let r = rig(20.0, 23.0, 0.0);
    let out = r.setup.run_cycle();
    assert_eq!(
        out,
        CycleOutcome::Completed {
            duty: 0.0,
            fault: None
        }
    );
    let f = r.setup.latest_frame().unwrap();
    assert_eq!(f.duty_cycle, 0.0);
    assert_eq!(f.flow_estimate, 0.0);
    assert_eq!(f.controller_output, 0.0);
    assert_eq!(f.controller_p, 0.0);
    assert!((f.temperature_difference - 3.0).abs() < 1e-12);
    assert!(f.is_finite());
    // Low flow with the heater off is the resting state, not a fault.
    assert_eq!(r.setup.status().faults.total(), 0);
    assert_eq!(r.setup.history("flow").unwrap(), vec![0.0]);
}

#[test]
fn manual_duty_reaches_heater_after_enable() {
    let r = rig(20.0, 25.0, 5.0);
    r.setup.start_direct_power_setting().unwrap();
    r.setup.set_duty(0.5).unwrap();
    // Output still disabled.
    assert_eq!(r.heater.last(), Some(0));
    r.setup.enable_output().unwrap();

    let out = r.setup.run_cycle();
    assert_eq!(
        out,
        CycleOutcome::Completed {
            duty: 0.5,
            fault: None
        }
    );
    assert_eq!(r.heater.last(), Some(raw(0.5)));
    let f = r.setup.latest_frame().unwrap();
    assert_eq!(f.duty_cycle, 0.5);
    assert_eq!(f.flow_estimate, EstimatorConstants::default().estimate(5.0, 0.5));
    assert_eq!(r.setup.status().applied_duty, 0.5);
}

#[test]
fn low_flow_forces_zero_and_recovers() {
    let r = rig(20.0, 25.0, 0.5);
    manual_on(&r, 0.5);

    let out = r.setup.run_cycle();
    assert_eq!(
        out,
        CycleOutcome::Completed {
            duty: 0.0,
            fault: Some(Fault::LowFlow)
        }
    );
    assert_eq!(r.heater.last(), Some(0));
    let s = r.setup.status();
    assert_eq!(s.active_fault, Some(Fault::LowFlow));
    assert_eq!(s.faults.low_flow, 1);
    // The fault does not stop anything: mode and manual duty survive.
    assert_eq!(s.mode, Mode::ManualOn);
    assert_eq!(s.manual_duty, 0.5);

    r.flow.force(5.0);
    r.setup.run_cycle();
    assert_eq!(r.heater.last(), Some(raw(0.5)));
    assert_eq!(r.setup.status().active_fault, None);
}

#[test]
fn over_temperature_wins_over_low_flow() {
    let r = rig(20.0, 70.0, 0.2);
    manual_on(&r, 0.3);
    let out = r.setup.run_cycle();
    assert_eq!(
        out,
        CycleOutcome::Completed {
            duty: 0.0,
            fault: Some(Fault::HighTemperature)
        }
    );
    let s = r.setup.status();
    assert_eq!(s.faults.high_temperature, 1);
    assert_eq!(s.faults.low_flow, 0);
}

#[test]
fn manual_setter_rechecks_interlocks_between_cycles() {
    let r = rig(20.0, 25.0, 0.2);
    manual_on(&r, 0.0);
    // Zero duty with low flow: no fault.
    r.setup.run_cycle();
    assert_eq!(r.setup.status().active_fault, None);

    r.setup.set_duty(0.8).unwrap();
    assert_eq!(r.heater.last(), Some(0));
    assert_eq!(r.setup.status().active_fault, Some(Fault::LowFlow));
}

#[test]
fn pid_drives_duty_from_temperature_difference() {
    let r = rig(20.0, 28.0, 5.0);
    r.setup.start_pid_controller().unwrap();
    r.setup.set_kp(0.1).unwrap();
    r.setup.set_ki(0.0).unwrap();
    r.setup.set_setpoint(10.0).unwrap();
    r.setup.enable_output().unwrap();

    let out = r.setup.run_cycle();
    let CycleOutcome::Completed { duty, fault: None } = out else {
        panic!("unexpected outcome {out:?}");
    };
    assert!((duty - 0.2).abs() < 1e-12);
    let f = r.setup.latest_frame().unwrap();
    assert!((f.controller_p - 0.2).abs() < 1e-12);
    assert!((f.controller_output - 0.2).abs() < 1e-12);
    assert_eq!(f.target_delta_t, 10.0);
    assert_eq!(r.heater.last(), Some(raw(0.2)));
}

#[test]
fn each_enable_resets_controller_history() {
    let r = rig(20.0, 24.0, 5.0);
    r.setup.start_pid_controller().unwrap();
    r.setup.set_kp(0.05).unwrap();
    r.setup.set_ki(0.5).unwrap();
    r.setup.set_setpoint(10.0).unwrap();
    r.setup.enable_output().unwrap();

    let first = r.setup.latest_frame();
    assert!(first.is_none());
    r.setup.run_cycle();
    let first = r.setup.latest_frame().unwrap().controller_output;
    r.setup.run_cycle();
    r.setup.run_cycle();
    assert!(r.setup.latest_frame().unwrap().controller_output > first);

    assert_eq!(r.setup.disable_output(), Ok(Mode::PidOff));
    assert_eq!(r.heater.last(), Some(0));
    assert_eq!(r.setup.enable_output(), Ok(Mode::PidOn));
    r.setup.run_cycle();
    let again = r.setup.latest_frame().unwrap().controller_output;
    assert!((again - first).abs() < 1e-12);
    assert_eq!(r.setup.mode(), Mode::PidOn);
}

#[test]
fn invalid_transitions_leave_mode_unchanged() {
    let r = rig(20.0, 20.0, 5.0);
    assert_eq!(
        r.setup.enable_output(),
        Err(BenchError::InvalidTransition {
            from: Mode::Idle,
            action: Action::EnableOutput
        })
    );
    assert_eq!(r.setup.mode(), Mode::Idle);
    r.setup.start_direct_power_setting().unwrap();
    assert!(r.setup.disable_output().is_err());
    r.setup.enable_output().unwrap();
    assert!(r.setup.start_pid_controller().is_err());
    assert!(r.setup.return_to_idle().is_err());
    assert_eq!(r.setup.mode(), Mode::ManualOn);
}

#[rstest]
#[case(-1.0)]
#[case(30.5)]
#[case(f64::NAN)]
fn setpoint_out_of_range_is_rejected(#[case] target: f64) {
    let r = rig(20.0, 20.0, 5.0);
    let err = r.setup.set_setpoint(target).unwrap_err();
    assert!(matches!(
        err,
        BenchError::Config(ConfigError::InvalidSetpoint { .. })
    ));
    assert_eq!(r.setup.setpoint(), 0.0);
}

#[test]
fn gain_and_duty_validation() {
    let r = rig(20.0, 20.0, 5.0);
    let before = r.setup.gains();
    assert_eq!(
        r.setup.set_kp(-0.1),
        Err(BenchError::Config(ConfigError::InvalidGain {
            name: "kp",
            value: -0.1
        }))
    );
    assert_eq!(r.setup.gains(), before);
    assert_eq!(
        r.setup.set_duty(1.5),
        Err(BenchError::Config(ConfigError::InvalidDuty(1.5)))
    );
    r.setup.set_kd(0.02).unwrap();
    assert_eq!(r.setup.gains().kd, 0.02);
}

#[test]
fn flow_setpoint_goes_through_the_controller() {
    let r = rig(20.0, 20.0, 0.0);
    assert!(matches!(
        r.setup.set_flow(60.0),
        Err(BenchError::Config(ConfigError::InvalidFlow { .. }))
    ));
    r.setup.set_flow(12.0).unwrap();
    assert_eq!(r.flow.current(), 12.0);
    r.setup.set_nominal_flow().unwrap();
    assert_eq!(r.flow.current(), 10.0);
}

#[test]
fn calibration_captures_and_rejects() {
    let r = rig(20.0, 20.3, 5.0);
    assert_eq!(
        r.setup.set_temperature_calibration(),
        Err(BenchError::NoMeasurement)
    );
    for _ in 0..5 {
        r.setup.run_cycle();
    }
    let offset = r.setup.set_temperature_calibration().unwrap();
    assert!((offset - 0.3).abs() < 1e-9);
    r.setup.run_cycle();
    assert!(r.setup.latest_frame().unwrap().temperature_difference.abs() < 1e-9);

    r.thermo.set(reading(20.0, 21.0));
    r.setup.clear_history();
    r.setup.run_cycle();
    let err = r.setup.set_temperature_calibration().unwrap_err();
    assert!(matches!(
        err,
        BenchError::Config(ConfigError::CalibrationRejected { .. })
    ));
    assert!((r.setup.calibration_offset() - offset).abs() < 1e-12);

    r.setup.reset_temperature_calibration();
    assert_eq!(r.setup.calibration_offset(), 0.0);
}

#[test]
fn history_is_bounded_and_switchable() {
    let cfg = BenchCfg {
        sampling: bench_core::config::SamplingCfg {
            period: Duration::from_millis(200),
            buffer_interval: Duration::from_millis(600),
            sensor_timeout: Duration::from_millis(100),
        },
        ..BenchCfg::default()
    };
    let clock = ManualClock::new();
    let thermo = ScriptedThermo::constant(reading(20.0, 20.0));
    let setup = Setup::builder()
        .with_config(cfg)
        .with_observer(Arc::new(NoopObserver))
        .with_clock(Arc::new(clock.clone()))
        .with_provider(MockProvider::new(
            thermo,
            SettableFlow::new(5.0),
            RecordingHeater::new(),
        ))
        .build()
        .unwrap();

    for _ in 0..5 {
        setup.run_cycle();
        clock.advance(Duration::from_millis(200));
    }
    let ts = setup.history("timestamp").unwrap();
    assert_eq!(ts.len(), 3);
    assert!((ts[0] - 0.4).abs() < 1e-9);
    assert!((ts[2] - 0.8).abs() < 1e-9);

    setup.stop_buffering();
    setup.run_cycle();
    assert_eq!(setup.history("timestamp").unwrap().len(), 3);
    assert!(setup.latest_frame().is_some());

    setup.clear_history();
    assert_eq!(setup.status().history_len, 0);
    setup.start_buffering();
    setup.run_cycle();
    assert_eq!(setup.status().history_len, 1);

    assert_eq!(
        setup.history("nope"),
        Err(BenchError::UnknownSignal("nope".into()))
    );
    let snapshot = setup.history_snapshot();
    assert_eq!(snapshot.len(), bench_core::SIGNALS.len());
    assert!(snapshot.iter().all(|(_, v)| v.len() == 1));
}

#[test]
fn hung_sensor_forces_heater_off_without_appending() {
    let cfg = BenchCfg {
        sampling: bench_core::config::SamplingCfg {
            period: Duration::from_millis(200),
            buffer_interval: Duration::from_secs(10),
            sensor_timeout: Duration::from_millis(30),
        },
        ..BenchCfg::default()
    };
    let heater = RecordingHeater::new();
    let setup = Setup::builder()
        .with_config(cfg)
        .with_observer(Arc::new(NoopObserver))
        .with_provider(MockProvider::new(
            HangingThermo::new(Duration::from_millis(150), reading(20.0, 25.0)),
            SettableFlow::new(5.0),
            heater.clone(),
        ))
        .build()
        .unwrap();
    manual_on_setup(&setup, 0.5);

    let started = std::time::Instant::now();
    let out = setup.run_cycle();
    assert!(started.elapsed() < Duration::from_millis(140));
    assert_eq!(
        out,
        CycleOutcome::AcquisitionFailed {
            fault: Fault::SensorTimeout
        }
    );
    assert_eq!(heater.last(), Some(0));
    let s = setup.status();
    assert_eq!(s.faults.sensor_timeout, 1);
    assert_eq!(s.active_fault, Some(Fault::SensorTimeout));
    assert_eq!(s.history_len, 0);
    assert!(setup.latest_frame().is_none());
}

fn manual_on_setup(setup: &Setup, duty: f64) {
    setup.start_direct_power_setting().unwrap();
    setup.set_duty(duty).unwrap();
    setup.enable_output().unwrap();
}

#[test]
fn failing_sensor_counts_device_errors() {
    let setup = Setup::builder()
        .with_observer(Arc::new(NoopObserver))
        .with_provider(MockProvider::new(
            FailingThermo {
                message: "crc mismatch".into(),
            },
            SettableFlow::new(5.0),
            RecordingHeater::new(),
        ))
        .build()
        .unwrap();
    for _ in 0..3 {
        assert_eq!(
            setup.run_cycle(),
            CycleOutcome::AcquisitionFailed {
                fault: Fault::DeviceError
            }
        );
    }
    assert_eq!(setup.status().faults.device_error, 3);
}

#[test]
fn rejected_heater_write_reports_what_was_applied() {
    let heater = FlakyHeater::rejecting_above(0);
    let setup = Setup::builder()
        .with_observer(Arc::new(NoopObserver))
        .with_provider(MockProvider::new(
            ScriptedThermo::constant(reading(20.0, 25.0)),
            SettableFlow::new(5.0),
            heater.clone(),
        ))
        .build()
        .unwrap();
    manual_on_setup(&setup, 0.5);

    assert_eq!(
        setup.run_cycle(),
        CycleOutcome::Completed {
            duty: 0.0,
            fault: Some(Fault::DeviceError)
        }
    );
    let f = setup.latest_frame().unwrap();
    assert_eq!(f.duty_cycle, 0.0);
    assert_eq!(f.flow_estimate, 0.0);
    let s = setup.status();
    assert_eq!(s.applied_duty, 0.0);
    assert_eq!(s.active_fault, Some(Fault::DeviceError));
    assert_eq!(s.faults.device_error, 1);
    assert_eq!(setup.history("duty_cycle").unwrap(), vec![0.0]);
    assert!(heater.writes().iter().all(|&w| w == 0));

    // The manual setter path reports the failure too.
    setup.set_duty(0.7).unwrap();
    let s = setup.status();
    assert_eq!(s.active_fault, Some(Fault::DeviceError));
    assert_eq!(s.faults.device_error, 2);

    heater.heal();
    assert_eq!(
        setup.run_cycle(),
        CycleOutcome::Completed {
            duty: 0.7,
            fault: None
        }
    );
    assert_eq!(heater.last(), Some(raw(0.7)));
    assert_eq!(setup.status().active_fault, None);
    assert_eq!(setup.latest_frame().unwrap().duty_cycle, 0.7);
}

#[test]
fn non_finite_reading_is_not_recorded() {
    let r = rig(20.0, f64::NAN, 5.0);
    assert_eq!(
        r.setup.run_cycle(),
        CycleOutcome::AcquisitionFailed {
            fault: Fault::DeviceError
        }
    );
    assert_eq!(r.setup.status().history_len, 0);
    r.thermo.set(reading(20.0, 21.0));
    assert!(matches!(
        r.setup.run_cycle(),
        CycleOutcome::Completed { .. }
    ));
    assert_eq!(r.setup.status().active_fault, None);
}

#[test]
fn sensor_reads_once_per_cycle() {
    let r = rig(20.0, 20.0, 5.0);
    for _ in 0..4 {
        r.setup.run_cycle();
    }
    assert_eq!(r.thermo.reads(), 4);
}
