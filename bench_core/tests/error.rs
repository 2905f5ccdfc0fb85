use std::sync::Arc;

use bench_core::mocks::{FailingProvider, MockProvider, RecordingHeater, ScriptedThermo, SettableFlow};
use bench_core::{
    Action, BenchCfg, BenchError, BuildError, ConfigError, Mode, NoopObserver, Setup,
};
use bench_hardware::{HwError, SimulatedBench};
use bench_traits::{DeviceHandles, DeviceProvider, DeviceResult};

#[test]
fn error_messages_name_the_problem() {
    let e = BenchError::InvalidTransition {
        from: Mode::Idle,
        action: Action::EnableOutput,
    };
    assert_eq!(
        e.to_string(),
        "invalid transition: enable_output is not allowed in idle"
    );

    let e = BenchError::from(ConfigError::InvalidSetpoint {
        value: 45.0,
        max: 30.0,
    });
    assert!(e.to_string().contains("45"));
    assert!(e.to_string().contains("30"));
    assert_eq!(BenchError::Timeout.to_string(), "timeout waiting for sensor");
}

/// Provider that reports a missing driver the way the hardware crate does.
struct DriverlessProvider;

impl DeviceProvider for DriverlessProvider {
    fn open_devices(&mut self) -> DeviceResult<DeviceHandles> {
        Err(Box::new(HwError::DriverMissing("usb serial".into())))
    }
}

#[test]
fn unavailable_devices_fall_back_to_simulation() {
    let setup = Setup::builder()
        .with_observer(Arc::new(NoopObserver))
        .with_provider(DriverlessProvider)
        .with_fallback(SimulatedBench::default())
        .build()
        .unwrap();
    assert!(setup.is_simulated());
    assert!(setup.status().simulated);
}

#[test]
fn unavailable_devices_without_fallback_is_an_error() {
    let err = Setup::builder()
        .with_provider(FailingProvider {
            message: "devices unavailable: heater".into(),
        })
        .build()
        .unwrap_err();
    match err.downcast_ref::<BenchError>() {
        Some(BenchError::DeviceUnavailable(why)) => assert!(why.contains("heater")),
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn protocol_errors_do_not_fall_back() {
    let err = Setup::builder()
        .with_provider(FailingProvider {
            message: "checksum mismatch".into(),
        })
        .with_fallback(SimulatedBench::default())
        .build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BenchError>(),
        Some(BenchError::Device(_))
    ));
    assert!(format!("{err:#}").contains("open devices"));
}

#[test]
fn simulate_flag_requires_a_fallback() {
    let cfg = BenchCfg {
        simulate: true,
        ..BenchCfg::default()
    };
    let err = Setup::builder()
        .with_config(cfg.clone())
        .with_provider(MockProvider::new(
            ScriptedThermo::new(vec![]),
            SettableFlow::new(0.0),
            RecordingHeater::new(),
        ))
        .build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingFallback)
    ));

    let setup = Setup::builder()
        .with_config(cfg)
        .with_fallback(SimulatedBench::default())
        .build()
        .unwrap();
    assert!(setup.is_simulated());
}

#[test]
fn missing_provider_is_reported() {
    let err = Setup::builder().build().unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::MissingProvider)
    ));
}

#[test]
fn invalid_config_is_rejected_before_opening_devices() {
    let mut cfg = BenchCfg::default();
    cfg.sampling.sensor_timeout = cfg.sampling.period;
    let heater = RecordingHeater::new();
    let err = Setup::builder()
        .with_config(cfg)
        .with_provider(MockProvider::new(
            ScriptedThermo::new(vec![]),
            SettableFlow::new(0.0),
            heater.clone(),
        ))
        .build()
        .unwrap_err();
    assert!(err.downcast_ref::<BuildError>().is_some());
    assert!(heater.writes().is_empty());
}

#[test]
fn bad_gains_in_config_are_rejected() {
    let mut cfg = BenchCfg::default();
    cfg.controller.kp = -1.0;
    let err = Setup::builder()
        .with_config(cfg)
        .with_provider(MockProvider::new(
            ScriptedThermo::new(vec![]),
            SettableFlow::new(0.0),
            RecordingHeater::new(),
        ))
        .build()
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::InvalidConfig(_))
    ));
}
