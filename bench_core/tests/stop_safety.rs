//! Loop start/stop with the heater left off.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bench_core::config::SamplingCfg;
use bench_core::mocks::{HangingThermo, MockProvider, RecordingHeater, ScriptedThermo, SettableFlow};
use bench_core::{BenchCfg, BenchError, Fault, Mode, Observer, Setup};
use bench_traits::DualReading;

fn reading() -> DualReading {
    DualReading {
        temperature_1: 20.0,
        humidity_1: 40.0,
        temperature_2: 24.0,
        humidity_2: 30.0,
    }
}

fn fast_cfg(sensor_timeout_ms: u64) -> BenchCfg {
    BenchCfg {
        sampling: SamplingCfg {
            period: Duration::from_millis(20),
            buffer_interval: Duration::from_secs(2),
            sensor_timeout: Duration::from_millis(sensor_timeout_ms),
        },
        ..BenchCfg::default()
    }
}

#[derive(Default)]
struct LoopEvents {
    states: Mutex<Vec<bool>>,
    modes: Mutex<Vec<(Mode, Mode)>>,
}

impl Observer for LoopEvents {
    fn loop_state(&self, running: bool) {
        self.states.lock().unwrap().push(running);
    }

    fn mode_changed(&self, from: Mode, to: Mode) {
        self.modes.lock().unwrap().push((from, to));
    }
}

#[test]
fn stop_leaves_heater_off_and_output_disabled() {
    let heater = RecordingHeater::new();
    let events = Arc::new(LoopEvents::default());
    let setup = Setup::builder()
        .with_config(fast_cfg(10))
        .with_observer(events.clone())
        .with_provider(MockProvider::new(
            ScriptedThermo::constant(reading()),
            SettableFlow::new(5.0),
            heater.clone(),
        ))
        .build()
        .unwrap();

    setup.start_direct_power_setting().unwrap();
    setup.set_duty(0.4).unwrap();
    setup.enable_output().unwrap();
    setup.start_measurement_loop().unwrap();
    assert!(setup.is_running());
    assert_eq!(setup.start_measurement_loop(), Err(BenchError::AlreadyRunning));

    std::thread::sleep(Duration::from_millis(150));
    assert!(heater.writes().iter().any(|&w| w > 0));
    assert!(setup.status().history_len > 0);

    setup.stop_measurement_loop().unwrap();
    assert!(!setup.is_running());
    assert_eq!(heater.last(), Some(0));
    assert_eq!(setup.mode(), Mode::ManualOff);
    assert_eq!(setup.manual_duty(), 0.0);
    assert_eq!(setup.status().applied_duty, 0.0);

    // Nothing writes after the stop returned.
    let n = heater.writes().len();
    std::thread::sleep(Duration::from_millis(80));
    assert_eq!(heater.writes().len(), n);

    assert_eq!(setup.stop_measurement_loop(), Err(BenchError::NotRunning));
    assert_eq!(*events.states.lock().unwrap(), vec![true, false]);
    assert!(
        events
            .modes
            .lock()
            .unwrap()
            .contains(&(Mode::ManualOn, Mode::ManualOff))
    );
}

#[test]
fn restart_clears_history() {
    let setup = Setup::builder()
        .with_config(fast_cfg(10))
        .with_provider(MockProvider::new(
            ScriptedThermo::constant(reading()),
            SettableFlow::new(5.0),
            RecordingHeater::new(),
        ))
        .build()
        .unwrap();
    setup.start_measurement_loop().unwrap();
    std::thread::sleep(Duration::from_millis(100));
    setup.stop_measurement_loop().unwrap();
    let before = setup.status().history_len;
    assert!(before > 0);

    setup.start_measurement_loop().unwrap();
    setup.stop_measurement_loop().unwrap();
    assert!(setup.status().history_len < before);
}

#[test]
fn hung_sensor_does_not_block_stop() {
    let heater = RecordingHeater::new();
    let setup = Setup::builder()
        .with_config(fast_cfg(10))
        .with_provider(MockProvider::new(
            HangingThermo::new(Duration::from_millis(60), reading()),
            SettableFlow::new(5.0),
            heater.clone(),
        ))
        .build()
        .unwrap();
    setup.start_pid_controller().unwrap();
    setup.set_setpoint(10.0).unwrap();
    setup.enable_output().unwrap();
    setup.start_measurement_loop().unwrap();
    std::thread::sleep(Duration::from_millis(120));

    let started = std::time::Instant::now();
    setup.stop_measurement_loop().unwrap();
    assert!(started.elapsed() < Duration::from_millis(200));
    assert_eq!(heater.last(), Some(0));
    assert!(heater.writes().iter().all(|&w| w == 0));
    let s = setup.status();
    assert_eq!(s.mode, Mode::PidOff);
    assert!(s.faults.sensor_timeout > 0);
    assert_eq!(s.active_fault, Some(Fault::SensorTimeout));
}

#[test]
fn dropping_the_last_handle_ends_the_loop() {
    let heater = RecordingHeater::new();
    let setup = Setup::builder()
        .with_config(fast_cfg(10))
        .with_provider(MockProvider::new(
            ScriptedThermo::constant(reading()),
            SettableFlow::new(5.0),
            heater.clone(),
        ))
        .build()
        .unwrap();
    setup.start_direct_power_setting().unwrap();
    setup.set_duty(0.3).unwrap();
    setup.enable_output().unwrap();
    setup.start_measurement_loop().unwrap();
    std::thread::sleep(Duration::from_millis(60));
    drop(setup);
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(heater.last(), Some(0));
    let n = heater.writes().len();
    std::thread::sleep(Duration::from_millis(60));
    assert_eq!(heater.writes().len(), n);
}
