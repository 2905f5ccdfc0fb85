//! Bench assembly from the config and the `run` / `self-check` commands.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bench_config::Config;
use bench_core::util::duty_max_raw;
use bench_core::{BenchCfg, BenchStatus, Observer, SensorFrame, Setup};
use bench_hardware::probe::{FLOW_CONTROLLER, HEATER, THERMO_HYGROMETER};
use bench_hardware::{PortProbe, Reachability, SimParams, SimulatedBench};
use serde_json::json;

use crate::cli::RtLock;
use crate::rt::setup_rt_once;

/// How often the foreground thread checks for Ctrl-C and the deadline.
const POLL: Duration = Duration::from_millis(50);

/// Plant parameters for the simulated bench, consistent with the estimator
/// constants so a simulated run reproduces its flow setpoint.
pub fn sim_params(cfg: &Config) -> SimParams {
    let s = &cfg.simulation;
    let e = &cfg.flow_estimate;
    SimParams {
        ambient_c: s.ambient_c,
        humidity_pct: s.humidity_pct,
        time_constant_s: s.time_constant_s,
        step_s: cfg.sampling.period_ms as f64 / 1000.0,
        specific_heat_j_per_kg_k: e.specific_heat_j_per_kg_k,
        heater_resistance_ohm: e.heater_resistance_ohm,
        heater_voltage_v: e.heater_voltage_v,
        conversion_constant: e.conversion_constant,
        duty_max_raw: duty_max_raw(cfg.heater.duty_resolution_bits),
        noise_c: s.noise_c,
        seed: s.seed,
        ..SimParams::default()
    }
}

pub fn probe(cfg: &Config) -> PortProbe {
    PortProbe {
        thermo_port: cfg.hardware.thermo_port.clone(),
        flow_port: cfg.hardware.flow_port.clone(),
        heater_port: cfg.hardware.heater_port.clone(),
    }
}

pub fn build_setup(
    cfg: &Config,
    force_simulation: bool,
    observer: Arc<dyn Observer>,
) -> eyre::Result<Arc<Setup>> {
    let mut core = BenchCfg::from(cfg);
    core.simulate |= force_simulation;
    Setup::builder()
        .with_config(core)
        .with_provider(probe(cfg))
        .with_fallback(SimulatedBench::new(sim_params(cfg)))
        .with_observer(observer)
        .build()
}

#[derive(Debug, Clone, Copy)]
pub enum Control {
    Manual { duty: f64 },
    Pid { setpoint: f64 },
}

#[derive(Debug, Clone, Copy)]
pub struct RtOpts {
    pub enabled: bool,
    pub prio: Option<i32>,
    pub lock: Option<RtLock>,
    pub cpu: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct RunOpts {
    pub control: Control,
    pub flow_slm: Option<f64>,
    pub duration: Option<Duration>,
    pub csv: Option<PathBuf>,
    pub rt: RtOpts,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub elapsed: Duration,
    pub interrupted: bool,
    pub status: BenchStatus,
    pub last: Option<SensorFrame>,
    pub exported_rows: Option<usize>,
}

impl RunSummary {
    pub fn to_json(&self) -> serde_json::Value {
        let s = &self.status;
        json!({
            "event": "summary",
            "elapsed_s": self.elapsed.as_secs_f64(),
            "interrupted": self.interrupted,
            "simulated": s.simulated,
            "mode": s.mode.to_string(),
            "applied_duty": s.applied_duty,
            "setpoint": s.setpoint,
            "temperature_difference": self.last.map(|f| f.temperature_difference),
            "flow": self.last.map(|f| f.flow),
            "flow_estimate": self.last.map(|f| f.flow_estimate),
            "faults": {
                "low_flow": s.faults.low_flow,
                "high_temperature": s.faults.high_temperature,
                "sensor_timeout": s.faults.sensor_timeout,
                "device_error": s.faults.device_error,
            },
            "overruns": s.overruns,
            "samples": s.history_len,
            "exported_rows": self.exported_rows,
        })
    }

    pub fn print_human(&self) {
        let s = &self.status;
        println!(
            "run complete after {:.1} s{}{}",
            self.elapsed.as_secs_f64(),
            if self.interrupted { " (interrupted)" } else { "" },
            if s.simulated { " [simulated]" } else { "" },
        );
        if let Some(f) = &self.last {
            println!(
                "  ΔT {:.2} °C (target {:.2}), duty {:.3}, flow {:.2} SLM, estimate {:.2} SLM",
                f.temperature_difference, f.target_delta_t, f.duty_cycle, f.flow, f.flow_estimate
            );
        }
        println!(
            "  faults: low flow {}, high temperature {}, sensor timeout {}, device {}; overruns {}",
            s.faults.low_flow,
            s.faults.high_temperature,
            s.faults.sensor_timeout,
            s.faults.device_error,
            s.overruns
        );
        if let Some(rows) = self.exported_rows {
            println!("  exported {rows} samples");
        }
    }
}

/// Drive the bench until the deadline or Ctrl-C, then stop it with the
/// heater off and export the history.
pub fn run(setup: &Arc<Setup>, opts: &RunOpts, shutdown: &AtomicBool) -> eyre::Result<RunSummary> {
    setup_rt_once(
        opts.rt.enabled,
        opts.rt.prio,
        opts.rt.lock.unwrap_or_else(RtLock::os_default),
        opts.rt.cpu,
    );

    match opts.flow_slm {
        Some(slm) => setup.set_flow(slm)?,
        None => setup.set_nominal_flow()?,
    }
    match opts.control {
        Control::Manual { duty } => {
            setup.start_direct_power_setting()?;
            setup.set_duty(duty)?;
        }
        Control::Pid { setpoint } => {
            setup.start_pid_controller()?;
            setup.set_setpoint(setpoint)?;
        }
    }
    setup.enable_output()?;
    setup.start_measurement_loop()?;
    tracing::info!(control = ?opts.control, duration = ?opts.duration, "run start");

    let started = Instant::now();
    let interrupted = loop {
        if shutdown.load(Ordering::Relaxed) {
            break true;
        }
        if opts.duration.is_some_and(|d| started.elapsed() >= d) {
            break false;
        }
        std::thread::sleep(POLL);
    };
    let elapsed = started.elapsed();
    if interrupted {
        tracing::warn!("interrupted; stopping the loop");
    }

    setup.stop_measurement_loop()?;
    setup.return_to_idle()?;

    let exported_rows = match &opts.csv {
        Some(path) => Some(crate::export::write_history(path, &setup.history_snapshot())?),
        None => None,
    };
    Ok(RunSummary {
        elapsed,
        interrupted,
        status: setup.status(),
        last: setup.latest_frame(),
        exported_rows,
    })
}

#[derive(Debug, Clone)]
pub struct SelfCheck {
    pub reachability: Reachability,
    pub forced_simulation: bool,
    pub simulated: bool,
    pub frame: Option<SensorFrame>,
}

impl SelfCheck {
    pub fn to_json(&self) -> serde_json::Value {
        let devices: serde_json::Map<String, serde_json::Value> = self
            .devices()
            .into_iter()
            .map(|(name, ok)| (name.to_string(), ok.into()))
            .collect();
        json!({
            "event": "self_check",
            "devices": devices,
            "forced_simulation": self.forced_simulation,
            "simulated": self.simulated,
            "cycle_ok": self.frame.is_some(),
        })
    }

    fn devices(&self) -> [(&'static str, bool); 3] {
        let r = &self.reachability;
        [
            (THERMO_HYGROMETER, r.thermo),
            (FLOW_CONTROLLER, r.flow),
            (HEATER, r.heater),
        ]
    }

    pub fn print_human(&self) {
        for (name, ok) in self.devices() {
            println!("{name}: {}", if ok { "reachable" } else { "missing" });
        }
        if self.forced_simulation {
            println!("simulation forced by configuration");
        }
        println!(
            "bench: {}",
            if self.simulated { "simulation" } else { "hardware" }
        );
        match &self.frame {
            Some(f) => println!(
                "cycle ok: T1 {:.2} °C, T2 {:.2} °C, flow {:.2} SLM",
                f.temperature_1, f.temperature_2, f.flow
            ),
            None => println!("cycle failed: no frame"),
        }
    }
}

/// Probe the ports, assemble the bench and run one idle cycle.
pub fn self_check(cfg: &Config, force_simulation: bool) -> eyre::Result<SelfCheck> {
    let reachability = probe(cfg).reachability();
    let setup = build_setup(cfg, force_simulation, Arc::new(bench_core::NoopObserver))?;
    let outcome = setup.run_cycle();
    tracing::debug!(?outcome, "self-check cycle");
    Ok(SelfCheck {
        reachability,
        forced_simulation: force_simulation || cfg.hardware.simulate,
        simulated: setup.is_simulated(),
        frame: setup.latest_frame(),
    })
}
