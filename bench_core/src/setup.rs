//! The bench orchestrator.
//!
//! `Setup` owns the devices and all control state. The measurement loop
//! runs `run_cycle` on the scheduler thread; every other call arrives from
//! the caller's thread. All mutable control state (mode, PID, duties,
//! buffer, heater) lives behind one mutex, so a gain change, a mode change
//! or a PID reset is never observed half-applied by a cycle. The sensor
//! read happens before that lock is taken and is bounded by the sensor
//! timeout, so a hung sensor never blocks callers or the interlocks.
//!
//! Lock order: `scheduler` before `state`. `acquisition` is never held
//! together with another lock.
use std::ops::ControlFlow;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use bench_traits::{Clock, DeviceHandles, DeviceProvider, Heater, MonotonicClock};

use crate::acquisition::{Acquisition, RawSample};
use crate::buffer::MeasurementBuffer;
use crate::config::BenchCfg;
use crate::error::{BenchError, BenchResult, BuildError, ConfigError, Result};
use crate::frame::SensorFrame;
use crate::hw_error::map_hw_error;
use crate::mode::{Action, Mode};
use crate::observer::{Observer, TracingObserver};
use crate::pid::{Gains, PidController, PidOutput};
use crate::safety::{self, Interlock, SafetyFault};
use crate::scheduler::Scheduler;
use crate::status::{BenchStatus, CycleOutcome, Fault, FaultCounters};
use crate::util::{duty_max_raw, duty_to_raw};

/// Timeout handed to heater writes and flow-setpoint commands.
const ACTUATOR_TIMEOUT: Duration = Duration::from_millis(100);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // The loop must survive a panicking observer; state stays consistent
    // because every mutation completes before user code is called.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct ControlState {
    mode: Mode,
    pid: PidController,
    manual_duty: f64,
    applied_duty: f64,
    calibration_offset: f64,
    heater: Box<dyn Heater + Send>,
    max_raw: u32,
    buffer: MeasurementBuffer,
    buffering: bool,
    latest: Option<SensorFrame>,
    faults: FaultCounters,
    active_fault: Option<Fault>,
    /// Set while `stop_measurement_loop` runs; cycles do nothing.
    stopping: bool,
}

/// Hooks to call once the state lock is released.
#[derive(Default)]
struct Pending {
    raised: Option<Fault>,
    cleared: Option<Fault>,
    frame: Option<SensorFrame>,
    acquisition_error: Option<BenchError>,
}

/// Result of a checked heater write.
struct Applied {
    duty: f64,
    safety: Option<SafetyFault>,
    write_failed: bool,
}

impl ControlState {
    /// Write `duty` to the heater. A failed write leaves `applied_duty`
    /// unchanged.
    fn write_heater(&mut self, duty: f64) -> BenchResult<()> {
        let raw = duty_to_raw(duty, self.max_raw);
        match self.heater.write_duty(raw, ACTUATOR_TIMEOUT) {
            Ok(()) => {
                self.applied_duty = duty;
                Ok(())
            }
            Err(e) => {
                let err = map_hw_error(e.as_ref());
                tracing::error!(error = %err, raw, "heater write failed");
                Err(err)
            }
        }
    }

    /// Write zero outside a control cycle; a failure is counted.
    fn force_off(&mut self) {
        if self.write_heater(0.0).is_err() {
            self.faults.record(Fault::DeviceError);
        }
    }

    /// Record `fault` for this cycle; returns it if it just became active.
    fn note_fault(&mut self, fault: Fault) -> Option<Fault> {
        self.faults.record(fault);
        if self.active_fault == Some(fault) {
            None
        } else {
            self.active_fault = Some(fault);
            Some(fault)
        }
    }

    fn clear_fault(&mut self) -> Option<Fault> {
        self.active_fault.take()
    }
}

pub struct Setup {
    cfg: BenchCfg,
    state: Mutex<ControlState>,
    scheduler: Mutex<Scheduler>,
    acquisition: Mutex<Acquisition>,
    observer: Arc<dyn Observer>,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    simulated: bool,
}

impl std::fmt::Debug for Setup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Setup")
            .field("cfg", &self.cfg)
            .field("simulated", &self.simulated)
            .finish_non_exhaustive()
    }
}

impl Setup {
    pub fn builder() -> SetupBuilder {
        SetupBuilder::default()
    }

    pub fn config(&self) -> &BenchCfg {
        &self.cfg
    }

    /// True when running on the simulated bench.
    pub fn is_simulated(&self) -> bool {
        self.simulated
    }

    pub fn mode(&self) -> Mode {
        lock(&self.state).mode
    }

    // ── Control cycle ────────────────────────────────────────────────────

    /// Run one control cycle: acquire, control, interlock, actuate, record.
    ///
    /// Called by the measurement loop every period; also usable directly to
    /// drive the bench step by step.
    pub fn run_cycle(&self) -> CycleOutcome {
        let sample = lock(&self.acquisition).sample(self.cfg.sampling.sensor_timeout);
        let timestamp = self.clock.secs_since(self.epoch);

        let mut pending = Pending::default();
        let outcome = {
            let mut st = lock(&self.state);
            if st.stopping {
                return CycleOutcome::Skipped;
            }
            match sample {
                Ok(raw) if raw.is_finite() => self.control(&mut st, raw, timestamp, &mut pending),
                other => {
                    let err = match other {
                        Err(e) => e,
                        Ok(_) => BenchError::Device("non-finite sensor reading".into()),
                    };
                    let fault = if err == BenchError::Timeout {
                        Fault::SensorTimeout
                    } else {
                        Fault::DeviceError
                    };
                    st.force_off();
                    pending.raised = st.note_fault(fault);
                    pending.acquisition_error = Some(err);
                    CycleOutcome::AcquisitionFailed { fault }
                }
            }
        };
        self.notify(pending);
        outcome
    }

    fn control(
        &self,
        st: &mut ControlState,
        raw: RawSample,
        timestamp: f64,
        pending: &mut Pending,
    ) -> CycleOutcome {
        let d = raw.dual;
        let difference = d.temperature_2 - d.temperature_1 - st.calibration_offset;

        let (candidate, terms) = match st.mode {
            Mode::PidOn => {
                let out = st.pid.update(difference);
                (out.output, out)
            }
            Mode::ManualOn => (st.manual_duty, PidOutput::default()),
            _ => (0.0, PidOutput::default()),
        };

        let mut frame = SensorFrame {
            temperature_1: d.temperature_1,
            temperature_2: d.temperature_2,
            humidity_1: d.humidity_1,
            humidity_2: d.humidity_2,
            flow: raw.flow,
            timestamp,
            temperature_difference: difference,
            duty_cycle: 0.0,
            flow_estimate: 0.0,
            target_delta_t: st.pid.setpoint(),
            controller_p: terms.p,
            controller_i: terms.i,
            controller_d: terms.d,
            controller_output: terms.output,
        };

        let decision = safety::evaluate(&frame, &self.cfg.safety, candidate);
        let applied = self.apply_checked(st, &frame, decision.duty());
        let safety_fault = decision.fault().or(applied.safety).map(Fault::from);
        let fault = if applied.write_failed {
            if let Some(f) = safety_fault {
                st.faults.record(f);
            }
            Some(Fault::DeviceError)
        } else {
            safety_fault
        };
        let duty = applied.duty;

        frame.duty_cycle = duty;
        frame.flow_estimate = self.cfg.estimator.estimate(difference, duty);

        match fault {
            Some(f) => pending.raised = st.note_fault(f),
            None => pending.cleared = st.clear_fault(),
        }

        st.latest = Some(frame);
        if st.buffering
            && let Err(e) = st.buffer.update_frame(&frame)
        {
            tracing::error!(error = %e, "history append rejected");
        }
        pending.frame = Some(frame);
        CycleOutcome::Completed { duty, fault }
    }

    /// Re-check the interlocks against `frame` and write the result.
    ///
    /// Every heater write with a non-zero duty goes through here, whether
    /// it comes from the loop or from a caller. The returned duty is the
    /// one the heater last accepted.
    fn apply_checked(&self, st: &mut ControlState, frame: &SensorFrame, duty: f64) -> Applied {
        let decision = safety::evaluate(frame, &self.cfg.safety, duty);
        let duty = match decision {
            Interlock::Allow(d) => d,
            Interlock::ForceZero(_) => 0.0,
        };
        let write_failed = st.write_heater(duty).is_err();
        if write_failed && duty > 0.0 {
            let _ = st.write_heater(0.0);
        }
        Applied {
            duty: st.applied_duty,
            safety: decision.fault(),
            write_failed,
        }
    }

    fn notify(&self, p: Pending) {
        if let Some(f) = p.cleared {
            self.observer.fault_cleared(f);
        }
        if let Some(e) = &p.acquisition_error {
            self.observer.acquisition_failed(e);
        }
        if let Some(f) = p.raised {
            self.observer.fault(f);
        }
        if let Some(frame) = &p.frame {
            self.observer.frame(frame);
        }
    }

    // ── Measurement loop ─────────────────────────────────────────────────

    /// Start the periodic loop. Clears the measurement history.
    pub fn start_measurement_loop(self: &Arc<Self>) -> BenchResult<()> {
        let mut sched = lock(&self.scheduler);
        if sched.is_running() {
            return Err(BenchError::AlreadyRunning);
        }
        {
            let mut st = lock(&self.state);
            st.buffer.clear();
            st.stopping = false;
        }
        let weak: Weak<Setup> = Arc::downgrade(self);
        sched.start(self.cfg.sampling.period, move || match weak.upgrade() {
            Some(setup) => {
                setup.run_cycle();
                ControlFlow::Continue(())
            }
            None => ControlFlow::Break(()),
        })?;
        drop(sched);
        tracing::info!(period_ms = self.cfg.sampling.period.as_millis() as u64, "loop started");
        self.observer.loop_state(true);
        Ok(())
    }

    /// Stop the loop with the heater off.
    ///
    /// The heater is zeroed and the controller reset before the loop is
    /// cancelled; when this returns no cycle is in flight and the heater
    /// has been written zero after the last cycle.
    pub fn stop_measurement_loop(&self) -> BenchResult<()> {
        let mut sched = lock(&self.scheduler);
        if !sched.is_running() {
            return Err(BenchError::NotRunning);
        }
        let transition = {
            let mut st = lock(&self.state);
            st.stopping = true;
            st.force_off();
            st.pid.reset();
            st.manual_duty = 0.0;
            let from = st.mode;
            st.mode = from.with_output_disabled();
            (from != st.mode).then_some((from, st.mode))
        };
        let stopped = sched.stop();
        {
            let mut st = lock(&self.state);
            st.force_off();
            st.stopping = false;
        }
        drop(sched);
        if let Some((from, to)) = transition {
            self.observer.mode_changed(from, to);
        }
        self.observer.loop_state(false);
        tracing::info!("loop stopped");
        stopped
    }

    pub fn is_running(&self) -> bool {
        lock(&self.scheduler).is_running()
    }

    // ── Mode ─────────────────────────────────────────────────────────────

    fn transition(&self, action: Action) -> BenchResult<Mode> {
        let (from, to, raised) = {
            let mut st = lock(&self.state);
            let from = st.mode;
            let to = from.apply(action)?;
            let mut raised = None;
            match to {
                Mode::PidOn => st.pid.reset(),
                Mode::ManualOn => {
                    let duty = st.manual_duty;
                    raised = self.apply_manual(&mut st, duty);
                }
                Mode::ManualOff | Mode::PidOff if from.output_enabled() => st.force_off(),
                _ => {}
            }
            st.mode = to;
            (from, to, raised)
        };
        self.observer.mode_changed(from, to);
        if let Some(f) = raised {
            self.observer.fault(f);
        }
        Ok(to)
    }

    /// `Idle` or `PidOff` → `ManualOff`.
    pub fn start_direct_power_setting(&self) -> BenchResult<Mode> {
        self.transition(Action::StartDirectPowerSetting)
    }

    /// `Idle` or `ManualOff` → `PidOff`.
    pub fn start_pid_controller(&self) -> BenchResult<Mode> {
        self.transition(Action::StartPidController)
    }

    /// `ManualOff` → `ManualOn`, `PidOff` → `PidOn` (with a PID reset).
    pub fn enable_output(&self) -> BenchResult<Mode> {
        self.transition(Action::EnableOutput)
    }

    /// `*On` → `*Off`; the heater is written zero.
    pub fn disable_output(&self) -> BenchResult<Mode> {
        self.transition(Action::DisableOutput)
    }

    /// `*Off` → `Idle`.
    pub fn return_to_idle(&self) -> BenchResult<Mode> {
        self.transition(Action::ReturnToIdle)
    }

    // ── Manual power ─────────────────────────────────────────────────────

    /// Set the manual duty (0..=1). Applied at once when in `ManualOn`,
    /// subject to the interlocks against the latest frame.
    pub fn set_duty(&self, duty: f64) -> BenchResult<()> {
        if !(duty.is_finite() && (0.0..=1.0).contains(&duty)) {
            return Err(ConfigError::InvalidDuty(duty).into());
        }
        let raised = {
            let mut st = lock(&self.state);
            st.manual_duty = duty;
            if st.mode == Mode::ManualOn {
                self.apply_manual(&mut st, duty)
            } else {
                None
            }
        };
        if let Some(f) = raised {
            self.observer.fault(f);
        }
        Ok(())
    }

    fn apply_manual(&self, st: &mut ControlState, duty: f64) -> Option<Fault> {
        match st.latest {
            Some(frame) => {
                let applied = self.apply_checked(st, &frame, duty);
                if applied.write_failed {
                    st.note_fault(Fault::DeviceError)
                } else {
                    applied.safety.and_then(|f| st.note_fault(f.into()))
                }
            }
            // No frame to check against yet; the first cycle applies it.
            None => {
                st.force_off();
                None
            }
        }
    }

    pub fn manual_duty(&self) -> f64 {
        lock(&self.state).manual_duty
    }

    // ── Controller ───────────────────────────────────────────────────────

    pub fn set_setpoint(&self, target: f64) -> BenchResult<()> {
        let max = self.cfg.controller.max_setpoint;
        if !(target.is_finite() && (0.0..=max).contains(&target)) {
            return Err(ConfigError::InvalidSetpoint { value: target, max }.into());
        }
        lock(&self.state).pid.set_setpoint(target);
        Ok(())
    }

    pub fn setpoint(&self) -> f64 {
        lock(&self.state).pid.setpoint()
    }

    pub fn set_kp(&self, kp: f64) -> BenchResult<()> {
        Ok(lock(&self.state).pid.set_kp(kp)?)
    }

    pub fn set_ki(&self, ki: f64) -> BenchResult<()> {
        Ok(lock(&self.state).pid.set_ki(ki)?)
    }

    pub fn set_kd(&self, kd: f64) -> BenchResult<()> {
        Ok(lock(&self.state).pid.set_kd(kd)?)
    }

    pub fn set_filter_time_constant(&self, tau_s: f64) -> BenchResult<()> {
        Ok(lock(&self.state).pid.set_filter_time_constant(tau_s)?)
    }

    pub fn gains(&self) -> Gains {
        lock(&self.state).pid.gains()
    }

    // ── Flow ─────────────────────────────────────────────────────────────

    pub fn set_flow(&self, slm: f64) -> BenchResult<()> {
        let max = self.cfg.flow.max_slm;
        if !(slm.is_finite() && (0.0..=max).contains(&slm)) {
            return Err(ConfigError::InvalidFlow { value: slm, max }.into());
        }
        // The worker may still be finishing a sample before it gets to us.
        let wait = self.cfg.sampling.sensor_timeout + ACTUATOR_TIMEOUT;
        lock(&self.acquisition).set_flow(slm, wait)?;
        tracing::info!(slm, "flow setpoint");
        Ok(())
    }

    pub fn set_nominal_flow(&self) -> BenchResult<()> {
        self.set_flow(self.cfg.flow.nominal_slm)
    }

    // ── Calibration ──────────────────────────────────────────────────────

    /// Capture the current raw differential as the calibration offset.
    ///
    /// Averages `temperature_2 - temperature_1` over the newest
    /// `calibration.window` buffered samples, or uses the latest frame when
    /// nothing is buffered. Returns the accepted offset.
    pub fn set_temperature_calibration(&self) -> BenchResult<f64> {
        let mut st = lock(&self.state);
        let window = self.cfg.calibration.window;
        let t1 = st.buffer.tail("temperature_1", window)?;
        let t2 = st.buffer.tail("temperature_2", window)?;
        let offset = if t1.is_empty() {
            st.latest
                .as_ref()
                .map(SensorFrame::raw_difference)
                .ok_or(BenchError::NoMeasurement)?
        } else {
            let sum: f64 = t1.iter().zip(&t2).map(|(a, b)| b - a).sum();
            sum / t1.len() as f64
        };
        let limit = self.cfg.calibration.max_offset_c;
        if !(offset.is_finite() && offset.abs() <= limit) {
            return Err(ConfigError::CalibrationRejected { offset, limit }.into());
        }
        st.calibration_offset = offset;
        tracing::info!(offset, "temperature calibration set");
        Ok(offset)
    }

    pub fn reset_temperature_calibration(&self) {
        lock(&self.state).calibration_offset = 0.0;
    }

    pub fn calibration_offset(&self) -> f64 {
        lock(&self.state).calibration_offset
    }

    // ── History ──────────────────────────────────────────────────────────

    pub fn start_buffering(&self) {
        lock(&self.state).buffering = true;
    }

    pub fn stop_buffering(&self) {
        lock(&self.state).buffering = false;
    }

    pub fn clear_history(&self) {
        lock(&self.state).buffer.clear();
    }

    /// Buffered values of `signal`, oldest first.
    pub fn history(&self, signal: &str) -> BenchResult<Vec<f64>> {
        lock(&self.state).buffer.get(signal)
    }

    /// Copy of the whole history as `(signal, values)` pairs.
    pub fn history_snapshot(&self) -> Vec<(String, Vec<f64>)> {
        let st = lock(&self.state);
        st.buffer
            .signals()
            .iter()
            .map(|s| (s.clone(), st.buffer.get(s).unwrap_or_default()))
            .collect()
    }

    // ── Results ──────────────────────────────────────────────────────────

    pub fn latest_frame(&self) -> Option<SensorFrame> {
        lock(&self.state).latest
    }

    pub fn status(&self) -> BenchStatus {
        let (running, overruns) = {
            let s = lock(&self.scheduler);
            (s.is_running(), s.overruns())
        };
        let st = lock(&self.state);
        BenchStatus {
            mode: st.mode,
            applied_duty: st.applied_duty,
            manual_duty: st.manual_duty,
            setpoint: st.pid.setpoint(),
            gains: st.pid.gains(),
            calibration_offset: st.calibration_offset,
            active_fault: st.active_fault,
            faults: st.faults,
            overruns,
            simulated: self.simulated,
            running,
            buffering: st.buffering,
            history_len: st.buffer.len(),
        }
    }
}

impl Drop for Setup {
    fn drop(&mut self) {
        let st = self
            .state
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        st.stopping = true;
        st.force_off();
    }
}

// ── Builder ──────────────────────────────────────────────────────────────────

/// Assembles a `Setup`.
///
/// Devices come from the provider. When it reports a device as unavailable
/// (or `simulate` is set) the fallback provider, normally the simulated
/// bench, is opened instead; this is decided once, here.
#[derive(Default)]
pub struct SetupBuilder {
    cfg: Option<BenchCfg>,
    provider: Option<Box<dyn DeviceProvider + Send>>,
    fallback: Option<Box<dyn DeviceProvider + Send>>,
    observer: Option<Arc<dyn Observer>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl SetupBuilder {
    pub fn with_config(mut self, cfg: BenchCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    pub fn with_provider(mut self, provider: impl DeviceProvider + Send + 'static) -> Self {
        self.provider = Some(Box::new(provider));
        self
    }

    /// Provider used when the real devices are unavailable.
    pub fn with_fallback(mut self, provider: impl DeviceProvider + Send + 'static) -> Self {
        self.fallback = Some(Box::new(provider));
        self
    }

    /// Defaults to `TracingObserver`.
    pub fn with_observer(mut self, observer: Arc<dyn Observer>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Clock for frame timestamps; defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    fn open(&mut self, cfg: &BenchCfg) -> Result<(DeviceHandles, bool)> {
        if cfg.simulate {
            let mut fallback = self
                .fallback
                .take()
                .ok_or_else(|| eyre::Report::new(BuildError::MissingFallback))?;
            let handles = fallback
                .open_devices()
                .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
            tracing::info!("simulation requested by configuration");
            return Ok((handles, true));
        }

        let mut provider = self
            .provider
            .take()
            .ok_or_else(|| eyre::Report::new(BuildError::MissingProvider))?;
        match provider.open_devices() {
            Ok(handles) => Ok((handles, false)),
            Err(e) => match map_hw_error(e.as_ref()) {
                BenchError::DeviceUnavailable(why) => {
                    let Some(mut fallback) = self.fallback.take() else {
                        return Err(eyre::Report::new(BenchError::DeviceUnavailable(why)));
                    };
                    tracing::warn!(reason = %why, "devices unavailable; entering simulation mode");
                    let handles = fallback
                        .open_devices()
                        .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))?;
                    Ok((handles, true))
                }
                other => Err(eyre::Report::new(other).wrap_err("open devices")),
            },
        }
    }

    pub fn build(mut self) -> Result<Arc<Setup>> {
        let cfg = self.cfg.take().unwrap_or_default();
        cfg.validate().map_err(eyre::Report::new)?;

        let pid = PidController::new(cfg.controller.pid_settings(cfg.sampling.period))
            .map_err(|e| eyre::Report::new(BenchError::from(e)))?;
        let buffer = MeasurementBuffer::for_frames(cfg.buffer_capacity())
            .map_err(eyre::Report::new)?;

        let observer = self
            .observer
            .take()
            .unwrap_or_else(|| Arc::new(TracingObserver) as Arc<dyn Observer>);
        let clock = self
            .clock
            .take()
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()) as Arc<dyn Clock + Send + Sync>);

        let (handles, simulated) = self.open(&cfg)?;
        let DeviceHandles {
            thermo,
            flow,
            heater,
        } = handles;
        let acquisition = Acquisition::spawn(thermo, flow, cfg.sampling.sensor_timeout)
            .map_err(eyre::Report::new)?;

        let mut state = ControlState {
            mode: Mode::Idle,
            pid,
            manual_duty: 0.0,
            applied_duty: 0.0,
            calibration_offset: 0.0,
            heater,
            max_raw: duty_max_raw(cfg.duty_resolution_bits),
            buffer,
            buffering: true,
            latest: None,
            faults: FaultCounters::default(),
            active_fault: None,
            stopping: false,
        };
        // Start from a known-off heater.
        state
            .write_heater(0.0)
            .map_err(|e| eyre::Report::new(e).wrap_err("initial heater write"))?;

        let epoch = clock.now();
        tracing::info!(
            simulated,
            capacity = cfg.buffer_capacity(),
            period_ms = cfg.sampling.period.as_millis() as u64,
            "bench setup ready"
        );
        Ok(Arc::new(Setup {
            cfg,
            state: Mutex::new(state),
            scheduler: Mutex::new(Scheduler::new()),
            acquisition: Mutex::new(acquisition),
            observer,
            clock,
            epoch,
            simulated,
        }))
    }
}
