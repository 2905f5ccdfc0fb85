//! Observability hooks injected into the orchestrator.
//!
//! Hooks must not call back into `Setup`; they may run while the loop is
//! being stopped.
//!
//! All hooks have empty defaults; implement only what you need. Hooks run
//! on whichever thread triggered them, after the state lock is released.
use crate::error::BenchError;
use crate::frame::SensorFrame;
use crate::mode::Mode;
use crate::status::Fault;

pub trait Observer: Send + Sync {
    /// A cycle completed and produced `frame`.
    fn frame(&self, _frame: &SensorFrame) {}
    /// `fault` became active (edge, not every cycle).
    fn fault(&self, _fault: Fault) {}
    /// The previously active fault cleared.
    fn fault_cleared(&self, _fault: Fault) {}
    fn mode_changed(&self, _from: Mode, _to: Mode) {}
    fn acquisition_failed(&self, _err: &BenchError) {}
    fn loop_state(&self, _running: bool) {}
}

/// Forwards every hook to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn frame(&self, f: &SensorFrame) {
        tracing::debug!(
            t = f.timestamp,
            dt = f.temperature_difference,
            flow = f.flow,
            duty = f.duty_cycle,
            flow_est = f.flow_estimate,
            target = f.target_delta_t,
            out = f.controller_output,
            "cycle"
        );
    }

    fn fault(&self, fault: Fault) {
        tracing::warn!(%fault, "heater forced off");
    }

    fn fault_cleared(&self, fault: Fault) {
        tracing::info!(%fault, "fault cleared");
    }

    fn mode_changed(&self, from: Mode, to: Mode) {
        tracing::info!(%from, %to, "mode changed");
    }

    fn acquisition_failed(&self, err: &BenchError) {
        tracing::warn!(error = %err, "acquisition failed");
    }

    fn loop_state(&self, running: bool) {
        tracing::info!(running, "measurement loop");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl Observer for NoopObserver {}
