//! Bounded sensor acquisition.
//!
//! A dedicated thread owns the thermo-hygrometer and the flow controller
//! and serves requests one at a time. Callers wait for the answer at most
//! `timeout`; a request that is abandoned keeps running on the worker and
//! its late reply is recognized by sequence number and dropped. A hung
//! device therefore costs the control loop one bounded wait per cycle,
//! never a blocked tick.
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use bench_traits::{DualReading, FlowController, ThermoHygrometer};
use crossbeam_channel as xch;

use crate::error::{BenchError, BenchResult};
use crate::hw_error::map_hw_error;

/// Raw device readings for one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawSample {
    pub dual: DualReading,
    /// SLM
    pub flow: f64,
}

impl RawSample {
    pub fn is_finite(&self) -> bool {
        let d = &self.dual;
        [
            d.temperature_1,
            d.temperature_2,
            d.humidity_1,
            d.humidity_2,
            self.flow,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

enum Request {
    Sample { seq: u64 },
    SetFlow { seq: u64, slm: f64 },
}

enum Reply {
    Sample {
        seq: u64,
        result: BenchResult<RawSample>,
    },
    SetFlow {
        seq: u64,
        result: BenchResult<()>,
    },
}

impl Reply {
    fn seq(&self) -> u64 {
        match self {
            Reply::Sample { seq, .. } | Reply::SetFlow { seq, .. } => *seq,
        }
    }
}

/// Requests waiting on a busy worker before new ones are refused.
const QUEUE_DEPTH: usize = 2;

pub struct Acquisition {
    req_tx: Option<xch::Sender<Request>>,
    reply_rx: xch::Receiver<Reply>,
    seq: u64,
    device_timeout: Duration,
    join_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquisition")
            .field("seq", &self.seq)
            .field("device_timeout", &self.device_timeout)
            .finish_non_exhaustive()
    }
}

fn read_sample(
    thermo: &mut (dyn ThermoHygrometer + Send),
    flow: &mut (dyn FlowController + Send),
    timeout: Duration,
) -> BenchResult<RawSample> {
    let dual = thermo
        .read_dual(timeout)
        .map_err(|e| map_hw_error(e.as_ref()))?;
    let flow = flow
        .read_flow(timeout)
        .map_err(|e| map_hw_error(e.as_ref()))?;
    Ok(RawSample { dual, flow })
}

impl Acquisition {
    /// Move the sensors onto a worker thread. `device_timeout` is passed to
    /// each device call.
    pub fn spawn(
        mut thermo: Box<dyn ThermoHygrometer + Send>,
        mut flow: Box<dyn FlowController + Send>,
        device_timeout: Duration,
    ) -> BenchResult<Self> {
        let (req_tx, req_rx) = xch::bounded::<Request>(QUEUE_DEPTH);
        let (reply_tx, reply_rx) = xch::unbounded::<Reply>();

        let join_handle = std::thread::Builder::new()
            .name("bench-acquisition".into())
            .spawn(move || {
                for req in req_rx {
                    let reply = match req {
                        Request::Sample { seq } => Reply::Sample {
                            seq,
                            result: read_sample(thermo.as_mut(), flow.as_mut(), device_timeout),
                        },
                        Request::SetFlow { seq, slm } => Reply::SetFlow {
                            seq,
                            result: flow
                                .set_flow(slm, device_timeout)
                                .map_err(|e| map_hw_error(e.as_ref())),
                        },
                    };
                    // If send fails, the owner is gone; exit gracefully
                    if reply_tx.send(reply).is_err() {
                        break;
                    }
                }
                tracing::trace!("acquisition thread exiting cleanly");
            })
            .map_err(|e| BenchError::Device(format!("spawn acquisition thread: {e}")))?;

        Ok(Self {
            req_tx: Some(req_tx),
            reply_rx,
            seq: 0,
            device_timeout,
            join_handle: Some(join_handle),
        })
    }

    /// Read both sensors and the flow, waiting at most `timeout`.
    pub fn sample(&mut self, timeout: Duration) -> BenchResult<RawSample> {
        let seq = self.post(|seq| Request::Sample { seq })?;
        match self.wait(seq, timeout)? {
            Reply::Sample { result, .. } => result,
            Reply::SetFlow { .. } => Err(BenchError::Device("mismatched reply".into())),
        }
    }

    /// Command a flow setpoint, waiting at most `timeout`.
    pub fn set_flow(&mut self, slm: f64, timeout: Duration) -> BenchResult<()> {
        let seq = self.post(|seq| Request::SetFlow { seq, slm })?;
        match self.wait(seq, timeout)? {
            Reply::SetFlow { result, .. } => result,
            Reply::Sample { .. } => Err(BenchError::Device("mismatched reply".into())),
        }
    }

    fn post(&mut self, make: impl FnOnce(u64) -> Request) -> BenchResult<u64> {
        self.seq = self.seq.wrapping_add(1);
        let seq = self.seq;
        let tx = self
            .req_tx
            .as_ref()
            .ok_or_else(|| BenchError::Device("acquisition stopped".into()))?;
        match tx.try_send(make(seq)) {
            Ok(()) => Ok(seq),
            // Worker still stuck on earlier requests.
            Err(xch::TrySendError::Full(_)) => Err(BenchError::Timeout),
            Err(xch::TrySendError::Disconnected(_)) => {
                Err(BenchError::Device("acquisition worker exited".into()))
            }
        }
    }

    fn wait(&self, seq: u64, timeout: Duration) -> BenchResult<Reply> {
        let deadline = Instant::now() + timeout;
        loop {
            let left = deadline.saturating_duration_since(Instant::now());
            match self.reply_rx.recv_timeout(left) {
                Ok(reply) if reply.seq() == seq => return Ok(reply),
                Ok(stale) => {
                    tracing::trace!(stale = stale.seq(), current = seq, "dropping late reply");
                }
                Err(xch::RecvTimeoutError::Timeout) => return Err(BenchError::Timeout),
                Err(xch::RecvTimeoutError::Disconnected) => {
                    return Err(BenchError::Device("acquisition worker exited".into()));
                }
            }
        }
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        // Closing the request channel ends the worker after its current call.
        self.req_tx.take();
        let Some(handle) = self.join_handle.take() else {
            return;
        };
        // Device calls are bounded by `device_timeout`; give the worker a
        // few of those, then detach rather than hang the owner.
        let grace = self.device_timeout.saturating_mul(4) + Duration::from_millis(100);
        let deadline = Instant::now() + grace;
        while !handle.is_finished() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
        if handle.is_finished() {
            if let Err(e) = handle.join() {
                tracing::warn!(?e, "acquisition thread panicked");
            }
        } else {
            tracing::warn!("acquisition thread still busy on drop; detaching");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{HangingThermo, ScriptedThermo, SettableFlow};

    fn reading(t1: f64, t2: f64) -> DualReading {
        DualReading {
            temperature_1: t1,
            humidity_1: 40.0,
            temperature_2: t2,
            humidity_2: 35.0,
        }
    }

    #[test]
    fn samples_come_back_in_order() {
        let thermo = ScriptedThermo::new(vec![reading(20.0, 25.0), reading(20.0, 26.0)]);
        let flow = SettableFlow::new(4.0);
        let mut acq =
            Acquisition::spawn(Box::new(thermo), Box::new(flow), Duration::from_millis(50))
                .unwrap();
        let a = acq.sample(Duration::from_millis(500)).unwrap();
        let b = acq.sample(Duration::from_millis(500)).unwrap();
        assert_eq!(a.dual.temperature_2, 25.0);
        assert_eq!(b.dual.temperature_2, 26.0);
        assert_eq!(a.flow, 4.0);
    }

    #[test]
    fn set_flow_reaches_the_controller() {
        let flow = SettableFlow::new(0.0);
        let probe = flow.clone();
        let mut acq = Acquisition::spawn(
            Box::new(ScriptedThermo::constant(reading(20.0, 20.0))),
            Box::new(flow),
            Duration::from_millis(50),
        )
        .unwrap();
        acq.set_flow(12.5, Duration::from_millis(500)).unwrap();
        assert_eq!(probe.current(), 12.5);
        let s = acq.sample(Duration::from_millis(500)).unwrap();
        assert_eq!(s.flow, 12.5);
    }

    #[test]
    fn hung_sensor_times_out_and_late_reply_is_dropped() {
        let thermo = HangingThermo::new(Duration::from_millis(120), reading(20.0, 22.0));
        let mut acq = Acquisition::spawn(
            Box::new(thermo),
            Box::new(SettableFlow::new(5.0)),
            Duration::from_millis(20),
        )
        .unwrap();
        let started = Instant::now();
        assert_eq!(
            acq.sample(Duration::from_millis(20)),
            Err(BenchError::Timeout)
        );
        assert!(started.elapsed() < Duration::from_millis(110));
        // Let the abandoned request finish; its reply must not be taken as
        // the answer to the next request.
        std::thread::sleep(Duration::from_millis(150));
        let s = acq.sample(Duration::from_millis(500)).unwrap();
        assert_eq!(s.dual.temperature_2, 22.0);
        assert_eq!(acq.seq, 2);
    }
}
