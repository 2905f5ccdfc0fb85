//! Fixed-period loop driver.
//!
//! Spawns one thread that calls the tick closure, then waits on a stop
//! channel until the next deadline. Deadlines advance by whole periods
//! from the start instant; when a tick overruns, the missed slots are
//! skipped (never run back-to-back) and counted as overruns. Ticks never
//! overlap: the next one starts only after the previous returned.
//!
//! Safety: the thread is joined on `stop()` and on drop, so a `Scheduler`
//! never leaks its worker.
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{JoinHandle, ThreadId};
use std::time::{Duration, Instant};

use crossbeam_channel as xch;

use crate::error::{BenchError, BenchResult};

struct Worker {
    stop_tx: xch::Sender<()>,
    join_handle: JoinHandle<()>,
    thread_id: ThreadId,
}

#[derive(Default)]
pub struct Scheduler {
    worker: Option<Worker>,
    ticks: Arc<AtomicU64>,
    overruns: Arc<AtomicU64>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_running())
            .field("ticks", &self.ticks())
            .field("overruns", &self.overruns())
            .finish()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start calling `tick` every `period`. The first tick runs immediately.
    ///
    /// `tick` returning `ControlFlow::Break` ends the loop from the inside.
    pub fn start<F>(&mut self, period: Duration, mut tick: F) -> BenchResult<()>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        if self.is_running() {
            return Err(BenchError::AlreadyRunning);
        }
        // A worker that ended itself via Break is reaped here.
        self.reap();

        let period = period.max(Duration::from_micros(1));
        let (stop_tx, stop_rx) = xch::bounded::<()>(1);
        let ticks = self.ticks.clone();
        let overruns = self.overruns.clone();

        let join_handle = std::thread::Builder::new()
            .name("bench-loop".into())
            .spawn(move || {
                let mut next = Instant::now();
                loop {
                    if tick().is_break() {
                        tracing::debug!("tick requested loop exit");
                        break;
                    }
                    ticks.fetch_add(1, Ordering::Relaxed);

                    next += period;
                    let now = Instant::now();
                    let mut missed = 0u64;
                    while next < now {
                        next += period;
                        missed += 1;
                    }
                    if missed > 0 {
                        overruns.fetch_add(missed, Ordering::Relaxed);
                        tracing::warn!(missed, "control cycle overran its period");
                    }

                    match stop_rx.recv_timeout(next.saturating_duration_since(Instant::now())) {
                        Err(xch::RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(xch::RecvTimeoutError::Disconnected) => break,
                    }
                }
                tracing::trace!("scheduler thread exiting cleanly");
            })
            .map_err(|e| BenchError::Device(format!("spawn scheduler thread: {e}")))?;

        let thread_id = join_handle.thread().id();
        self.worker = Some(Worker {
            stop_tx,
            join_handle,
            thread_id,
        });
        Ok(())
    }

    /// Stop the loop, waiting for an in-flight tick to finish.
    ///
    /// Called from inside a tick it only signals the worker, since joining
    /// the current thread would deadlock.
    pub fn stop(&mut self) -> BenchResult<()> {
        let worker = match self.worker.take() {
            Some(w) if !w.join_handle.is_finished() => w,
            Some(w) => {
                Self::join(w);
                return Err(BenchError::NotRunning);
            }
            None => return Err(BenchError::NotRunning),
        };
        let _ = worker.stop_tx.try_send(());
        if std::thread::current().id() == worker.thread_id {
            tracing::debug!("scheduler stopped from its own thread; not joining");
            return Ok(());
        }
        Self::join(worker);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|w| !w.join_handle.is_finished())
    }

    /// Completed ticks since construction.
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Skipped slots since construction.
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    fn reap(&mut self) {
        if let Some(w) = self.worker.take() {
            Self::join(w);
        }
    }

    fn join(worker: Worker) {
        drop(worker.stop_tx);
        if std::thread::current().id() == worker.thread_id {
            return;
        }
        match worker.join_handle.join() {
            Ok(()) => tracing::trace!("scheduler thread joined successfully"),
            // Thread panicked; log but don't propagate
            Err(e) => tracing::warn!(?e, "scheduler thread panicked"),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(w) = self.worker.take() {
            let _ = w.stop_tx.try_send(());
            Self::join(w);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn double_start_and_stop_without_start() {
        let mut s = Scheduler::new();
        assert_eq!(s.stop(), Err(BenchError::NotRunning));
        s.start(Duration::from_millis(20), || ControlFlow::Continue(()))
            .unwrap();
        assert_eq!(
            s.start(Duration::from_millis(20), || ControlFlow::Continue(())),
            Err(BenchError::AlreadyRunning)
        );
        s.stop().unwrap();
        assert_eq!(s.stop(), Err(BenchError::NotRunning));
    }

    #[test]
    fn ticks_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        let (a, m) = (active.clone(), max_seen.clone());
        let mut s = Scheduler::new();
        s.start(Duration::from_millis(2), move || {
            let now = a.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(5));
            a.fetch_sub(1, Ordering::SeqCst);
            ControlFlow::Continue(())
        })
        .unwrap();
        std::thread::sleep(Duration::from_millis(60));
        s.stop().unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert!(s.overruns() > 0);
    }

    #[test]
    fn break_ends_loop_and_allows_restart() {
        let mut s = Scheduler::new();
        s.start(Duration::from_millis(1), || ControlFlow::Break(()))
            .unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(!s.is_running());
        s.start(Duration::from_millis(1), || ControlFlow::Continue(()))
            .unwrap();
        assert!(s.is_running());
        s.stop().unwrap();
    }
}
