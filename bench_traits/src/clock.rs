use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic clock abstraction used for frame timestamps and pacing.
///
/// - now(): returns a monotonic Instant
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - secs_since(): elapsed seconds from an epoch Instant
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    /// Seconds elapsed since `epoch`, saturating at 0 on underflow.
    fn secs_since(&self, epoch: Instant) -> f64 {
        self.now().saturating_duration_since(epoch).as_secs_f64()
    }
}

/// Default, real-time monotonic clock backed by std::time::Instant.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// now() = origin + offset; sleep(d) advances the offset without blocking.
/// Clones share the same offset, so a test can hold one handle while the
/// core holds another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }

    pub fn set_offset(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = d;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_moves_only_when_advanced() {
        let clock = ManualClock::new();
        let epoch = clock.now();
        assert_eq!(clock.secs_since(epoch), 0.0);
        clock.sleep(Duration::from_millis(1500));
        assert!((clock.secs_since(epoch) - 1.5).abs() < 1e-9);
    }

    #[test]
    fn clones_share_time() {
        let a = ManualClock::new();
        let b = a.clone();
        let epoch = a.now();
        b.advance(Duration::from_secs(2));
        assert!((a.secs_since(epoch) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn secs_since_saturates_for_future_epoch() {
        let clock = ManualClock::new();
        let future = clock.now() + Duration::from_secs(5);
        assert_eq!(clock.secs_since(future), 0.0);
    }
}
