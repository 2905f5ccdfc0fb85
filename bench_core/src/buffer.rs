//! Bounded per-signal measurement history.
//!
//! Every configured signal holds at most `capacity` values; appending to a
//! full series drops its oldest value. Updates are all-or-nothing: a
//! mapping that does not cover exactly the configured signal set is
//! rejected before any series is touched, so all series always have the
//! same length.
use std::collections::VecDeque;

use crate::error::{BenchError, BenchResult, BuildError};
use crate::frame::SensorFrame;

#[derive(Debug, Clone)]
pub struct MeasurementBuffer {
    capacity: usize,
    signals: Vec<String>,
    series: Vec<VecDeque<f64>>,
}

impl MeasurementBuffer {
    pub fn new<I, S>(signals: I, capacity: usize) -> Result<Self, BuildError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if capacity == 0 {
            return Err(BuildError::InvalidConfig(
                "buffer capacity must be >= 1 (buffer interval shorter than one period)",
            ));
        }
        let signals: Vec<String> = signals.into_iter().map(Into::into).collect();
        if signals.is_empty() {
            return Err(BuildError::InvalidConfig("buffer needs at least one signal"));
        }
        for (i, s) in signals.iter().enumerate() {
            if signals[..i].contains(s) {
                return Err(BuildError::InvalidConfig("duplicate signal name"));
            }
        }
        let series = signals
            .iter()
            .map(|_| VecDeque::with_capacity(capacity))
            .collect();
        Ok(Self {
            capacity,
            signals,
            series,
        })
    }

    /// Buffer keyed by every `SensorFrame` signal.
    pub fn for_frames(capacity: usize) -> Result<Self, BuildError> {
        Self::new(crate::frame::SIGNALS, capacity)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn signals(&self) -> &[String] {
        &self.signals
    }

    /// Number of values held per signal.
    pub fn len(&self) -> usize {
        self.series.first().map_or(0, VecDeque::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn index_of(&self, signal: &str) -> Option<usize> {
        self.signals.iter().position(|s| s == signal)
    }

    /// Append one value per signal.
    pub fn update<I, K>(&mut self, values: I) -> BenchResult<()>
    where
        I: IntoIterator<Item = (K, f64)>,
        K: AsRef<str>,
    {
        let mut staged: Vec<Option<f64>> = vec![None; self.signals.len()];
        let mut unexpected = Vec::new();
        for (key, value) in values {
            let key = key.as_ref();
            match self.index_of(key) {
                Some(i) if staged[i].is_none() => staged[i] = Some(value),
                _ => unexpected.push(key.to_string()),
            }
        }
        let missing: Vec<String> = staged
            .iter()
            .zip(&self.signals)
            .filter(|(v, _)| v.is_none())
            .map(|(_, s)| s.clone())
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(BenchError::SignalSetMismatch {
                missing,
                unexpected,
            });
        }

        for (series, value) in self.series.iter_mut().zip(staged.into_iter().flatten()) {
            if series.len() == self.capacity {
                series.pop_front();
            }
            series.push_back(value);
        }
        Ok(())
    }

    pub fn update_frame(&mut self, frame: &SensorFrame) -> BenchResult<()> {
        self.update(frame.values())
    }

    /// Values of one signal, oldest first.
    pub fn get(&self, signal: &str) -> BenchResult<Vec<f64>> {
        self.index_of(signal)
            .map(|i| self.series[i].iter().copied().collect())
            .ok_or_else(|| BenchError::UnknownSignal(signal.to_string()))
    }

    /// The newest `n` values of one signal, oldest first.
    pub fn tail(&self, signal: &str, n: usize) -> BenchResult<Vec<f64>> {
        let i = self
            .index_of(signal)
            .ok_or_else(|| BenchError::UnknownSignal(signal.to_string()))?;
        let s = &self.series[i];
        Ok(s.iter().skip(s.len().saturating_sub(n)).copied().collect())
    }

    pub fn clear(&mut self) {
        for s in &mut self.series {
            s.clear();
        }
    }
}
