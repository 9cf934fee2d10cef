//! Simulated instruments that generate synthetic data.
//!
//! `MockSource` stands in for any settable quantity (gate voltage, field,
//! frequency) and keeps a history of every value it was set to. `MockIvDevice`
//! behaves like an ohmic source-meter with a little deterministic noise.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use super::{Instrument, IvDevice, MeasureMode};
use crate::axis::arange;

/// A settable, readable scalar.
#[derive(Debug)]
pub struct MockSource {
    name: String,
    unit: String,
    value: Mutex<f64>,
    history: Mutex<Vec<f64>>,
    fail_at: Option<f64>,
}

impl MockSource {
    /// Source starting at zero.
    pub fn new(name: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
            value: Mutex::new(0.0),
            history: Mutex::new(Vec::new()),
            fail_at: None,
        }
    }

    /// Refuse to be set to `value` (simulates a compliance trip).
    pub fn failing_at(mut self, value: f64) -> Self {
        self.fail_at = Some(value);
        self
    }

    /// Set the output.
    pub fn set(&self, value: f64) -> Result<()> {
        if self.fail_at == Some(value) {
            return Err(anyhow!("{} refused value {}", self.name, value));
        }
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = value;
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
        Ok(())
    }

    /// Last value set.
    pub fn get(&self) -> f64 {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every value set so far, in order.
    pub fn history(&self) -> Vec<f64> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Setter closure for a sweep.
    pub fn setter(self: &Arc<Self>) -> impl FnMut(f64) -> Result<()> + Send + 'static {
        let source = Arc::clone(self);
        move |value| source.set(value)
    }
}

impl Instrument for MockSource {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn settings(&self) -> serde_json::Value {
        json!({ "value": self.get(), "unit": self.unit })
    }
}

/// Ohmic source-meter returning `sense = bias * resistance` (or `bias / resistance` in VI mode).
#[derive(Debug)]
pub struct MockIvDevice {
    name: String,
    mode: MeasureMode,
    resistance: f64,
    noise: f64,
    sweeps: AtomicUsize,
    fail_after: Option<usize>,
}

impl MockIvDevice {
    /// Device in `mode` with the given resistance in ohms.
    pub fn new(name: &str, mode: MeasureMode, resistance: f64) -> Self {
        Self {
            name: name.to_string(),
            mode,
            resistance,
            noise: 0.0,
            sweeps: AtomicUsize::new(0),
            fail_after: None,
        }
    }

    /// Add deterministic ripple of the given relative amplitude.
    pub fn with_noise(mut self, amplitude: f64) -> Self {
        self.noise = amplitude;
        self
    }

    /// Fail every sweep after the first `count`.
    pub fn failing_after(mut self, count: usize) -> Self {
        self.fail_after = Some(count);
        self
    }

    /// Number of sweeps taken so far.
    pub fn sweeps_taken(&self) -> usize {
        self.sweeps.load(Ordering::SeqCst)
    }
}

impl Instrument for MockIvDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn settings(&self) -> serde_json::Value {
        json!({
            "sweep_bias": self.mode,
            "resistance": self.resistance,
        })
    }
}

impl IvDevice for MockIvDevice {
    fn sweep_bias(&self) -> MeasureMode {
        self.mode
    }

    /// Sweeps from `start` towards `stop`, exclusive.
    fn take_iv(&self, start: f64, stop: f64, step: f64, _sleep: f64) -> Result<(Vec<f64>, Vec<f64>)> {
        let taken = self.sweeps.fetch_add(1, Ordering::SeqCst);
        if self.fail_after.map_or(false, |limit| taken >= limit) {
            return Err(anyhow!("{}: sweep {} timed out", self.name, taken));
        }
        let bias = arange(start, stop, step);
        let sense = bias
            .iter()
            .enumerate()
            .map(|(i, b)| {
                let ideal = match self.mode {
                    MeasureMode::IV => b * self.resistance,
                    MeasureMode::VI => b / self.resistance,
                };
                ideal * (1.0 + self.noise * (i as f64 * 1.7).sin())
            })
            .collect();
        Ok((bias, sense))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_records_history() {
        let source = Arc::new(MockSource::new("x", "V"));
        let mut set = source.setter();
        set(1.0).unwrap();
        set(2.0).unwrap();
        assert_eq!(source.history(), vec![1.0, 2.0]);
        assert_eq!(source.get(), 2.0);
    }

    #[test]
    fn failing_source_keeps_last_good_value() {
        let source = MockSource::new("x", "V").failing_at(2.0);
        source.set(1.0).unwrap();
        assert!(source.set(2.0).is_err());
        assert_eq!(source.get(), 1.0);
    }

    #[test]
    fn iv_sweep_is_ohmic() {
        let device = MockIvDevice::new("smu", MeasureMode::IV, 100.0);
        let (bias, sense) = device.take_iv(0.0, 1.25e-3, 5e-4, 0.0).unwrap();
        assert_eq!(bias.len(), 3);
        assert!((sense[2] - 0.1).abs() < 1e-12);
        assert_eq!(device.sweeps_taken(), 1);
    }

    #[test]
    fn failing_device_stops_after_limit() {
        let device = MockIvDevice::new("smu", MeasureMode::VI, 1.0).failing_after(1);
        assert!(device.take_iv(0.0, 1.0, 0.5, 0.0).is_ok());
        assert!(device.take_iv(0.0, 1.0, 0.5, 0.0).is_err());
    }
}
