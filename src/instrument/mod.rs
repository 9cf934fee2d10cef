//! Instrument collaborators.
//!
//! Drivers are outside the engine. What the engine needs from them is small:
//! a name, a snapshot of current settings for the run record, and for
//! transport measurements the [`IvDevice`] capability. Sweeps only ever see
//! plain setter closures, so any driver can be swept without implementing a
//! trait.
//!
//! The [`InstrumentRegistry`] is the explicit replacement for a process-wide
//! instrument table. It lives in the runtime context handed to
//! `Experiment::run`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{SweepError, SweepResult};

pub mod mock;

/// A named device whose settings are recorded with every run.
pub trait Instrument: Send + Sync {
    /// Unique name in the registry.
    fn name(&self) -> String;

    /// Current settings as a serializable map.
    fn settings(&self) -> serde_json::Value;
}

/// Which quantity a source-meter drives and which it senses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasureMode {
    /// Bias current, sense voltage.
    IV,
    /// Bias voltage, sense current.
    VI,
}

impl MeasureMode {
    /// Symbol of the biased quantity.
    pub fn bias_symbol(self) -> &'static str {
        match self {
            MeasureMode::IV => "i",
            MeasureMode::VI => "v",
        }
    }

    /// Unit of the biased quantity.
    pub fn bias_unit(self) -> &'static str {
        match self {
            MeasureMode::IV => "A",
            MeasureMode::VI => "V",
        }
    }

    /// Symbol of the sensed quantity.
    pub fn measure_symbol(self) -> &'static str {
        match self {
            MeasureMode::IV => "v",
            MeasureMode::VI => "i",
        }
    }

    /// Unit of the sensed quantity.
    pub fn measure_unit(self) -> &'static str {
        match self {
            MeasureMode::IV => "V",
            MeasureMode::VI => "A",
        }
    }
}

/// Source-meter capability used by transport measurements.
pub trait IvDevice: Instrument {
    /// Bias mode the device is configured for.
    fn sweep_bias(&self) -> MeasureMode;

    /// Run one bias sweep from `start` towards `stop` (exclusive) and return
    /// `(bias, sense)` traces of equal length.
    fn take_iv(&self, start: f64, stop: f64, step: f64, sleep: f64) -> Result<(Vec<f64>, Vec<f64>)>;
}

/// Instruments available to a run, keyed by name.
#[derive(Clone, Default)]
pub struct InstrumentRegistry {
    instruments: BTreeMap<String, Arc<dyn Instrument>>,
}

impl InstrumentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an instrument. Names must be unique.
    pub fn register(&mut self, instrument: Arc<dyn Instrument>) -> SweepResult<()> {
        let name = instrument.name();
        if self.instruments.contains_key(&name) {
            return Err(SweepError::DuplicateName {
                kind: "instrument",
                name,
            });
        }
        tracing::debug!(instrument = %name, "instrument registered");
        self.instruments.insert(name, instrument);
        Ok(())
    }

    /// Look up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Instrument>> {
        self.instruments.get(name).cloned()
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.instruments.keys().cloned().collect()
    }

    /// Number of instruments.
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Settings of every instrument, keyed by name.
    pub fn settings_snapshot(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .instruments
            .iter()
            .map(|(name, instrument)| (name.clone(), instrument.settings()))
            .collect();
        serde_json::Value::Object(map)
    }
}

impl std::fmt::Debug for InstrumentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentRegistry")
            .field("instruments", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockSource;
    use super::*;

    #[test]
    fn duplicate_names_are_rejected() {
        let mut registry = InstrumentRegistry::new();
        registry
            .register(Arc::new(MockSource::new("gate", "V")))
            .unwrap();
        let err = registry
            .register(Arc::new(MockSource::new("gate", "V")))
            .unwrap_err();
        assert!(matches!(err, SweepError::DuplicateName { kind: "instrument", .. }));
    }

    #[test]
    fn snapshot_is_keyed_by_name() {
        let mut registry = InstrumentRegistry::new();
        let source = Arc::new(MockSource::new("gate", "V"));
        source.set(0.25).unwrap();
        registry.register(source).unwrap();
        let snapshot = registry.settings_snapshot();
        assert_eq!(snapshot["gate"]["value"], 0.25);
        assert_eq!(snapshot["gate"]["unit"], "V");
    }

    #[test]
    fn mode_symbols() {
        assert_eq!(MeasureMode::IV.bias_symbol(), "i");
        assert_eq!(MeasureMode::IV.measure_unit(), "V");
        assert_eq!(MeasureMode::VI.bias_unit(), "V");
    }
}
