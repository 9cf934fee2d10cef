//! Sweep nodes of the experiment tree.
//!
//! A [`Sweep`] walks one [`Axis`], calls its setter for every visited value,
//! records its measurements at the extended index tuple and then descends into
//! its (single) child sweep. A filter restricts which axis values are visited
//! without changing the index each value is stored under.

use anyhow::Result;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use super::context::RuntimeContext;
use crate::analysis::AnalysisTypeAdapter;
use crate::axis::Axis;
use crate::error::{SweepError, SweepResult};
use crate::measurement::{Measurement, MeasurementTypeAdapter};
use crate::storage::layout::SweepPosition;
use crate::storage::Storage;

/// Applies one axis value to the setup.
pub type Setter = Box<dyn FnMut(f64) -> Result<()> + Send>;

/// Landscape filter: one `keep` flag per axis value.
pub type Filter = Box<dyn Fn(&[f64]) -> Vec<bool> + Send>;

/// Read-only view on the value a sweep is currently sitting at.
///
/// `None` outside the sweep loop. Clones share the same slot, so a handle can
/// be moved into a descendant's filter closure.
#[derive(Debug, Clone, Default)]
pub struct CurrentValue(Arc<Mutex<Option<f64>>>);

impl CurrentValue {
    /// Value of the running iteration.
    pub fn get(&self) -> Option<f64> {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, value: Option<f64>) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = value;
    }
}

/// Shared child-sweep and measurement bookkeeping of `Experiment` and `Sweep`.
#[derive(Default)]
pub(crate) struct Node {
    pub(crate) measurements: Vec<Measurement>,
    pub(crate) child: Option<Box<Sweep>>,
}

impl Node {
    pub(crate) fn attach_sweep(&mut self, owner: &str, sweep: Sweep) -> &mut Sweep {
        if let Some(previous) = &self.child {
            tracing::warn!(
                parent = owner,
                replaced = previous.axis.name(),
                axis = sweep.axis.name(),
                "replacing existing child sweep"
            );
        }
        self.child.insert(Box::new(sweep))
    }

    /// Highest `depth + rank` over this node's measurements and its subtree.
    pub(crate) fn dimensionality(&self, depth: usize) -> usize {
        let own = self
            .measurements
            .iter()
            .map(|m| depth + m.max_rank())
            .max()
            .unwrap_or(0);
        let below = self
            .child
            .as_ref()
            .map_or(0, |child| child.node.dimensionality(depth + 1));
        own.max(below)
    }

    pub(crate) fn run_measurements(
        &mut self,
        storage: &mut dyn Storage,
        position: &SweepPosition,
        ctx: &RuntimeContext,
    ) -> SweepResult<()> {
        for measurement in &mut self.measurements {
            measurement.record(storage, position, ctx)?;
        }
        Ok(())
    }

    pub(crate) fn run_child(
        &mut self,
        storage: &mut dyn Storage,
        position: &SweepPosition,
        ctx: &RuntimeContext,
    ) -> SweepResult<()> {
        match &mut self.child {
            Some(child) => child.run_sweep(storage, position, ctx),
            None => Ok(()),
        }
    }

    pub(crate) fn fmt_tree(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for measurement in &self.measurements {
            write!(f, "\n{}", indent(&measurement.to_string()))?;
        }
        if let Some(child) = &self.child {
            write!(f, "\n{}", indent(&child.to_string()))?;
        }
        Ok(())
    }
}

fn indent(text: &str) -> String {
    text.lines()
        .map(|line| format!("\t{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// One level of the sweep tree.
pub struct Sweep {
    axis: Axis,
    setter: Setter,
    filter: Option<Filter>,
    current: CurrentValue,
    pub(crate) node: Node,
}

impl Sweep {
    pub(crate) fn new(setter: Setter, axis: Axis) -> Self {
        Self {
            axis,
            setter,
            filter: None,
            current: CurrentValue::default(),
            node: Node::default(),
        }
    }

    /// The swept axis.
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Restrict the visited values. Indices of the visited values are unchanged.
    pub fn filtered(&mut self, filter: impl Fn(&[f64]) -> Vec<bool> + Send + 'static) -> &mut Self {
        self.filter = Some(Box::new(filter));
        self
    }

    /// True if a filter is installed.
    pub fn is_filtered(&self) -> bool {
        self.filter.is_some()
    }

    /// Record `adapter` at every visited value, before descending.
    pub fn measure(&mut self, adapter: impl MeasurementTypeAdapter + 'static) -> &mut Self {
        self.measure_with(Measurement::new(adapter))
    }

    /// Record `adapter` and run `analysis` on each of its results.
    pub fn measure_analyzed(
        &mut self,
        adapter: impl MeasurementTypeAdapter + 'static,
        analysis: impl AnalysisTypeAdapter + 'static,
    ) -> &mut Self {
        self.measure_with(Measurement::new(adapter).with_analysis(analysis))
    }

    /// Record an already assembled measurement.
    pub fn measure_with(&mut self, measurement: Measurement) -> &mut Self {
        self.node.measurements.push(measurement);
        self
    }

    /// Nest a sweep inside this one. An existing child is replaced.
    pub fn sweep(
        &mut self,
        setter: impl FnMut(f64) -> Result<()> + Send + 'static,
        axis: Axis,
    ) -> &mut Sweep {
        let owner = self.axis.name().to_string();
        self.node.attach_sweep(&owner, Sweep::new(Box::new(setter), axis))
    }

    /// The nested sweep, if any.
    pub fn child(&self) -> Option<&Sweep> {
        self.node.child.as_deref()
    }

    /// Value of the running iteration, `None` outside the loop.
    pub fn current_value(&self) -> Option<f64> {
        self.current.get()
    }

    /// Shareable handle on [`current_value`](Self::current_value).
    pub fn current_value_handle(&self) -> CurrentValue {
        self.current.clone()
    }

    /// Create the coordinate of this axis and every dataset below it.
    pub(crate) fn create_datasets(
        &self,
        storage: &mut dyn Storage,
        ancestors: &mut Vec<Axis>,
    ) -> SweepResult<()> {
        self.axis.get_data_axis(storage)?;
        ancestors.push(self.axis.clone());
        for measurement in &self.node.measurements {
            measurement.create_datasets(storage, ancestors)?;
        }
        if let Some(child) = &self.node.child {
            child.create_datasets(storage, ancestors)?;
        }
        ancestors.pop();
        Ok(())
    }

    /// Iterate the axis below `position`. The current value is cleared on every exit.
    pub(crate) fn run_sweep(
        &mut self,
        storage: &mut dyn Storage,
        position: &SweepPosition,
        ctx: &RuntimeContext,
    ) -> SweepResult<()> {
        let result = self.iterate(storage, position, ctx);
        self.current.set(None);
        result
    }

    /// `(original index, value)` pairs to visit, in ascending index order.
    fn enumerate(&self) -> SweepResult<Vec<(usize, f64)>> {
        let range = self.axis.range().ok_or_else(|| SweepError::InvalidAxis {
            name: self.axis.name().to_string(),
            reason: "open-ended axes cannot be swept".to_string(),
        })?;
        let Some(filter) = &self.filter else {
            return Ok(range.iter().copied().enumerate().collect());
        };
        let mask = filter(range);
        if mask.len() != range.len() {
            return Err(SweepError::InvalidFilter {
                axis: self.axis.name().to_string(),
                expected: range.len(),
                actual: mask.len(),
            });
        }
        Ok(range
            .iter()
            .copied()
            .enumerate()
            .zip(mask)
            .filter_map(|(pair, keep)| keep.then_some(pair))
            .collect())
    }

    fn iterate(
        &mut self,
        storage: &mut dyn Storage,
        position: &SweepPosition,
        ctx: &RuntimeContext,
    ) -> SweepResult<()> {
        let len = self.axis.len().unwrap_or(0);
        let visits = self.enumerate()?;
        let total = visits.len();

        for (step, (index, value)) in visits.into_iter().enumerate() {
            tracing::debug!(
                axis = self.axis.name(),
                index,
                value,
                step = step + 1,
                total,
                "sweep step"
            );
            if let Err(source) = (self.setter)(value) {
                tracing::error!(axis = self.axis.name(), value, error = %source, "Error setting sweep value");
                return Err(SweepError::Setter {
                    axis: self.axis.name().to_string(),
                    value,
                    source,
                });
            }
            self.current.set(Some(value));

            let here = position.descend(index, len);
            self.node.run_measurements(storage, &here, ctx)?;
            self.node.run_child(storage, &here, ctx)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sweep")
            .field("axis", &self.axis)
            .field("filtered", &self.filter.is_some())
            .field("measurements", &self.node.measurements)
            .field("child", &self.node.child)
            .finish()
    }
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sweep(range={}, filter={})",
            self.axis,
            if self.filter.is_some() { "yes" } else { "None" }
        )?;
        self.node.fmt_tree(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::ScalarMeasurement;
    use crate::storage::memory::{MemoryStorage, StorageEvent};

    fn recording_sweep(values: Vec<f64>) -> (Sweep, Arc<Mutex<Vec<f64>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let sweep = Sweep::new(
            Box::new(move |v| {
                sink.lock().unwrap().push(v);
                Ok(())
            }),
            Axis::new("x", values).unwrap(),
        );
        (sweep, seen)
    }

    #[test]
    fn visits_every_value_in_order() {
        let (mut sweep, seen) = recording_sweep(vec![3.0, 1.0, 2.0]);
        let mut storage = MemoryStorage::new("s");
        sweep
            .run_sweep(&mut storage, &SweepPosition::root(), &RuntimeContext::in_memory())
            .unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![3.0, 1.0, 2.0]);
        assert_eq!(sweep.current_value(), None);
    }

    #[test]
    fn filter_keeps_original_indices() {
        let (mut sweep, _) = recording_sweep(vec![0.0, 1.0, 2.0, 3.0]);
        sweep.filtered(|r| r.iter().map(|v| *v >= 2.0).collect());
        assert_eq!(sweep.enumerate().unwrap(), vec![(2, 2.0), (3, 3.0)]);
    }

    #[test]
    fn short_mask_is_rejected() {
        let (mut sweep, seen) = recording_sweep(vec![0.0, 1.0]);
        sweep.filtered(|_| vec![true]);
        let mut storage = MemoryStorage::new("s");
        let err = sweep
            .run_sweep(&mut storage, &SweepPosition::root(), &RuntimeContext::in_memory())
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidFilter { expected: 2, actual: 1, .. }));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn open_ended_axis_cannot_be_swept() {
        let mut sweep = Sweep::new(Box::new(|_| Ok(())), Axis::open_ended("t").unwrap());
        let mut storage = MemoryStorage::new("s");
        let err = sweep
            .run_sweep(&mut storage, &SweepPosition::root(), &RuntimeContext::in_memory())
            .unwrap_err();
        assert!(matches!(err, SweepError::InvalidAxis { .. }));
    }

    #[test]
    fn current_value_is_visible_during_iteration_only() {
        let (mut sweep, _) = recording_sweep(vec![5.0, 6.0]);
        let handle = sweep.current_value_handle();
        let observed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&observed);
        sweep.measure(ScalarMeasurement::new("seen", move || {
            let v = handle.get().unwrap_or(f64::NAN);
            sink.lock().unwrap().push(v);
            Ok(v)
        }));
        let mut storage = MemoryStorage::new("s");
        sweep.create_datasets(&mut storage, &mut Vec::new()).unwrap();
        sweep
            .run_sweep(&mut storage, &SweepPosition::root(), &RuntimeContext::in_memory())
            .unwrap();
        assert_eq!(*observed.lock().unwrap(), vec![5.0, 6.0]);
        assert_eq!(sweep.current_value(), None);
    }

    #[test]
    fn setter_error_clears_current_value() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        let mut sweep = Sweep::new(
            Box::new(move |v| {
                *counter.lock().unwrap() += 1;
                if v > 0.5 {
                    anyhow::bail!("out of range");
                }
                Ok(())
            }),
            Axis::new("x", vec![0.0, 1.0, 2.0]).unwrap(),
        );
        let mut storage = MemoryStorage::new("s");
        let err = sweep
            .run_sweep(&mut storage, &SweepPosition::root(), &RuntimeContext::in_memory())
            .unwrap_err();
        assert!(matches!(err, SweepError::Setter { value, .. } if value == 1.0));
        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(sweep.current_value(), None);
    }

    #[test]
    fn nested_sweep_writes_coordinates_once() {
        let (mut sweep, _) = recording_sweep(vec![0.0, 1.0]);
        sweep
            .sweep(|_| Ok(()), Axis::new("y", vec![0.0, 1.0, 2.0]).unwrap())
            .measure(ScalarMeasurement::new("z", || Ok(1.0)));
        let mut storage = MemoryStorage::new("s");
        sweep.create_datasets(&mut storage, &mut Vec::new()).unwrap();
        let coordinates: Vec<String> = storage
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StorageEvent::CoordinateCreated { name } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(coordinates, vec!["x", "y"]);
        assert_eq!(storage.spec("z").unwrap().axes, vec!["x", "y"]);
    }

    #[test]
    fn replacing_child_keeps_latest() {
        let (mut sweep, _) = recording_sweep(vec![0.0]);
        sweep.sweep(|_| Ok(()), Axis::new("a", vec![0.0]).unwrap());
        sweep.sweep(|_| Ok(()), Axis::new("b", vec![0.0]).unwrap());
        assert_eq!(sweep.child().map(|c| c.axis().name()), Some("b"));
    }

    #[test]
    fn display_is_an_indented_tree() {
        let (mut sweep, _) = recording_sweep(vec![0.0, 1.0]);
        sweep.measure(ScalarMeasurement::new("y", || Ok(0.0)));
        let text = sweep.to_string();
        assert!(text.starts_with("Sweep(range=x="));
        assert!(text.contains("\n\tMeasurement(ScalarMeasurement(y)"));
    }
}
