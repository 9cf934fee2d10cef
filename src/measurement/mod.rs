//! Measurement adapters and their recording pipeline.
//!
//! A [`MeasurementTypeAdapter`] declares the datasets it will produce and runs
//! one physical measurement cycle at a time. The engine wraps every adapter in
//! a [`Measurement`], which owns the attached analyses and takes care of
//! creating datasets, writing results at the current sweep position and
//! feeding the analyses.

use anyhow::{anyhow, Result};
use std::fmt;

use crate::analysis::AnalysisTypeAdapter;
use crate::axis::Axis;
use crate::data::{DataDescriptor, DatasetCategory, GeneratedData};
use crate::error::{SweepError, SweepResult};
use crate::experiment::context::RuntimeContext;
use crate::storage::layout::{write_block, SweepPosition};
use crate::storage::{ArrayHandle, Storage};
use crate::view::ViewMap;

pub mod scalar;
pub mod transport;

pub use scalar::ScalarMeasurement;
pub use transport::TransportMeasurement;

/// Strategy object for one kind of measurement.
pub trait MeasurementTypeAdapter: Send {
    /// Human-readable adapter name used in logs and errors.
    fn name(&self) -> String;

    /// Every dataset this adapter produces. Must not depend on live data.
    fn expected_structure(&self) -> Vec<DataDescriptor>;

    /// Run one measurement cycle.
    ///
    /// The returned descriptors must be exactly [`expected_structure`](Self::expected_structure),
    /// in any order.
    fn perform_measurement(&mut self, ctx: &RuntimeContext) -> Result<Vec<GeneratedData>>;

    /// Convenience views registered next to the data.
    fn default_views(&self) -> ViewMap {
        ViewMap::new()
    }
}

/// A measurement adapter together with its analyses.
pub struct Measurement {
    adapter: Box<dyn MeasurementTypeAdapter>,
    analyses: Vec<Box<dyn AnalysisTypeAdapter>>,
}

impl Measurement {
    /// Wrap an adapter without analyses.
    pub fn new(adapter: impl MeasurementTypeAdapter + 'static) -> Self {
        Self {
            adapter: Box::new(adapter),
            analyses: Vec::new(),
        }
    }

    /// Attach an analysis run after every successful measurement.
    pub fn with_analysis(mut self, analysis: impl AnalysisTypeAdapter + 'static) -> Self {
        self.analyses.push(Box::new(analysis));
        self
    }

    /// Adapter name.
    pub fn name(&self) -> String {
        self.adapter.name()
    }

    /// Schema of the raw measurement.
    pub fn expected_structure(&self) -> Vec<DataDescriptor> {
        self.adapter.expected_structure()
    }

    /// Schema of every attached analysis, derived from the measurement schema.
    pub fn analysis_structure(&self) -> Vec<(String, Vec<DataDescriptor>)> {
        let parent = self.expected_structure();
        self.analyses
            .iter()
            .map(|a| (a.name(), a.expected_structure(&parent)))
            .collect()
    }

    /// Views of the adapter and of every analysis.
    pub fn default_views(&self) -> ViewMap {
        let parent = self.expected_structure();
        let mut views = self.adapter.default_views();
        for analysis in &self.analyses {
            views.extend(analysis.default_views(&parent));
        }
        views
    }

    /// Highest descriptor rank, analyses included.
    pub fn max_rank(&self) -> usize {
        self.expected_structure()
            .iter()
            .chain(self.analysis_structure().iter().flat_map(|(_, d)| d.iter()))
            .map(DataDescriptor::rank)
            .max()
            .unwrap_or(0)
    }

    /// Create the datasets of the measurement and its analyses below `ancestors`.
    pub fn create_datasets(&self, storage: &mut dyn Storage, ancestors: &[Axis]) -> SweepResult<()> {
        for descriptor in self.expected_structure() {
            descriptor.create_dataset(storage, ancestors, DatasetCategory::Data)?;
            tracing::debug!(dataset = %descriptor, depth = ancestors.len(), "dataset created");
        }
        for (_, descriptors) in self.analysis_structure() {
            for descriptor in descriptors {
                descriptor.create_dataset(storage, ancestors, DatasetCategory::Analysis)?;
                tracing::debug!(dataset = %descriptor, depth = ancestors.len(), "analysis dataset created");
            }
        }
        Ok(())
    }

    /// Measure, store the results at `position`, then run the analyses.
    pub fn record(
        &mut self,
        storage: &mut dyn Storage,
        position: &SweepPosition,
        ctx: &RuntimeContext,
    ) -> SweepResult<()> {
        let adapter = self.adapter.name();
        let expected = self.adapter.expected_structure();
        let data = self
            .adapter
            .perform_measurement(ctx)
            .and_then(|data| check_structure(&expected, data))
            .map_err(|source| {
                tracing::error!(adapter = %adapter, position = ?position.indices(), error = %source, "Measurement failed");
                SweepError::Measurement {
                    adapter: adapter.clone(),
                    source,
                }
            })?;
        store(storage, position, &data, DatasetCategory::Data)?;

        for analysis in &mut self.analyses {
            let name = analysis.name();
            let declared = analysis.expected_structure(&expected);
            let derived = analysis
                .perform_analysis(&data)
                .and_then(|derived| check_structure(&declared, derived))
                .map_err(|source| {
                    tracing::error!(analysis = %name, measurement = %adapter, error = %source, "Analysis failed");
                    SweepError::Analysis {
                        adapter: name.clone(),
                        source,
                    }
                })?;
            store(storage, position, &derived, DatasetCategory::Analysis)?;
        }
        storage.flush()
    }
}

impl fmt::Debug for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Measurement")
            .field("adapter", &self.adapter.name())
            .field("analyses", &self.analyses.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl fmt::Display for Measurement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self
            .expected_structure()
            .iter()
            .map(ToString::to_string)
            .collect();
        write!(f, "Measurement({}, ({}))", self.adapter.name(), names.join("; "))?;
        for analysis in &self.analyses {
            write!(f, "\n\tAnalysis({})", analysis.name())?;
        }
        Ok(())
    }
}

/// Check `produced` against the declared schema and return it in declaration order.
fn check_structure(
    declared: &[DataDescriptor],
    mut produced: Vec<GeneratedData>,
) -> Result<Vec<GeneratedData>> {
    let mut ordered = Vec::with_capacity(declared.len());
    for descriptor in declared {
        let index = produced
            .iter()
            .position(|datum| datum.name() == descriptor.name())
            .ok_or_else(|| anyhow!("dataset '{}' was not produced", descriptor.name()))?;
        let datum = produced.swap_remove(index);
        if datum.descriptor() != descriptor {
            return Err(anyhow!(
                "dataset '{}' does not match its declaration",
                datum.name()
            ));
        }
        ordered.push(datum);
    }
    if let Some(extra) = produced.first() {
        return Err(anyhow!("dataset '{}' was never declared", extra.name()));
    }
    Ok(ordered)
}

/// Write every datum at `position`, in name order.
fn store(
    storage: &mut dyn Storage,
    position: &SweepPosition,
    data: &[GeneratedData],
    category: DatasetCategory,
) -> SweepResult<()> {
    let mut by_name: Vec<&GeneratedData> = data.iter().collect();
    by_name.sort_by(|a, b| a.name().cmp(b.name()));
    for datum in by_name {
        let handle = ArrayHandle::new(datum.name(), category);
        write_block(storage, &handle, position, datum.data().view())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStorage, StorageEvent};
    use crate::view::{DataReference, DataView, DataViewSet};

    struct Pair {
        calls: usize,
        wrong: bool,
    }

    impl MeasurementTypeAdapter for Pair {
        fn name(&self) -> String {
            "Pair".into()
        }

        fn expected_structure(&self) -> Vec<DataDescriptor> {
            vec![
                DataDescriptor::scalar("b").with_unit("V"),
                DataDescriptor::scalar("a").with_unit("A"),
            ]
        }

        fn perform_measurement(&mut self, _ctx: &RuntimeContext) -> Result<Vec<GeneratedData>> {
            self.calls += 1;
            let structure = self.expected_structure();
            if self.wrong {
                return Ok(vec![structure[0].with_data(1.0)?]);
            }
            Ok(vec![
                structure[0].with_data(self.calls as f64)?,
                structure[1].with_data(-(self.calls as f64))?,
            ])
        }

        fn default_views(&self) -> ViewMap {
            ViewMap::from([(
                "ab".to_string(),
                DataView::new(vec![DataViewSet::new(
                    DataReference::new("a"),
                    DataReference::new("b"),
                )]),
            )])
        }
    }

    #[test]
    fn record_writes_sorted_by_name() {
        let ctx = RuntimeContext::in_memory();
        let mut storage = MemoryStorage::new("rec");
        let mut m = Measurement::new(Pair {
            calls: 0,
            wrong: false,
        });
        m.create_datasets(&mut storage, &[]).unwrap();
        m.record(&mut storage, &SweepPosition::root(), &ctx).unwrap();

        let appended: Vec<String> = storage
            .events()
            .into_iter()
            .filter_map(|e| match e {
                StorageEvent::Append { name, .. } => Some(name),
                _ => None,
            })
            .collect();
        assert_eq!(appended, vec!["a", "b"]);
        assert_eq!(storage.read("a").unwrap().first(), Some(&-1.0));
    }

    #[test]
    fn missing_dataset_is_a_measurement_error() {
        let ctx = RuntimeContext::in_memory();
        let mut storage = MemoryStorage::new("bad");
        let mut m = Measurement::new(Pair {
            calls: 0,
            wrong: true,
        });
        m.create_datasets(&mut storage, &[]).unwrap();
        let err = m
            .record(&mut storage, &SweepPosition::root(), &ctx)
            .unwrap_err();
        assert!(matches!(err, SweepError::Measurement { ref adapter, .. } if adapter == "Pair"));
    }

    #[test]
    fn views_and_rank_are_collected() {
        let m = Measurement::new(Pair {
            calls: 0,
            wrong: false,
        });
        assert_eq!(m.max_rank(), 0);
        assert!(m.default_views().contains_key("ab"));
        assert!(m.to_string().starts_with("Measurement(Pair"));
    }
}
