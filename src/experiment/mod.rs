//! Experiment orchestration.
//!
//! An [`Experiment`] is the root of the sweep tree. It owns the top-level
//! measurements and at most one child [`Sweep`]; every sweep in turn owns its
//! measurements and at most one child. [`Experiment::run`] validates the whole
//! tree, creates one storage unit, pre-registers every dataset and view from
//! the static schema, records instrument settings and run metadata, executes
//! the tree and finally closes the storage, whatever happened in between.
//!
//! # Example
//!
//! ```rust,ignore
//! use rust_sweep::prelude::*;
//!
//! let ctx = RuntimeContext::in_memory();
//! let mut experiment = Experiment::new("demo", Sample::default());
//! experiment
//!     .sweep(move |v| source.set(v), Axis::new("x", vec![0.0, 1.0, 2.0])?)
//!     .measure(ScalarMeasurement::new("y", getter));
//! let report = experiment.run(&ctx, RunOptions::default())?;
//! ```

pub mod context;
pub mod file_path;
pub mod sweep;

use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use crate::analysis::AnalysisTypeAdapter;
use crate::axis::Axis;
use crate::data::DatasetCategory;
use crate::error::{SweepError, SweepResult};
use crate::measurement::{Measurement, MeasurementTypeAdapter};
use crate::metadata::{RunRecord, Sample};
use crate::storage::layout::SweepPosition;
use crate::storage::{Storage, MAX_STORAGE_RANK};
use crate::view::{DataReference, DataView};

pub use context::{
    CommandLauncher, LiveViewHandle, LiveViewLauncher, PreviewRenderer, RuntimeContext,
    SleepHook, SleepRecorder, SnapshotSummary,
};
pub use file_path::MeasurementFilePath;
pub use sweep::{CurrentValue, Filter, Setter, Sweep};

use sweep::Node;

/// Text record holding the instrument settings snapshot.
pub const SETTINGS_RECORD: &str = "settings";
/// Text record holding the [`RunRecord`].
pub const MEASUREMENT_RECORD: &str = "measurement";

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Start the live viewer of the context, if one is installed.
    pub open_live_view: bool,
    /// Datasets the viewer should open right away.
    pub open_datasets: Vec<DataReference>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            open_live_view: true,
            open_datasets: Vec::new(),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug)]
pub struct RunReport {
    /// Naming of the measurement file.
    pub path: MeasurementFilePath,
    /// Where the storage unit lives.
    pub location: PathBuf,
    /// Highest effective dataset rank.
    pub dimensionality: usize,
    /// Preview worker, if one was started. The file is already closed.
    pub preview: Option<JoinHandle<()>>,
}

/// Root of a measurement: sample, comment, measurements and the sweep tree.
pub struct Experiment {
    name: String,
    sample: Sample,
    comment: Option<String>,
    node: Node,
    has_run: bool,
}

impl Experiment {
    /// Empty experiment.
    pub fn new(name: impl Into<String>, sample: Sample) -> Self {
        Self {
            name: name.into(),
            sample,
            comment: None,
            node: Node::default(),
            has_run: false,
        }
    }

    /// Attach a free-text comment to the file.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Experiment name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The measured sample.
    pub fn sample(&self) -> &Sample {
        &self.sample
    }

    /// The comment, if any.
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Record `adapter` once, before the sweeps start.
    pub fn measure(&mut self, adapter: impl MeasurementTypeAdapter + 'static) -> &mut Self {
        self.measure_with(Measurement::new(adapter))
    }

    /// Record `adapter` once and run `analysis` on its result.
    pub fn measure_analyzed(
        &mut self,
        adapter: impl MeasurementTypeAdapter + 'static,
        analysis: impl AnalysisTypeAdapter + 'static,
    ) -> &mut Self {
        self.measure_with(Measurement::new(adapter).with_analysis(analysis))
    }

    /// Record an already assembled measurement once.
    pub fn measure_with(&mut self, measurement: Measurement) -> &mut Self {
        self.node.measurements.push(measurement);
        self
    }

    /// Start the sweep tree. An existing top-level sweep is replaced.
    pub fn sweep(
        &mut self,
        setter: impl FnMut(f64) -> Result<()> + Send + 'static,
        axis: Axis,
    ) -> &mut Sweep {
        let owner = self.name.clone();
        self.node.attach_sweep(&owner, Sweep::new(Box::new(setter), axis))
    }

    /// The top-level sweep, if any.
    pub fn child(&self) -> Option<&Sweep> {
        self.node.child.as_deref()
    }

    /// Highest `sweep depth + descriptor rank` over every measurement and analysis.
    pub fn dimensionality(&self) -> usize {
        self.node.dimensionality(0)
    }

    /// `<dimensionality>D_<name>`.
    pub fn file_name(&self) -> String {
        format!("{}D_{}", self.dimensionality(), self.name)
    }

    /// Swept axes from the outermost inwards.
    pub fn swept_axes(&self) -> Vec<&Axis> {
        let mut axes = Vec::new();
        let mut next = self.node.child.as_deref();
        while let Some(sweep) = next {
            axes.push(sweep.axis());
            next = sweep.node.child.as_deref();
        }
        axes
    }

    /// Check the tree without touching storage or instruments.
    pub fn validate(&self) -> SweepResult<()> {
        Plan::build(self).map(|_| ())
    }

    /// Run the experiment. Only one run per experiment is allowed.
    ///
    /// On failure the storage unit is still closed and keeps whatever was
    /// written; the error that aborted the run is returned.
    pub fn run(&mut self, ctx: &RuntimeContext, options: RunOptions) -> SweepResult<RunReport> {
        if self.has_run {
            return Err(SweepError::AlreadyRun);
        }
        Plan::build(self)?;
        self.has_run = true;

        let dimensionality = self.dimensionality();
        let path = MeasurementFilePath::new(&ctx.config.storage.data_dir, &self.file_name());
        let mut storage = ctx.storage.create(&path)?;
        let location = storage.location().to_path_buf();
        tracing::info!(
            experiment = %self.name,
            file = %location.display(),
            dimensionality,
            "Starting experiment"
        );

        let mut viewer = None;
        let outcome = self.execute(storage.as_mut(), &path, ctx, &options, &mut viewer);

        if let Some(viewer) = viewer {
            if let Err(e) = viewer.detach() {
                tracing::warn!(error = %e, "failed to detach live viewer");
            }
        }
        let closed = storage.close();
        let preview = self.spawn_preview(ctx, &location);

        match (outcome, closed) {
            (Err(e), Err(cleanup)) => {
                tracing::warn!(error = %cleanup, "failed to close storage after aborted run");
                Err(e)
            }
            (Err(e), Ok(())) => {
                tracing::error!(experiment = %self.name, error = %e, "Experiment aborted");
                Err(e)
            }
            (Ok(()), Err(cleanup)) => {
                tracing::error!(error = %cleanup, "failed to close storage");
                Err(cleanup)
            }
            (Ok(()), Ok(())) => {
                tracing::info!(experiment = %self.name, file = %location.display(), "Experiment finished");
                Ok(RunReport {
                    path,
                    location,
                    dimensionality,
                    preview,
                })
            }
        }
    }

    fn execute(
        &mut self,
        storage: &mut dyn Storage,
        path: &MeasurementFilePath,
        ctx: &RuntimeContext,
        options: &RunOptions,
        viewer: &mut Option<Box<dyn LiveViewHandle>>,
    ) -> SweepResult<()> {
        self.create_datasets(storage)?;
        self.write_records(storage, path, ctx)?;
        storage.enable_live_tailing()?;

        if options.open_live_view {
            if let Some(launcher) = &ctx.live_view {
                let datasets: Vec<String> =
                    options.open_datasets.iter().map(DataReference::to_path).collect();
                match launcher.open(storage.location(), &datasets) {
                    Ok(handle) => *viewer = Some(handle),
                    Err(e) => tracing::warn!(error = %e, "live viewer unavailable"),
                }
            }
        }

        let root = SweepPosition::root();
        self.node.run_measurements(storage, &root, ctx)?;
        self.node.run_child(storage, &root, ctx)
    }

    fn create_datasets(&self, storage: &mut dyn Storage) -> SweepResult<()> {
        for measurement in &self.node.measurements {
            measurement.create_datasets(storage, &[])?;
        }
        if let Some(child) = &self.node.child {
            child.create_datasets(storage, &mut Vec::new())?;
        }

        let mut views: BTreeMap<String, DataView> = BTreeMap::new();
        for measurement in self.measurements() {
            for (name, view) in measurement.default_views() {
                if views.insert(name.clone(), view).is_some() {
                    tracing::warn!(view = %name, measurement = %measurement.name(), "view redefined");
                }
            }
        }
        for (name, view) in &views {
            storage.insert_view(name, view)?;
        }
        tracing::info!(views = views.len(), "datasets and views created");
        Ok(())
    }

    fn write_records(
        &self,
        storage: &mut dyn Storage,
        path: &MeasurementFilePath,
        ctx: &RuntimeContext,
    ) -> SweepResult<()> {
        let settings = serde_json::to_string_pretty(&ctx.instruments.settings_snapshot())?;
        storage.write_text_record(
            SETTINGS_RECORD,
            &settings,
            Some("Instrument states before measurement started."),
        )?;
        storage.add_comment(self.comment.as_deref().unwrap_or(""))?;

        let mut record = RunRecord::new(&ctx.config)
            .with_swept_axes(self.swept_axes().into_iter().map(Axis::name));
        record.uuid = path.uuid().to_string();
        record.hdf_relpath = path.rel_path().display().to_string();
        record.sample = Some(self.sample.clone());
        record.instruments = ctx.instruments.names();
        record.measurement_type = self
            .measurements()
            .map(Measurement::name)
            .collect::<Vec<_>>()
            .join(", ");
        record.measurement_func = self.name.clone();
        storage.write_text_record(
            MEASUREMENT_RECORD,
            &record.to_json()?,
            Some("Measurement description"),
        )
    }

    fn spawn_preview(&self, ctx: &RuntimeContext, location: &Path) -> Option<JoinHandle<()>> {
        let renderer = ctx.preview.clone()?;
        let file = location.to_path_buf();
        let comment = self.comment.clone();
        let spawned = std::thread::Builder::new()
            .name("sweep-preview".to_string())
            .spawn(move || {
                if let Err(e) = renderer.render(&file, comment.as_deref()) {
                    tracing::warn!(file = %file.display(), error = %e, "preview rendering failed");
                }
            });
        match spawned {
            Ok(handle) => Some(handle),
            Err(e) => {
                tracing::warn!(error = %e, "could not start preview worker");
                None
            }
        }
    }

    /// Every measurement of the tree, top-level first.
    fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        let nested = {
            let mut all = Vec::new();
            let mut next = self.node.child.as_deref();
            while let Some(sweep) = next {
                all.extend(sweep.node.measurements.iter());
                next = sweep.node.child.as_deref();
            }
            all
        };
        self.node.measurements.iter().chain(nested)
    }
}

impl fmt::Debug for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Experiment")
            .field("name", &self.name)
            .field("sample", &self.sample.name)
            .field("comment", &self.comment)
            .field("measurements", &self.node.measurements)
            .field("child", &self.node.child)
            .field("has_run", &self.has_run)
            .finish()
    }
}

impl fmt::Display for Experiment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Experiment({}):", self.name)?;
        if self.node.measurements.is_empty() && self.node.child.is_none() {
            return write!(f, "\n\tNo Sweep");
        }
        self.node.fmt_tree(f)
    }
}

/// Static picture of every dataset and axis the tree declares.
struct Plan {
    datasets: BTreeMap<String, DatasetCategory>,
    axes: BTreeMap<String, Axis>,
}

impl Plan {
    fn build(experiment: &Experiment) -> SweepResult<Self> {
        let mut plan = Plan {
            datasets: BTreeMap::new(),
            axes: BTreeMap::new(),
        };
        let mut ancestors: Vec<Axis> = Vec::new();
        let mut node = &experiment.node;
        loop {
            for measurement in &node.measurements {
                plan.add_measurement(measurement, &ancestors)?;
            }
            let Some(child) = node.child.as_deref() else {
                break;
            };
            let axis = child.axis();
            if axis.is_open_ended() {
                return Err(SweepError::InvalidAxis {
                    name: axis.name().to_string(),
                    reason: "open-ended axes cannot be swept".to_string(),
                });
            }
            if ancestors.iter().any(|a| a.name() == axis.name()) {
                return Err(SweepError::DuplicateName {
                    kind: "axis",
                    name: axis.name().to_string(),
                });
            }
            plan.add_axis(axis)?;
            ancestors.push(axis.clone());
            node = &child.node;
        }

        for name in plan.datasets.keys() {
            if plan.axes.contains_key(name) || name == SETTINGS_RECORD || name == MEASUREMENT_RECORD {
                return Err(SweepError::DuplicateName {
                    kind: "dataset",
                    name: name.clone(),
                });
            }
        }
        for measurement in experiment.measurements() {
            for (view_name, view) in measurement.default_views() {
                plan.check_view(&view_name, &view)?;
            }
        }
        Ok(plan)
    }

    fn add_measurement(&mut self, measurement: &Measurement, ancestors: &[Axis]) -> SweepResult<()> {
        let data = measurement.expected_structure();
        let analyses = measurement.analysis_structure();
        let declared = data
            .iter()
            .map(|d| (d, DatasetCategory::Data))
            .chain(analyses.iter().flat_map(|(_, descriptors)| {
                descriptors.iter().map(|d| (d, DatasetCategory::Analysis))
            }));
        for (descriptor, category) in declared {
            descriptor.validate()?;
            let rank = descriptor.effective_rank(ancestors.len());
            if rank > MAX_STORAGE_RANK {
                tracing::error!(
                    dataset = descriptor.name(),
                    measurement = %measurement.name(),
                    rank,
                    "unsupported dataset rank"
                );
                return Err(SweepError::UnsupportedRank {
                    name: descriptor.name().to_string(),
                    depth: ancestors.len(),
                    rank,
                });
            }
            for axis in descriptor.axes() {
                if ancestors.iter().any(|a| a.name() == axis.name()) {
                    return Err(SweepError::DuplicateName {
                        kind: "axis",
                        name: axis.name().to_string(),
                    });
                }
                self.add_axis(axis)?;
            }
            if self
                .datasets
                .insert(descriptor.name().to_string(), category)
                .is_some()
            {
                return Err(SweepError::DuplicateName {
                    kind: "dataset",
                    name: descriptor.name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// Axes sharing a name must be the same axis; their coordinate is written once.
    fn add_axis(&mut self, axis: &Axis) -> SweepResult<()> {
        match self.axes.get(axis.name()) {
            Some(existing) if existing != axis => Err(SweepError::InvalidAxis {
                name: axis.name().to_string(),
                reason: "declared twice with different values or units".to_string(),
            }),
            Some(_) => Ok(()),
            None => {
                self.axes.insert(axis.name().to_string(), axis.clone());
                Ok(())
            }
        }
    }

    fn check_view(&self, view_name: &str, view: &DataView) -> SweepResult<()> {
        for reference in view.references() {
            let known = match reference.category() {
                DatasetCategory::Data => {
                    self.datasets.get(reference.name()) == Some(&DatasetCategory::Data)
                        || self.axes.contains_key(reference.name())
                }
                DatasetCategory::Analysis => {
                    self.datasets.get(reference.name()) == Some(&DatasetCategory::Analysis)
                }
            };
            if !known {
                return Err(SweepError::Configuration(format!(
                    "view '{view_name}' references unknown dataset '{}'",
                    reference.to_path()
                )));
            }
        }
        Ok(())
    }
}
