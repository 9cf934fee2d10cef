//! Core library of the rust_sweep measurement engine.
//!
//! An experiment is described as a chain of nested parameter sweeps with
//! measurement and analysis adapters attached at every level. The engine
//! derives the shape of every dataset from the nesting depth and the declared
//! rank of each measurement, pre-registers them in a growable-array storage
//! unit, and then drives the sweeps, appending results at the right index
//! tuple as they arrive.
//!
//! - [`axis`], [`data`], [`view`]: the declarative data model.
//! - [`measurement`], [`analysis`]: pluggable adapters.
//! - [`experiment`]: the sweep tree, its runtime context and the run sequence.
//! - [`storage`]: the storage contract, the index to storage mapping, and the
//!   in-memory and HDF5 backends.
//! - [`config`], [`tracing_setup`], [`metadata`], [`instrument`]: the
//!   surroundings of a run.

pub mod analysis;
pub mod axis;
pub mod config;
pub mod data;
pub mod error;
pub mod experiment;
pub mod instrument;
pub mod measurement;
pub mod metadata;
pub mod storage;
pub mod tracing_setup;
pub mod view;

/// The types needed to build and run an experiment.
pub mod prelude {
    pub use crate::analysis::{AnalysisTypeAdapter, NumericalDerivative};
    pub use crate::axis::Axis;
    pub use crate::config::SweepConfig;
    pub use crate::data::{DataDescriptor, DatasetCategory, GeneratedData};
    pub use crate::error::{SweepError, SweepResult};
    pub use crate::experiment::{
        CurrentValue, Experiment, RunOptions, RunReport, RuntimeContext, Sweep,
    };
    pub use crate::measurement::{
        Measurement, MeasurementTypeAdapter, ScalarMeasurement, TransportMeasurement,
    };
    pub use crate::metadata::{Sample, SampleBuilder};
    pub use crate::view::{DataReference, DataView, DataViewSet, ViewMap};
}
