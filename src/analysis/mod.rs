//! Analysis adapters.
//!
//! An analysis consumes what its measurement just produced and derives new
//! datasets from it (derivatives, fits). Its schema is a function of the
//! parent measurement's schema, which is known before the run starts; the
//! live values only ever fill that schema, they never change its shape.
//! Results are filed in the analysis group.

use anyhow::Result;

use crate::data::{DataDescriptor, GeneratedData};
use crate::view::ViewMap;

pub mod derivative;

pub use derivative::NumericalDerivative;

/// Strategy object deriving datasets from a measurement's output.
pub trait AnalysisTypeAdapter: Send {
    /// Human-readable analysis name used in logs and errors.
    fn name(&self) -> String;

    /// Datasets derived from `parent_schema`.
    fn expected_structure(&self, parent_schema: &[DataDescriptor]) -> Vec<DataDescriptor>;

    /// Views over the derived datasets.
    fn default_views(&self, _parent_schema: &[DataDescriptor]) -> ViewMap {
        ViewMap::new()
    }

    /// Derive data from one measurement cycle's output.
    fn perform_analysis(&mut self, measured: &[GeneratedData]) -> Result<Vec<GeneratedData>>;
}
