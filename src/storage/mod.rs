//! Storage substrate contract.
//!
//! The sweep engine only needs a small set of operations from its file format:
//! named growable arrays with declared rank and axes, appends at a sweep position,
//! an explicit "row finished" signal, coordinates, text records, views, and a
//! clean close. Everything here is expressed through the [`Storage`] trait so the
//! engine can be driven against [`memory::MemoryStorage`] in tests and against
//! HDF5 (feature `storage_hdf5`) in the lab.

use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::config::SweepConfig;
use crate::data::DatasetCategory;
use crate::error::{SweepError, SweepResult};
use crate::experiment::file_path::MeasurementFilePath;
use crate::view::DataView;

#[cfg(feature = "storage_hdf5")]
pub mod hdf5;
pub mod layout;
pub mod memory;

/// Highest array rank a backend has to support (box).
pub const MAX_STORAGE_RANK: usize = 3;

/// Kind tag of a dataset, derived from its rank or role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetKind {
    /// Axis values.
    Coordinate,
    /// Single value.
    Scalar,
    /// One dimension.
    Vector,
    /// Two dimensions.
    Matrix,
    /// Three dimensions.
    Box,
    /// Text record.
    Text,
    /// View definition.
    View,
}

impl DatasetKind {
    /// Kind of a data array of the given rank.
    pub fn from_rank(name: &str, rank: usize) -> SweepResult<Self> {
        match rank {
            0 => Ok(DatasetKind::Scalar),
            1 => Ok(DatasetKind::Vector),
            2 => Ok(DatasetKind::Matrix),
            3 => Ok(DatasetKind::Box),
            _ => Err(SweepError::UnsupportedRank {
                name: name.to_string(),
                depth: 0,
                rank,
            }),
        }
    }

    /// Numeric `ds_type` code viewers understand. Scalars are stored as vectors.
    pub fn code(self) -> u8 {
        match self {
            DatasetKind::Coordinate => 0,
            DatasetKind::Scalar | DatasetKind::Vector => 1,
            DatasetKind::Matrix => 2,
            DatasetKind::Box => 3,
            DatasetKind::Text => 10,
            DatasetKind::View => 20,
        }
    }
}

/// Declaration of one growable data array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySpec {
    /// Dataset name.
    pub name: String,
    /// Physical unit.
    pub unit: String,
    /// Group the array lives in.
    pub category: DatasetCategory,
    /// Coordinate names, outermost first.
    pub axes: Vec<String>,
    /// Maximum extent per dimension; `None` for open-ended dimensions.
    pub shape: Vec<Option<usize>>,
}

impl ArraySpec {
    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Kind derived from the rank.
    pub fn kind(&self) -> SweepResult<DatasetKind> {
        DatasetKind::from_rank(&self.name, self.rank())
    }
}

/// Name-based handle to an array in a storage unit.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArrayHandle {
    name: String,
    category: DatasetCategory,
}

impl ArrayHandle {
    /// Handle for the named array.
    pub fn new(name: impl Into<String>, category: DatasetCategory) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group of the dataset.
    pub fn category(&self) -> DatasetCategory {
        self.category
    }
}

/// One write into a growable array.
#[derive(Debug, Clone)]
pub struct Row<'a> {
    /// Sweep-index tuple; the block lands at `position ++ [0; data.ndim()]`.
    pub position: &'a [usize],
    /// The block to write.
    pub data: ArrayViewD<'a, f64>,
    /// True when a single point is appended into a higher-rank array.
    pub pointwise: bool,
}

/// Half-open region `[start, end)` a row covers in the array declared by `spec`.
///
/// The block lands at `position ++ [0; data.ndim()]`. Fails when the rank does
/// not add up or a fixed dimension would be exceeded.
pub(crate) fn row_region(spec: &ArraySpec, row: &Row<'_>) -> SweepResult<(Vec<usize>, Vec<usize>)> {
    let prefix = row.position.len();
    if prefix + row.data.ndim() != spec.rank() {
        return Err(SweepError::Storage(format!(
            "block of rank {} at depth {} does not fit '{}' of rank {}",
            row.data.ndim(),
            prefix,
            spec.name,
            spec.rank()
        )));
    }

    let start: Vec<usize> = row
        .position
        .iter()
        .copied()
        .chain(std::iter::repeat(0).take(row.data.ndim()))
        .collect();
    let extent = std::iter::repeat(1)
        .take(prefix)
        .chain(row.data.shape().iter().copied());
    let end: Vec<usize> = start.iter().zip(extent).map(|(s, e)| s + e).collect();

    if let Some((dim, (limit, needed))) = spec
        .shape
        .iter()
        .zip(&end)
        .enumerate()
        .find(|(_, (limit, needed))| limit.map_or(false, |l| **needed > l))
    {
        return Err(SweepError::Storage(format!(
            "write to '{}' exceeds dimension {} ({} > {:?})",
            spec.name, dim, needed, limit
        )));
    }
    Ok((start, end))
}

/// Upper bound on the values held by one storage chunk (1 MiB of `f64`).
pub(crate) const CHUNK_VALUES: usize = 128 * 1024;

/// Chunk extents for an array declared by `spec`.
///
/// Rows are written one sweep point at a time along the leading dimensions, so
/// those get chunk 1. The innermost dimension takes its declared extent (64 when
/// open-ended) up to [`CHUNK_VALUES`].
pub(crate) fn chunk_shape(spec: &ArraySpec) -> Vec<usize> {
    let Some((last, leading)) = spec.shape.split_last() else {
        return vec![1];
    };
    leading
        .iter()
        .map(|_| 1)
        .chain(std::iter::once(last.unwrap_or(64).clamp(1, CHUNK_VALUES)))
        .collect()
}

/// Growable-array file substrate used by the engine.
///
/// Implementations are owned exclusively by one experiment run. Callers hand out
/// `&mut dyn Storage` per call and never retain it.
pub trait Storage: Send {
    /// Where the unit lives (file path or logical name).
    fn location(&self) -> &Path;

    /// Create a coordinate array and fill it, or return the existing one unchanged.
    fn create_coordinate(
        &mut self,
        name: &str,
        unit: &str,
        values: Option<&[f64]>,
    ) -> SweepResult<ArrayHandle>;

    /// Create a growable data array; idempotent by name.
    fn create_array(&mut self, spec: &ArraySpec) -> SweepResult<ArrayHandle>;

    /// Look up an existing array.
    fn get_array(&self, name: &str) -> Option<ArrayHandle>;

    /// Write one block at its sweep position.
    fn append(&mut self, handle: &ArrayHandle, row: Row<'_>) -> SweepResult<()>;

    /// Close the current row and start the next one.
    fn next_matrix(&mut self, handle: &ArrayHandle) -> SweepResult<()>;

    /// Register a view under `name`.
    fn insert_view(&mut self, name: &str, view: &DataView) -> SweepResult<()>;

    /// Store an immutable text record.
    fn write_text_record(
        &mut self,
        name: &str,
        content: &str,
        comment: Option<&str>,
    ) -> SweepResult<()>;

    /// Attach a free-text comment to the whole unit.
    fn add_comment(&mut self, text: &str) -> SweepResult<()>;

    /// Switch into single-writer/multi-reader mode so a viewer can tail the file.
    fn enable_live_tailing(&mut self) -> SweepResult<()>;

    /// Random-access read of a whole array, trimmed to what has been written.
    fn read(&self, name: &str) -> SweepResult<ArrayD<f64>>;

    /// Push pending writes to the medium.
    fn flush(&mut self) -> SweepResult<()>;

    /// Flush and release the unit. Further writes fail.
    fn close(&mut self) -> SweepResult<()>;
}

/// Creates one storage unit per experiment run.
pub trait StorageFactory: Send + Sync {
    /// Open a fresh unit for the given measurement path.
    fn create(&self, path: &MeasurementFilePath) -> SweepResult<Box<dyn Storage>>;
}

/// Pick the storage factory named in the configuration.
pub fn factory_from_config(config: &SweepConfig) -> SweepResult<Arc<dyn StorageFactory>> {
    match config.storage.backend.as_str() {
        "memory" => {
            let factory = if config.storage.persist_memory {
                memory::MemoryStorageFactory::persisting()
            } else {
                memory::MemoryStorageFactory::new()
            };
            Ok(Arc::new(factory))
        }
        "hdf5" => hdf5_factory(),
        other => Err(SweepError::Configuration(format!(
            "Unknown storage backend '{other}'"
        ))),
    }
}

#[cfg(feature = "storage_hdf5")]
fn hdf5_factory() -> SweepResult<Arc<dyn StorageFactory>> {
    Ok(Arc::new(hdf5::Hdf5StorageFactory))
}

#[cfg(not(feature = "storage_hdf5"))]
fn hdf5_factory() -> SweepResult<Arc<dyn StorageFactory>> {
    Err(SweepError::FeatureNotEnabled("storage_hdf5".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec_with_shape(shape: Vec<Option<usize>>) -> ArraySpec {
        ArraySpec {
            name: "z".into(),
            unit: "V".into(),
            category: DatasetCategory::Data,
            axes: shape.iter().enumerate().map(|(i, _)| format!("x{i}")).collect(),
            shape,
        }
    }

    #[test]
    fn chunks_stay_small_for_large_boxes() {
        let big = spec_with_shape(vec![Some(1000), Some(1000), Some(1000)]);
        let chunk = chunk_shape(&big);
        assert_eq!(chunk, vec![1, 1, 1000]);
        let bytes = chunk.iter().product::<usize>() * std::mem::size_of::<f64>();
        assert!(bytes <= 1 << 20);

        let wide = spec_with_shape(vec![Some(3), Some(10_000_000)]);
        assert_eq!(chunk_shape(&wide), vec![1, CHUNK_VALUES]);

        assert_eq!(chunk_shape(&spec_with_shape(vec![None])), vec![64]);
        assert_eq!(chunk_shape(&spec_with_shape(vec![])), vec![1]);
    }

    #[test]
    fn kind_follows_rank() {
        assert_eq!(DatasetKind::from_rank("a", 0).unwrap(), DatasetKind::Scalar);
        assert_eq!(DatasetKind::from_rank("a", 3).unwrap(), DatasetKind::Box);
        assert!(DatasetKind::from_rank("a", 4).is_err());
        assert_eq!(DatasetKind::Matrix.code(), 2);
    }

    #[test]
    fn unknown_backend_is_configuration_error() {
        let mut config = SweepConfig::default();
        config.storage.backend = "zarr".into();
        let err = factory_from_config(&config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[cfg(not(feature = "storage_hdf5"))]
    #[test]
    fn hdf5_without_feature_reports_it() {
        let mut config = SweepConfig::default();
        config.storage.backend = "hdf5".into();
        assert!(matches!(
            factory_from_config(&config),
            Err(SweepError::FeatureNotEnabled(_))
        ));
    }
}
