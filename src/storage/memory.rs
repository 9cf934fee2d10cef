//! In-memory storage backend.
//!
//! `MemoryStorage` implements the full [`Storage`] contract on NaN-filled
//! `ndarray` buffers that grow as rows arrive. Handles are cheap clones of a
//! shared unit, so a test (or the demo binary) can keep one and inspect the data
//! after the experiment has closed it. Every operation is recorded in a journal
//! of [`StorageEvent`]s. When persistence is enabled, `close()` writes a JSON
//! snapshot next to the measurement path; partial runs stay readable that way.

use ndarray::{Array1, ArrayD, Axis as NdAxis, IxDyn, Slice};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{row_region, ArrayHandle, ArraySpec, DatasetKind, Row, Storage, StorageFactory};
use crate::data::DatasetCategory;
use crate::error::{SweepError, SweepResult};
use crate::experiment::file_path::MeasurementFilePath;
use crate::view::DataView;

/// One recorded storage operation.
#[derive(Debug, Clone, PartialEq)]
pub enum StorageEvent {
    /// A coordinate array was created and filled.
    CoordinateCreated {
        /// Coordinate name.
        name: String,
    },
    /// A data array was declared.
    ArrayCreated {
        /// Dataset name.
        name: String,
        /// Group of the dataset.
        category: DatasetCategory,
    },
    /// A block was written.
    Append {
        /// Dataset name.
        name: String,
        /// Sweep position of the block.
        position: Vec<usize>,
        /// Point-by-point append.
        pointwise: bool,
    },
    /// A row was closed.
    NextMatrix {
        /// Dataset name.
        name: String,
    },
    /// A view was registered.
    ViewInserted {
        /// View name.
        name: String,
    },
    /// A text record was stored.
    TextRecord {
        /// Record name.
        name: String,
    },
    /// A file comment was added.
    Comment,
    /// Live tailing was switched on.
    LiveTailing,
    /// Pending writes were flushed.
    Flushed,
    /// The unit was closed.
    Closed,
}

#[derive(Debug, Clone)]
struct Entry {
    spec: ArraySpec,
    kind: DatasetKind,
    data: ArrayD<f64>,
    rollovers: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct TextRecord {
    content: String,
    comment: Option<String>,
}

#[derive(Debug, Default)]
struct Inner {
    arrays: BTreeMap<String, Entry>,
    views: BTreeMap<String, DataView>,
    text_records: BTreeMap<String, TextRecord>,
    comments: Vec<String>,
    live_tailing: bool,
    closed: bool,
    events: Vec<StorageEvent>,
    persist_to: Option<PathBuf>,
}

/// Shared in-memory storage unit.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    location: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStorage {
    /// Unit that only lives in memory.
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
            inner: Arc::new(Mutex::new(Inner::default())),
        }
    }

    /// Unit that writes a JSON snapshot to `location` (extension `.json`) on close.
    pub fn persisting(location: impl Into<PathBuf>) -> Self {
        let storage = Self::new(location);
        let target = storage.location.with_extension("json");
        storage.lock().persist_to = Some(target);
        storage
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Journal of every operation so far.
    pub fn events(&self) -> Vec<StorageEvent> {
        self.lock().events.clone()
    }

    /// Declaration of an array or coordinate.
    pub fn spec(&self, name: &str) -> Option<ArraySpec> {
        self.lock().arrays.get(name).map(|e| e.spec.clone())
    }

    /// Kind of an array or coordinate.
    pub fn kind(&self, name: &str) -> Option<DatasetKind> {
        self.lock().arrays.get(name).map(|e| e.kind)
    }

    /// How many rows of `name` have been closed.
    pub fn rollovers(&self, name: &str) -> usize {
        self.lock().arrays.get(name).map_or(0, |e| e.rollovers)
    }

    /// Names of all arrays in a group.
    pub fn array_names(&self, category: DatasetCategory) -> Vec<String> {
        self.lock()
            .arrays
            .iter()
            .filter(|(_, e)| e.spec.category == category)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// A registered view.
    pub fn view(&self, name: &str) -> Option<DataView> {
        self.lock().views.get(name).cloned()
    }

    /// Names of all registered views.
    pub fn view_names(&self) -> Vec<String> {
        self.lock().views.keys().cloned().collect()
    }

    /// Content of a text record.
    pub fn text_record(&self, name: &str) -> Option<String> {
        self.lock().text_records.get(name).map(|r| r.content.clone())
    }

    /// File comments.
    pub fn comments(&self) -> Vec<String> {
        self.lock().comments.clone()
    }

    /// True once `enable_live_tailing` was called.
    pub fn is_live_tailing(&self) -> bool {
        self.lock().live_tailing
    }

    /// True once the unit was closed.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Where `close()` writes the snapshot, if anywhere.
    pub fn persist_path(&self) -> Option<PathBuf> {
        self.lock().persist_to.clone()
    }

    /// Read a snapshot written by a persisting unit.
    pub fn load(path: impl AsRef<Path>) -> SweepResult<StorageSnapshot> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn snapshot(inner: &Inner) -> StorageSnapshot {
        StorageSnapshot {
            arrays: inner
                .arrays
                .iter()
                .map(|(name, entry)| {
                    (
                        name.clone(),
                        ArraySnapshot {
                            spec: entry.spec.clone(),
                            kind: entry.kind,
                            shape: entry.data.shape().to_vec(),
                            values: entry
                                .data
                                .iter()
                                .map(|v| if v.is_nan() { None } else { Some(*v) })
                                .collect(),
                            rollovers: entry.rollovers,
                        },
                    )
                })
                .collect(),
            views: inner.views.clone(),
            text_records: inner
                .text_records
                .iter()
                .map(|(name, record)| (name.clone(), record.content.clone()))
                .collect(),
            comments: inner.comments.clone(),
        }
    }

    fn ensure_open(inner: &Inner) -> SweepResult<()> {
        if inner.closed {
            return Err(SweepError::Storage("storage unit is closed".to_string()));
        }
        Ok(())
    }
}

/// Serializable copy of a memory unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSnapshot {
    /// Arrays and coordinates by name.
    pub arrays: BTreeMap<String, ArraySnapshot>,
    /// Views by name.
    pub views: BTreeMap<String, DataView>,
    /// Text records by name.
    pub text_records: BTreeMap<String, String>,
    /// File comments.
    pub comments: Vec<String>,
}

impl StorageSnapshot {
    /// Rebuild one array, unwritten cells as NaN.
    pub fn array(&self, name: &str) -> Option<ArrayD<f64>> {
        let snap = self.arrays.get(name)?;
        let values = snap
            .values
            .iter()
            .map(|v| v.unwrap_or(f64::NAN))
            .collect();
        ArrayD::from_shape_vec(IxDyn(&snap.shape), values).ok()
    }
}

/// Serializable copy of one array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArraySnapshot {
    /// Declaration.
    pub spec: ArraySpec,
    /// Kind tag.
    pub kind: DatasetKind,
    /// Written extent.
    pub shape: Vec<usize>,
    /// Row-major values, `None` where nothing was written.
    pub values: Vec<Option<f64>>,
    /// Closed rows.
    pub rollovers: usize,
}

fn grow(entry: &mut Entry, required: &[usize]) {
    let current = entry.data.shape().to_vec();
    let target: Vec<usize> = current
        .iter()
        .zip(required)
        .map(|(have, need)| (*have).max(*need))
        .collect();
    if target == current {
        return;
    }
    let mut grown = ArrayD::from_elem(IxDyn(&target), f64::NAN);
    grown
        .slice_each_axis_mut(|ad| Slice::from(0..current[ad.axis.index()]))
        .assign(&entry.data);
    entry.data = grown;
}

fn write_row(entry: &mut Entry, row: &Row<'_>) -> SweepResult<()> {
    let name = entry.spec.name.clone();
    let prefix = row.position.len();
    let (start, end) = row_region(&entry.spec, row)?;

    grow(entry, &end);

    let mut block = row.data.view();
    for _ in 0..prefix {
        block = block.insert_axis(NdAxis(0));
    }

    let mut target =
        entry
            .data
            .slice_each_axis_mut(|ad| Slice::from(start[ad.axis.index()]..end[ad.axis.index()]));
    if target.iter().any(|v| !v.is_nan()) {
        return Err(SweepError::OverwriteAttempt {
            dataset: name,
            position: row.position.to_vec(),
        });
    }
    target.assign(&block);
    Ok(())
}

impl Storage for MemoryStorage {
    fn location(&self) -> &Path {
        &self.location
    }

    fn create_coordinate(
        &mut self,
        name: &str,
        unit: &str,
        values: Option<&[f64]>,
    ) -> SweepResult<ArrayHandle> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        let handle = ArrayHandle::new(name, DatasetCategory::Data);
        if inner.arrays.contains_key(name) {
            return Ok(handle);
        }
        let data = values.map_or_else(
            || ArrayD::from_elem(IxDyn(&[0]), f64::NAN),
            |v| Array1::from(v.to_vec()).into_dyn(),
        );
        let entry = Entry {
            spec: ArraySpec {
                name: name.to_string(),
                unit: unit.to_string(),
                category: DatasetCategory::Data,
                axes: Vec::new(),
                shape: vec![values.map(<[f64]>::len)],
            },
            kind: DatasetKind::Coordinate,
            data,
            rollovers: 0,
        };
        inner.arrays.insert(name.to_string(), entry);
        inner.events.push(StorageEvent::CoordinateCreated {
            name: name.to_string(),
        });
        Ok(handle)
    }

    fn create_array(&mut self, spec: &ArraySpec) -> SweepResult<ArrayHandle> {
        let kind = spec.kind()?;
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        let handle = ArrayHandle::new(&spec.name, spec.category);
        if let Some(existing) = inner.arrays.get(&spec.name) {
            if existing.spec != *spec {
                return Err(SweepError::Storage(format!(
                    "'{}' already exists with a different declaration",
                    spec.name
                )));
            }
            return Ok(handle);
        }
        let initial = vec![0; spec.rank()];
        let data = ArrayD::from_elem(IxDyn(&initial), f64::NAN);
        inner.arrays.insert(
            spec.name.clone(),
            Entry {
                spec: spec.clone(),
                kind,
                data,
                rollovers: 0,
            },
        );
        inner.events.push(StorageEvent::ArrayCreated {
            name: spec.name.clone(),
            category: spec.category,
        });
        Ok(handle)
    }

    fn get_array(&self, name: &str) -> Option<ArrayHandle> {
        self.lock()
            .arrays
            .get(name)
            .map(|e| ArrayHandle::new(name, e.spec.category))
    }

    fn append(&mut self, handle: &ArrayHandle, row: Row<'_>) -> SweepResult<()> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        let entry = inner
            .arrays
            .get_mut(handle.name())
            .ok_or_else(|| SweepError::DatasetNotFound(handle.name().to_string()))?;
        write_row(entry, &row)?;
        inner.events.push(StorageEvent::Append {
            name: handle.name().to_string(),
            position: row.position.to_vec(),
            pointwise: row.pointwise,
        });
        Ok(())
    }

    fn next_matrix(&mut self, handle: &ArrayHandle) -> SweepResult<()> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        let entry = inner
            .arrays
            .get_mut(handle.name())
            .ok_or_else(|| SweepError::DatasetNotFound(handle.name().to_string()))?;
        entry.rollovers += 1;
        inner.events.push(StorageEvent::NextMatrix {
            name: handle.name().to_string(),
        });
        Ok(())
    }

    fn insert_view(&mut self, name: &str, view: &DataView) -> SweepResult<()> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        inner.views.insert(name.to_string(), view.clone());
        inner.events.push(StorageEvent::ViewInserted {
            name: name.to_string(),
        });
        Ok(())
    }

    fn write_text_record(
        &mut self,
        name: &str,
        content: &str,
        comment: Option<&str>,
    ) -> SweepResult<()> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        if inner.text_records.contains_key(name) || inner.arrays.contains_key(name) {
            return Err(SweepError::DuplicateName {
                kind: "text record",
                name: name.to_string(),
            });
        }
        inner.text_records.insert(
            name.to_string(),
            TextRecord {
                content: content.to_string(),
                comment: comment.map(str::to_string),
            },
        );
        inner.events.push(StorageEvent::TextRecord {
            name: name.to_string(),
        });
        Ok(())
    }

    fn add_comment(&mut self, text: &str) -> SweepResult<()> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        inner.comments.push(text.to_string());
        inner.events.push(StorageEvent::Comment);
        Ok(())
    }

    fn enable_live_tailing(&mut self) -> SweepResult<()> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        inner.live_tailing = true;
        inner.events.push(StorageEvent::LiveTailing);
        Ok(())
    }

    fn read(&self, name: &str) -> SweepResult<ArrayD<f64>> {
        self.lock()
            .arrays
            .get(name)
            .map(|e| e.data.clone())
            .ok_or_else(|| SweepError::DatasetNotFound(name.to_string()))
    }

    fn flush(&mut self) -> SweepResult<()> {
        let mut inner = self.lock();
        Self::ensure_open(&inner)?;
        inner.events.push(StorageEvent::Flushed);
        Ok(())
    }

    fn close(&mut self) -> SweepResult<()> {
        let mut inner = self.lock();
        if inner.closed {
            return Ok(());
        }
        inner.closed = true;
        inner.live_tailing = false;
        inner.events.push(StorageEvent::Closed);
        if let Some(path) = inner.persist_to.clone() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let snapshot = Self::snapshot(&inner);
            fs::write(&path, serde_json::to_string_pretty(&snapshot)?)?;
            tracing::debug!(path = %path.display(), "memory storage persisted");
        }
        Ok(())
    }
}

/// Hands out memory units and keeps a handle to each for later inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageFactory {
    persist: bool,
    created: Arc<Mutex<Vec<MemoryStorage>>>,
}

impl MemoryStorageFactory {
    /// Factory for units that only live in memory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Factory for units that persist a JSON snapshot on close.
    pub fn persisting() -> Self {
        Self {
            persist: true,
            ..Self::default()
        }
    }

    /// Every unit created so far, oldest first.
    pub fn created(&self) -> Vec<MemoryStorage> {
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recently created unit.
    pub fn last(&self) -> Option<MemoryStorage> {
        self.created().pop()
    }
}

impl StorageFactory for MemoryStorageFactory {
    fn create(&self, path: &MeasurementFilePath) -> SweepResult<Box<dyn Storage>> {
        let location = path.file_path();
        let storage = if self.persist {
            MemoryStorage::persisting(location)
        } else {
            MemoryStorage::new(location)
        };
        self.created
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(storage.clone());
        Ok(Box::new(storage))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, array};

    fn spec(name: &str, shape: Vec<Option<usize>>) -> ArraySpec {
        ArraySpec {
            name: name.to_string(),
            unit: "V".to_string(),
            category: DatasetCategory::Data,
            axes: (0..shape.len()).map(|i| format!("ax{i}")).collect(),
            shape,
        }
    }

    #[test]
    fn pointwise_appends_grow_a_vector() {
        let mut storage = MemoryStorage::new("vec");
        let handle = storage.create_array(&spec("y", vec![Some(3)])).unwrap();
        for (i, v) in [0.0, 2.0, 4.0].into_iter().enumerate() {
            let value = arr0(v).into_dyn();
            storage
                .append(
                    &handle,
                    Row {
                        position: &[i],
                        data: value.view(),
                        pointwise: true,
                    },
                )
                .unwrap();
        }
        assert_eq!(storage.read("y").unwrap().as_slice().unwrap(), &[0.0, 2.0, 4.0]);
    }

    #[test]
    fn rows_land_in_matrix() {
        let mut storage = MemoryStorage::new("mat");
        let handle = storage
            .create_array(&spec("trace", vec![Some(2), Some(3)]))
            .unwrap();
        let row = array![1.0, 2.0, 3.0].into_dyn();
        storage
            .append(
                &handle,
                Row {
                    position: &[1],
                    data: row.view(),
                    pointwise: false,
                },
            )
            .unwrap();
        let data = storage.read("trace").unwrap();
        assert_eq!(data.shape(), &[2, 3]);
        assert!(data[[0, 0]].is_nan());
        assert_eq!(data[[1, 2]], 3.0);
    }

    #[test]
    fn overwrite_is_rejected() {
        let mut storage = MemoryStorage::new("ow");
        let handle = storage.create_array(&spec("y", vec![Some(2)])).unwrap();
        let value = arr0(1.0).into_dyn();
        let row = || Row {
            position: &[0],
            data: value.view(),
            pointwise: true,
        };
        storage.append(&handle, row()).unwrap();
        assert!(matches!(
            storage.append(&handle, row()),
            Err(SweepError::OverwriteAttempt { .. })
        ));
    }

    #[test]
    fn out_of_bounds_write_fails() {
        let mut storage = MemoryStorage::new("oob");
        let handle = storage.create_array(&spec("y", vec![Some(2)])).unwrap();
        let value = arr0(1.0).into_dyn();
        let err = storage
            .append(
                &handle,
                Row {
                    position: &[2],
                    data: value.view(),
                    pointwise: true,
                },
            )
            .unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn create_array_is_idempotent_by_name() {
        let mut storage = MemoryStorage::new("idem");
        let first = storage.create_array(&spec("y", vec![Some(2)])).unwrap();
        let second = storage.create_array(&spec("y", vec![Some(2)])).unwrap();
        assert_eq!(first, second);
        assert!(storage.create_array(&spec("y", vec![Some(5)])).is_err());
    }

    #[test]
    fn closed_unit_rejects_writes() {
        let mut storage = MemoryStorage::new("closed");
        storage.close().unwrap();
        storage.close().unwrap();
        assert!(storage.add_comment("late").is_err());
        assert!(storage.is_closed());
    }

    #[test]
    fn persisted_snapshot_round_trips_partial_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut storage = MemoryStorage::persisting(dir.path().join("run.h5"));
        let handle = storage.create_array(&spec("y", vec![Some(3)])).unwrap();
        let value = arr0(7.0).into_dyn();
        storage
            .append(
                &handle,
                Row {
                    position: &[0],
                    data: value.view(),
                    pointwise: true,
                },
            )
            .unwrap();
        storage.write_text_record("settings", "{}", None).unwrap();
        storage.close().unwrap();

        let snapshot = MemoryStorage::load(dir.path().join("run.json")).unwrap();
        assert_eq!(snapshot.array("y").unwrap().as_slice().unwrap(), &[7.0]);
        assert_eq!(snapshot.text_records["settings"], "{}");
    }
}
