//! HDF5 backend (feature `storage_hdf5`).
//!
//! Layout follows the qviewkit convention:
//!
//! ```text
//! /entry/data0/<coordinate | dataset | text record>
//! /entry/analysis0/<analysis dataset>
//! /entry/view0/<view>
//! ```
//!
//! Data arrays start with zero extent along every dimension, are chunked and
//! NaN-filled, and grow as rows arrive. Scalars at the top level are stored as
//! one-element vectors. Attributes carry `ds_type`, `unit` and the
//! `x_ds_url`/`y_ds_url`/`z_ds_url` links to the coordinates.

use hdf5::types::VarLenUnicode;
use hdf5::{Dataset, Extent, File, Group, Location, SimpleExtents};
use ndarray::{ArrayD, Axis as NdAxis, IxDyn, SliceInfo, SliceInfoElem};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{chunk_shape, row_region, ArrayHandle, ArraySpec, DatasetKind, Row, Storage, StorageFactory};
use crate::data::DatasetCategory;
use crate::error::{SweepError, SweepResult};
use crate::experiment::file_path::MeasurementFilePath;
use crate::view::DataView;

const ENTRY: &str = "entry";
const VIEWS: &str = "view0";
const URL_ATTRS: [&str; 3] = ["x_ds_url", "y_ds_url", "z_ds_url"];

/// Creates one `.h5` file per run below the dated data folder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hdf5StorageFactory;

impl StorageFactory for Hdf5StorageFactory {
    fn create(&self, path: &MeasurementFilePath) -> SweepResult<Box<dyn Storage>> {
        path.mkdirs()?;
        Ok(Box::new(Hdf5Storage::create(path.file_path())?))
    }
}

struct Hdf5Array {
    spec: ArraySpec,
    dataset: Dataset,
}

/// One open measurement file.
pub struct Hdf5Storage {
    path: PathBuf,
    file: Option<File>,
    arrays: BTreeMap<String, Hdf5Array>,
    text_records: Vec<String>,
    comments: Vec<String>,
}

impl Hdf5Storage {
    /// Create (truncate) the file and its group skeleton.
    pub fn create(path: impl Into<PathBuf>) -> SweepResult<Self> {
        let path = path.into();
        let file = File::create(&path)?;
        let entry = file.create_group(ENTRY)?;
        for group in [
            DatasetCategory::Data.folder(),
            DatasetCategory::Analysis.folder(),
            VIEWS,
        ] {
            entry.create_group(group)?;
        }
        write_str_attr(&file, "application", "rust_sweep")?;
        write_str_attr(&file, "created_at", &chrono::Utc::now().to_rfc3339())?;
        tracing::info!(path = %path.display(), "HDF5 file created");
        Ok(Self {
            path,
            file: Some(file),
            arrays: BTreeMap::new(),
            text_records: Vec::new(),
            comments: Vec::new(),
        })
    }

    fn file(&self) -> SweepResult<&File> {
        self.file
            .as_ref()
            .ok_or_else(|| SweepError::Storage(format!("{} is closed", self.path.display())))
    }

    fn group(&self, folder: &str) -> SweepResult<Group> {
        Ok(self.file()?.group(&format!("{ENTRY}/{folder}"))?)
    }

    fn array(&self, name: &str) -> SweepResult<&Hdf5Array> {
        self.arrays
            .get(name)
            .ok_or_else(|| SweepError::DatasetNotFound(name.to_string()))
    }
}

fn write_str_attr(location: &Location, name: &str, value: &str) -> SweepResult<()> {
    let value: VarLenUnicode = value
        .parse()
        .map_err(|e| SweepError::Storage(format!("attribute '{name}': {e}")))?;
    location
        .new_attr::<VarLenUnicode>()
        .create(name)?
        .write_scalar(&value)?;
    Ok(())
}

fn write_int_attr(location: &Location, name: &str, value: i32) -> SweepResult<()> {
    location.new_attr::<i32>().create(name)?.write_scalar(&value)?;
    Ok(())
}

type Region = SliceInfo<Vec<SliceInfoElem>, IxDyn, IxDyn>;

fn selection(start: &[usize], end: &[usize]) -> SweepResult<Region> {
    let elems: Vec<SliceInfoElem> = start
        .iter()
        .zip(end)
        .map(|(s, e)| SliceInfoElem::from(*s..*e))
        .collect();
    SliceInfo::try_from(elems).map_err(|e| SweepError::Storage(e.to_string()))
}

impl Storage for Hdf5Storage {
    fn location(&self) -> &Path {
        &self.path
    }

    fn create_coordinate(
        &mut self,
        name: &str,
        unit: &str,
        values: Option<&[f64]>,
    ) -> SweepResult<ArrayHandle> {
        let handle = ArrayHandle::new(name, DatasetCategory::Data);
        if self.arrays.contains_key(name) {
            return Ok(handle);
        }
        let group = self.group(DatasetCategory::Data.folder())?;
        let extent = match values {
            Some(v) => Extent::fixed(v.len()),
            None => Extent::resizable(0),
        };
        let dataset = group
            .new_dataset::<f64>()
            .chunk(IxDyn(&[values.map_or(64, |v| v.len().max(1))]))
            .fill_value(f64::NAN)
            .shape(SimpleExtents::new(vec![extent]))
            .create(name)?;
        if let Some(values) = values {
            dataset.write(values)?;
        }
        write_int_attr(&dataset, "ds_type", i32::from(DatasetKind::Coordinate.code()))?;
        write_str_attr(&dataset, "unit", unit)?;
        self.arrays.insert(
            name.to_string(),
            Hdf5Array {
                spec: ArraySpec {
                    name: name.to_string(),
                    unit: unit.to_string(),
                    category: DatasetCategory::Data,
                    axes: Vec::new(),
                    shape: vec![values.map(<[f64]>::len)],
                },
                dataset,
            },
        );
        Ok(handle)
    }

    fn create_array(&mut self, spec: &ArraySpec) -> SweepResult<ArrayHandle> {
        let kind = spec.kind()?;
        let handle = ArrayHandle::new(&spec.name, spec.category);
        if let Some(existing) = self.arrays.get(&spec.name) {
            if existing.spec != *spec {
                return Err(SweepError::Storage(format!(
                    "'{}' already exists with a different declaration",
                    spec.name
                )));
            }
            return Ok(handle);
        }

        let group = self.group(spec.category.folder())?;
        let extents: Vec<Extent> = if spec.rank() == 0 {
            vec![Extent::fixed(1)]
        } else {
            spec.shape.iter().map(|max| Extent::new(0, *max)).collect()
        };
        let chunk = chunk_shape(spec);
        let dataset = group
            .new_dataset::<f64>()
            .chunk(IxDyn(&chunk))
            .fill_value(f64::NAN)
            .shape(SimpleExtents::new(extents))
            .create(spec.name.as_str())?;

        write_int_attr(&dataset, "ds_type", i32::from(kind.code()))?;
        write_str_attr(&dataset, "unit", &spec.unit)?;
        for (attr, axis) in URL_ATTRS.iter().zip(&spec.axes) {
            write_str_attr(
                &dataset,
                attr,
                &format!("/{ENTRY}/{}/{axis}", DatasetCategory::Data.folder()),
            )?;
        }
        tracing::debug!(dataset = %spec.name, ?kind, "HDF5 dataset created");
        self.arrays.insert(
            spec.name.clone(),
            Hdf5Array {
                spec: spec.clone(),
                dataset,
            },
        );
        Ok(handle)
    }

    fn get_array(&self, name: &str) -> Option<ArrayHandle> {
        self.arrays
            .get(name)
            .map(|a| ArrayHandle::new(name, a.spec.category))
    }

    fn append(&mut self, handle: &ArrayHandle, row: Row<'_>) -> SweepResult<()> {
        self.file()?;
        let array = self.array(handle.name())?;
        let (mut start, mut end) = row_region(&array.spec, &row)?;
        let mut block = row.data.view();
        for _ in 0..row.position.len() {
            block = block.insert_axis(NdAxis(0));
        }

        if array.spec.rank() == 0 {
            start = vec![0];
            end = vec![1];
            block = block.insert_axis(NdAxis(0));
        } else {
            let current = array.dataset.shape();
            let target: Vec<usize> = current
                .iter()
                .zip(&end)
                .map(|(have, need)| (*have).max(*need))
                .collect();
            if target != current {
                array.dataset.resize(IxDyn(&target))?;
            }
        }

        let region = selection(&start, &end)?;
        let existing: ArrayD<f64> = array.dataset.read_slice(region.clone())?;
        if existing.iter().any(|v| !v.is_nan()) {
            return Err(SweepError::OverwriteAttempt {
                dataset: handle.name().to_string(),
                position: row.position.to_vec(),
            });
        }
        array.dataset.write_slice(&block, region)?;
        Ok(())
    }

    fn next_matrix(&mut self, handle: &ArrayHandle) -> SweepResult<()> {
        self.array(handle.name())?;
        self.flush()
    }

    fn insert_view(&mut self, name: &str, view: &DataView) -> SweepResult<()> {
        let group = self.group(VIEWS)?;
        if group.link_exists(name) {
            group.unlink(name)?;
        }
        let dataset = group
            .new_dataset::<f64>()
            .shape(SimpleExtents::new(vec![Extent::fixed(0)]))
            .create(name)?;
        write_int_attr(&dataset, "ds_type", i32::from(DatasetKind::View.code()))?;
        write_int_attr(&dataset, "view_type", i32::from(view.view_type.code()))?;
        write_int_attr(&dataset, "overlays", view.overlays() as i32)?;
        write_str_attr(&dataset, "view_params", &view.view_params.to_string())?;
        for (i, set) in view.view_sets.iter().enumerate() {
            write_str_attr(&dataset, &format!("xy_{i}"), &set.xy())?;
            if let Some(filter) = &set.filter {
                write_str_attr(&dataset, &format!("xy_{i}_filter"), &filter.to_path())?;
            }
            if let Some(error) = &set.error {
                write_str_attr(&dataset, &format!("xy_{i}_error"), &error.to_path())?;
            }
        }
        Ok(())
    }

    fn write_text_record(
        &mut self,
        name: &str,
        content: &str,
        comment: Option<&str>,
    ) -> SweepResult<()> {
        if self.arrays.contains_key(name) || self.text_records.iter().any(|r| r == name) {
            return Err(SweepError::DuplicateName {
                kind: "text record",
                name: name.to_string(),
            });
        }
        let group = self.group(DatasetCategory::Data.folder())?;
        let value: VarLenUnicode = content
            .parse()
            .map_err(|e| SweepError::Storage(format!("text record '{name}': {e}")))?;
        let dataset = group
            .new_dataset::<VarLenUnicode>()
            .shape(SimpleExtents::new(vec![Extent::fixed(1)]))
            .create(name)?;
        dataset.write(std::slice::from_ref(&value))?;
        write_int_attr(&dataset, "ds_type", i32::from(DatasetKind::Text.code()))?;
        if let Some(comment) = comment {
            write_str_attr(&dataset, "comment", comment)?;
        }
        self.text_records.push(name.to_string());
        Ok(())
    }

    fn add_comment(&mut self, text: &str) -> SweepResult<()> {
        self.file()?;
        self.comments.push(text.to_string());
        Ok(())
    }

    fn enable_live_tailing(&mut self) -> SweepResult<()> {
        // SWMR write mode is not exposed by the hdf5 crate; readers see flushed data.
        self.flush()?;
        tracing::debug!(path = %self.path.display(), "flushed for live tailing");
        Ok(())
    }

    fn read(&self, name: &str) -> SweepResult<ArrayD<f64>> {
        let array = self.array(name)?;
        let data = array.dataset.read_dyn::<f64>()?;
        if array.spec.rank() == 0 {
            return data
                .into_shape(IxDyn(&[]))
                .map_err(|e| SweepError::Storage(e.to_string()));
        }
        Ok(data)
    }

    fn flush(&mut self) -> SweepResult<()> {
        self.file()?.flush()?;
        Ok(())
    }

    fn close(&mut self) -> SweepResult<()> {
        let Some(file) = self.file.take() else {
            return Ok(());
        };
        let comment = self.comments.join("\n");
        write_str_attr(&file, "comment", &comment)?;
        file.flush()?;
        self.arrays.clear();
        drop(file);
        tracing::info!(path = %self.path.display(), "HDF5 file closed");
        Ok(())
    }
}
