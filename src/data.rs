//! Schema and values of measured quantities.
//!
//! A [`DataDescriptor`] declares one named quantity together with the axes the
//! measurement produces on its own. Swept axes are never part of a descriptor;
//! they are prepended when the dataset is created inside a sweep tree.
//! [`GeneratedData`] pairs a descriptor with values and can only be built through
//! [`DataDescriptor::with_data`], which enforces the shape contract.

use ndarray::{arr0, Array, Array1, ArrayD, Dimension};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::axis::{Axis, DEFAULT_UNIT};
use crate::error::{SweepError, SweepResult};
use crate::storage::{ArrayHandle, ArraySpec, Storage, MAX_STORAGE_RANK};

/// Group a dataset is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatasetCategory {
    /// Raw measurement results.
    #[default]
    Data,
    /// Quantities derived by analysis adapters.
    Analysis,
}

impl DatasetCategory {
    /// Name of the group inside the file.
    pub fn folder(self) -> &'static str {
        match self {
            DatasetCategory::Data => "data0",
            DatasetCategory::Analysis => "analysis0",
        }
    }
}

/// Declares one named quantity and its measurement-owned axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataDescriptor {
    name: String,
    unit: String,
    axes: Vec<Axis>,
}

impl DataDescriptor {
    /// Descriptor over the given measurement-owned axes (outermost first).
    pub fn new(name: impl Into<String>, axes: Vec<Axis>) -> Self {
        Self {
            name: name.into(),
            unit: DEFAULT_UNIT.to_string(),
            axes,
        }
    }

    /// Descriptor of a single value (rank 0).
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Dataset name, unique within one experiment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical unit of the values.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Measurement-owned axes.
    pub fn axes(&self) -> &[Axis] {
        &self.axes
    }

    /// Number of measurement-owned dimensions.
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    /// Expected data shape; `None` marks an open-ended dimension.
    pub fn expected_shape(&self) -> Vec<Option<usize>> {
        self.axes.iter().map(Axis::len).collect()
    }

    /// Wrap raw values, checking them against the declared axes.
    pub fn with_data(&self, values: impl IntoData) -> SweepResult<GeneratedData> {
        let data = values.into_data();
        let expected = self.expected_shape();
        let matches = data.ndim() == expected.len()
            && data
                .shape()
                .iter()
                .zip(&expected)
                .all(|(actual, expected)| expected.map_or(true, |len| len == *actual));
        if !matches {
            return Err(SweepError::ShapeMismatch {
                name: self.name.clone(),
                expected,
                actual: data.shape().to_vec(),
            });
        }
        Ok(GeneratedData {
            descriptor: self.clone(),
            data,
        })
    }

    /// Check the descriptor on its own: only the innermost axis may be open-ended.
    pub fn validate(&self) -> SweepResult<()> {
        let last = self.axes.len().saturating_sub(1);
        if let Some((_, axis)) = self
            .axes
            .iter()
            .enumerate()
            .find(|(i, axis)| axis.is_open_ended() && *i != last)
        {
            return Err(SweepError::InvalidAxis {
                name: axis.name().to_string(),
                reason: format!(
                    "open-ended axes must be the innermost axis of '{}'",
                    self.name
                ),
            });
        }
        Ok(())
    }

    /// Rank this descriptor occupies in storage below `depth` sweep levels.
    pub fn effective_rank(&self, depth: usize) -> usize {
        depth + self.rank()
    }

    /// Create the growable array for this quantity below the given sweep axes.
    ///
    /// Ancestor axes become the outer dimensions, the descriptor's own axes the
    /// inner ones. Coordinates for every axis are created on the way.
    pub fn create_dataset(
        &self,
        storage: &mut dyn Storage,
        ancestor_axes: &[Axis],
        category: DatasetCategory,
    ) -> SweepResult<ArrayHandle> {
        self.validate()?;
        let rank = self.effective_rank(ancestor_axes.len());
        if rank > MAX_STORAGE_RANK {
            return Err(SweepError::UnsupportedRank {
                name: self.name.clone(),
                depth: ancestor_axes.len(),
                rank,
            });
        }

        let mut axes = Vec::with_capacity(rank);
        let mut shape = Vec::with_capacity(rank);
        for axis in ancestor_axes.iter().chain(&self.axes) {
            axis.get_data_axis(storage)?;
            axes.push(axis.name().to_string());
            shape.push(axis.len());
        }

        storage.create_array(&ArraySpec {
            name: self.name.clone(),
            unit: self.unit.clone(),
            category,
            axes,
            shape,
        })
    }
}

impl fmt::Display for DataDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.unit)?;
        if !self.axes.is_empty() {
            let names: Vec<&str> = self.axes.iter().map(Axis::name).collect();
            write!(f, " over ({})", names.join(", "))?;
        }
        Ok(())
    }
}

/// Values for one descriptor, shape-checked at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedData {
    descriptor: DataDescriptor,
    data: ArrayD<f64>,
}

impl GeneratedData {
    /// The schema these values belong to.
    pub fn descriptor(&self) -> &DataDescriptor {
        &self.descriptor
    }

    /// The values.
    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    /// Shortcut for the descriptor name.
    pub fn name(&self) -> &str {
        self.descriptor.name()
    }

    /// Consume into the raw array.
    pub fn into_data(self) -> ArrayD<f64> {
        self.data
    }
}

/// Raw array-likes accepted by [`DataDescriptor::with_data`].
pub trait IntoData {
    /// Convert into a dynamic-rank array.
    fn into_data(self) -> ArrayD<f64>;
}

impl IntoData for f64 {
    fn into_data(self) -> ArrayD<f64> {
        arr0(self).into_dyn()
    }
}

impl IntoData for Vec<f64> {
    fn into_data(self) -> ArrayD<f64> {
        Array1::from(self).into_dyn()
    }
}

impl IntoData for &[f64] {
    fn into_data(self) -> ArrayD<f64> {
        Array1::from(self.to_vec()).into_dyn()
    }
}

impl<D: Dimension> IntoData for Array<f64, D> {
    fn into_data(self) -> ArrayD<f64> {
        self.into_dyn()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStorage;
    use ndarray::array;

    fn bias_axis(n: usize) -> Axis {
        Axis::linspace("i_b_0", 0.0, 1.0, n).unwrap().with_unit("A")
    }

    #[test]
    fn scalar_accepts_float() {
        let d = DataDescriptor::scalar("y");
        let data = d.with_data(4.0).unwrap();
        assert_eq!(data.data().ndim(), 0);
        assert_eq!(data.data().first(), Some(&4.0));
    }

    #[test]
    fn scalar_rejects_vector() {
        let d = DataDescriptor::scalar("y");
        assert!(matches!(
            d.with_data(vec![1.0, 2.0]),
            Err(SweepError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn vector_length_must_match_axis() {
        let d = DataDescriptor::new("v_0", vec![bias_axis(3)]);
        assert!(d.with_data(vec![1.0, 2.0, 3.0]).is_ok());
        let err = d.with_data(vec![1.0, 2.0]).unwrap_err();
        assert!(err.to_string().contains("v_0"));
    }

    #[test]
    fn matrix_shape_checked() {
        let d = DataDescriptor::new(
            "map",
            vec![
                Axis::linspace("a", 0.0, 1.0, 2).unwrap(),
                Axis::linspace("b", 0.0, 1.0, 3).unwrap(),
            ],
        );
        assert!(d.with_data(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]).is_ok());
        assert!(d.with_data(array![[1.0, 2.0], [4.0, 5.0], [7.0, 8.0]]).is_err());
    }

    #[test]
    fn open_ended_axis_accepts_any_length() {
        let d = DataDescriptor::new("trace", vec![Axis::open_ended("t").unwrap()]);
        assert!(d.with_data(vec![1.0; 7]).is_ok());
        assert!(d.with_data(vec![1.0; 2]).is_ok());
    }

    #[test]
    fn open_ended_axis_must_be_innermost() {
        let d = DataDescriptor::new(
            "bad",
            vec![Axis::open_ended("t").unwrap(), bias_axis(2)],
        );
        assert!(matches!(d.validate(), Err(SweepError::InvalidAxis { .. })));
    }

    #[test]
    fn create_dataset_prepends_ancestor_axes() {
        let mut storage = MemoryStorage::new("ds_test");
        let outer = Axis::linspace("x", 0.0, 1.0, 4).unwrap();
        let d = DataDescriptor::new("v_0", vec![bias_axis(3)]).with_unit("V");
        d.create_dataset(&mut storage, &[outer], DatasetCategory::Data)
            .unwrap();

        let spec = storage.spec("v_0").unwrap();
        assert_eq!(spec.axes, vec!["x".to_string(), "i_b_0".to_string()]);
        assert_eq!(spec.shape, vec![Some(4), Some(3)]);
        assert_eq!(spec.unit, "V");
        assert!(storage.spec("x").is_some());
        assert!(storage.spec("i_b_0").is_some());
    }

    #[test]
    fn create_dataset_rejects_rank_four() {
        let mut storage = MemoryStorage::new("rank_test");
        let ancestors = [
            Axis::linspace("x", 0.0, 1.0, 2).unwrap(),
            Axis::linspace("y", 0.0, 1.0, 2).unwrap(),
        ];
        let d = DataDescriptor::new(
            "img",
            vec![
                Axis::linspace("a", 0.0, 1.0, 2).unwrap(),
                Axis::linspace("b", 0.0, 1.0, 2).unwrap(),
            ],
        );
        let err = d
            .create_dataset(&mut storage, &ancestors, DatasetCategory::Data)
            .unwrap_err();
        assert!(matches!(err, SweepError::UnsupportedRank { rank: 4, .. }));
        assert!(storage.spec("img").is_none());
    }
}
