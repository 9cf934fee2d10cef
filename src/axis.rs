//! Swept and measured axes.
//!
//! An [`Axis`] names one dimension of an experiment: the parameter a sweep walks
//! over, or a dimension a measurement produces on its own (for example the bias
//! values of an IV trace). Axes are immutable once built and are shared by value.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{SweepError, SweepResult};
use crate::storage::{ArrayHandle, Storage};

/// Unit used when none is given.
pub const DEFAULT_UNIT: &str = "a.u.";

/// One named dimension with a unit and an ordered set of values.
///
/// `range == None` marks an open-ended axis (e.g. a time series whose length is
/// only known once data arrives).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis {
    name: String,
    unit: String,
    range: Option<Vec<f64>>,
}

impl Axis {
    /// Create an axis over `range` with the default unit.
    ///
    /// Fails if the name is empty, a value is not finite, or a value repeats.
    pub fn new(name: impl Into<String>, range: impl Into<Vec<f64>>) -> SweepResult<Self> {
        let name = name.into();
        let range = range.into();
        validate_name(&name)?;
        validate_range(&name, &range)?;
        Ok(Self {
            name,
            unit: DEFAULT_UNIT.to_string(),
            range: Some(range),
        })
    }

    /// Create an open-ended axis.
    pub fn open_ended(name: impl Into<String>) -> SweepResult<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self {
            name,
            unit: DEFAULT_UNIT.to_string(),
            range: None,
        })
    }

    /// Evenly spaced axis including both end points.
    pub fn linspace(name: impl Into<String>, start: f64, stop: f64, num: usize) -> SweepResult<Self> {
        let values = match num {
            0 => Vec::new(),
            1 => vec![start],
            _ => {
                let step = (stop - start) / (num - 1) as f64;
                (0..num).map(|i| start + step * i as f64).collect()
            }
        };
        Self::new(name, values)
    }

    /// Set the unit of a freshly built axis.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Axis name, unique along any root-to-leaf path of an experiment.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Physical unit.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// The ordered values, or `None` for an open-ended axis.
    pub fn range(&self) -> Option<&[f64]> {
        self.range.as_deref()
    }

    /// Number of values, `None` when open-ended.
    pub fn len(&self) -> Option<usize> {
        self.range.as_ref().map(Vec::len)
    }

    /// True if the axis has a range with no values.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// True for axes without a fixed range.
    pub fn is_open_ended(&self) -> bool {
        self.range.is_none()
    }

    /// Return the coordinate array for this axis, creating and filling it on first use.
    ///
    /// Repeated calls hand back the existing coordinate without rewriting it.
    pub fn get_data_axis(&self, storage: &mut dyn Storage) -> SweepResult<ArrayHandle> {
        storage.create_coordinate(&self.name, &self.unit, self.range())
    }
}

/// `numpy.arange` semantics: values from `start` towards `stop` (exclusive) in `step`s.
///
/// A step whose sign does not point from `start` to `stop` yields an empty range.
pub fn arange(start: f64, stop: f64, step: f64) -> Vec<f64> {
    if step == 0.0 || !step.is_finite() {
        return Vec::new();
    }
    let count = ((stop - start) / step).ceil();
    if !count.is_finite() || count <= 0.0 {
        return Vec::new();
    }
    (0..count as usize).map(|i| start + step * i as f64).collect()
}

fn validate_name(name: &str) -> SweepResult<()> {
    if name.trim().is_empty() {
        return Err(SweepError::InvalidAxis {
            name: name.to_string(),
            reason: "name must not be empty".to_string(),
        });
    }
    Ok(())
}

fn validate_range(name: &str, range: &[f64]) -> SweepResult<()> {
    if let Some(bad) = range.iter().find(|v| !v.is_finite()) {
        return Err(SweepError::InvalidAxis {
            name: name.to_string(),
            reason: format!("value {bad} is not finite"),
        });
    }
    let mut sorted = range.to_vec();
    sorted.sort_by(f64::total_cmp);
    if let Some(pair) = sorted.windows(2).find(|w| w[0] == w[1]) {
        return Err(SweepError::InvalidAxis {
            name: name.to_string(),
            reason: format!("value {} appears more than once", pair[0]),
        });
    }
    Ok(())
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.range() {
            Some(values) if !values.is_empty() => {
                let low = values.iter().copied().fold(f64::INFINITY, f64::min);
                let high = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                write!(
                    f,
                    "{}=({} {unit} to {} {unit} in {} steps)",
                    self.name,
                    low,
                    high,
                    values.len(),
                    unit = self.unit
                )
            }
            Some(_) => write!(f, "{}=(empty)", self.name),
            None => write!(f, "{}=(open-ended, {})", self.name, self.unit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::{MemoryStorage, StorageEvent};

    #[test]
    fn rejects_empty_name() {
        assert!(matches!(
            Axis::new("  ", vec![1.0]),
            Err(SweepError::InvalidAxis { .. })
        ));
    }

    #[test]
    fn rejects_repeated_values() {
        let err = Axis::new("x", vec![0.0, 1.0, 0.0]).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn rejects_nan() {
        assert!(Axis::new("x", vec![0.0, f64::NAN]).is_err());
    }

    #[test]
    fn unordered_unique_values_are_fine() {
        let axis = Axis::new("x", vec![2.0, 0.0, 1.0]).unwrap();
        assert_eq!(axis.len(), Some(3));
    }

    #[test]
    fn display_summarises_range() {
        let axis = Axis::new("x", vec![0.0, 0.5, 1.0]).unwrap().with_unit("V");
        assert_eq!(axis.to_string(), "x=(0 V to 1 V in 3 steps)");
    }

    #[test]
    fn linspace_includes_end_points() {
        let axis = Axis::linspace("f", 1.0, 2.0, 5).unwrap();
        assert_eq!(axis.range().unwrap(), &[1.0, 1.25, 1.5, 1.75, 2.0]);
    }

    #[test]
    fn arange_matches_numpy() {
        assert_eq!(arange(0.0, 1.0, 0.25), vec![0.0, 0.25, 0.5, 0.75]);
        assert_eq!(arange(1.0, 0.0, -0.5), vec![1.0, 0.5]);
        assert!(arange(0.0, 1.0, -0.5).is_empty());
    }

    #[test]
    fn get_data_axis_is_idempotent() {
        let mut storage = MemoryStorage::new("axis_test");
        let axis = Axis::new("x", vec![0.0, 1.0, 2.0]).unwrap().with_unit("V");

        let first = axis.get_data_axis(&mut storage).unwrap();
        let second = axis.get_data_axis(&mut storage).unwrap();
        assert_eq!(first, second);

        let created = storage
            .events()
            .iter()
            .filter(|e| matches!(e, StorageEvent::CoordinateCreated { name } if name == "x"))
            .count();
        assert_eq!(created, 1);
        assert_eq!(storage.read("x").unwrap().as_slice().unwrap(), &[0.0, 1.0, 2.0]);
    }
}
