//! Run metadata stored next to the measured data.
//!
//! Two records travel with every measurement file:
//!
//! - **`Sample`**: what was measured. A name, a free-text comment and a flexible
//!   parameter map (`serde_json::Value`) for things like wafer id or cooldown.
//! - **`RunRecord`**: how and by whom it was measured. The record is written as the
//!   `measurement` text record so downstream tooling can index files without
//!   opening the data arrays.
//!
//! A `SampleBuilder` is provided for ergonomic construction of a `Sample`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::SweepConfig;
use crate::error::SweepResult;

/// Describes the device under test.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    /// Sample name.
    pub name: String,
    /// Free-text description.
    pub comment: String,
    /// User-defined sample parameters.
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl Default for Sample {
    fn default() -> Self {
        Self {
            name: "Arbitrary Sample".to_string(),
            comment: String::new(),
            parameters: BTreeMap::new(),
        }
    }
}

impl Sample {
    /// Validates the sample.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("Sample name cannot be empty.".to_string());
        }
        Ok(())
    }
}

/// A builder for constructing `Sample` instances.
#[derive(Default)]
pub struct SampleBuilder {
    inner: Sample,
}

impl SampleBuilder {
    /// Start from the default sample.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sample name.
    pub fn name(mut self, name: &str) -> Self {
        self.inner.name = name.to_string();
        self
    }

    /// Set the comment.
    pub fn comment(mut self, comment: &str) -> Self {
        self.inner.comment = comment.to_string();
        self
    }

    /// Add one parameter.
    pub fn parameter(mut self, key: &str, value: serde_json::Value) -> Self {
        self.inner.parameters.insert(key.to_string(), value);
        self
    }

    /// Finish.
    pub fn build(self) -> Sample {
        self.inner
    }
}

/// Index record of one measurement run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    /// Short upper-case identifier of the file.
    pub uuid: String,
    /// File path relative to the data directory.
    pub hdf_relpath: String,
    /// The measured sample.
    pub sample: Option<Sample>,
    /// Shown in web front-ends.
    pub web_visible: bool,
    /// Quality rating, 0 to 5.
    pub rating: u8,
    /// Set once an offline analysis has consumed the file.
    pub analyzed: bool,
    /// Kind of measurement (adapter names).
    pub measurement_type: String,
    /// Entry point that produced the file.
    pub measurement_func: String,
    /// Outermost swept axis.
    pub x_axis: String,
    /// Second swept axis.
    pub y_axis: String,
    /// Third swept axis.
    pub z_axis: String,
    /// Names of the registered instruments.
    pub instruments: Vec<String>,
    /// Operator.
    pub user: String,
    /// Campaign identifier.
    pub run_id: String,
    /// Version of the acquisition software.
    pub software_version: String,
}

impl RunRecord {
    /// Blank record with user and run id taken from `config`.
    pub fn new(config: &SweepConfig) -> Self {
        Self {
            uuid: String::new(),
            hdf_relpath: String::new(),
            sample: None,
            web_visible: true,
            rating: 3,
            analyzed: false,
            measurement_type: String::new(),
            measurement_func: String::new(),
            x_axis: String::new(),
            y_axis: String::new(),
            z_axis: String::new(),
            instruments: Vec::new(),
            user: config.normalized_user(),
            run_id: config.normalized_run_id(),
            software_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Fill `x_axis`, `y_axis`, `z_axis` from the swept axes, outermost first.
    pub fn with_swept_axes<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut names = names.into_iter();
        for slot in [&mut self.x_axis, &mut self.y_axis, &mut self.z_axis] {
            match names.next() {
                Some(name) => *slot = name.to_string(),
                None => break,
            }
        }
        self
    }

    /// Pretty JSON with sorted keys.
    pub fn to_json(&self) -> SweepResult<String> {
        let value = serde_json::to_value(self)?;
        Ok(serde_json::to_string_pretty(&value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_sets_fields() {
        let sample = SampleBuilder::new()
            .name("JJ-array-7")
            .comment("bonded on carrier B")
            .parameter("junctions", json!(120))
            .build();
        assert_eq!(sample.name, "JJ-array-7");
        assert_eq!(sample.parameters["junctions"], json!(120));
        sample.validate().unwrap();
    }

    #[test]
    fn empty_sample_name_is_invalid() {
        let sample = SampleBuilder::new().name(" ").build();
        assert!(sample.validate().is_err());
    }

    #[test]
    fn run_record_takes_normalised_identity() {
        let mut config = SweepConfig::default();
        config.application.user = "Grace Hopper".into();
        config.application.run_id = "run 3".into();
        let record = RunRecord::new(&config).with_swept_axes(["x", "y"]);
        assert_eq!(record.user, "Grace_Hopper");
        assert_eq!(record.run_id, "RUN_3");
        assert_eq!(record.x_axis, "x");
        assert_eq!(record.y_axis, "y");
        assert!(record.z_axis.is_empty());
        assert!(!record.analyzed);
        assert!(record.web_visible);
    }

    #[test]
    fn json_keys_are_sorted() {
        let json = RunRecord::new(&SweepConfig::default()).to_json().unwrap();
        let analyzed = json.find("\"analyzed\"").unwrap();
        let uuid = json.find("\"uuid\"").unwrap();
        assert!(analyzed < uuid);
    }
}
