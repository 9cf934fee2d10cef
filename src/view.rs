//! Declarative plot views over named datasets.
//!
//! Views are registered in the file next to the data so a viewer can offer
//! convenient (x, y) plots straight away. The engine itself never reads them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::data::{DataDescriptor, DatasetCategory};

/// Named views, ordered by name.
pub type ViewMap = BTreeMap<String, DataView>;

/// Points at one dataset in the file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataReference {
    name: String,
    category: DatasetCategory,
}

impl DataReference {
    /// Reference into the measurement data group.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: DatasetCategory::Data,
        }
    }

    /// Reference into the analysis group.
    pub fn analysis(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            category: DatasetCategory::Analysis,
        }
    }

    /// Dataset name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Group the dataset lives in.
    pub fn category(&self) -> DatasetCategory {
        self.category
    }

    /// Absolute path of the dataset inside the file.
    pub fn to_path(&self) -> String {
        format!("/entry/{}/{}", self.category.folder(), self.name)
    }
}

impl From<&DataDescriptor> for DataReference {
    fn from(descriptor: &DataDescriptor) -> Self {
        Self::new(descriptor.name())
    }
}

/// One overlay of a view: y plotted against x, with optional filter and error datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataViewSet {
    /// Abscissa.
    pub x: DataReference,
    /// Ordinate.
    pub y: DataReference,
    /// Optional dataset used to mask points.
    pub filter: Option<DataReference>,
    /// Optional error bars.
    pub error: Option<DataReference>,
}

impl DataViewSet {
    /// Plain (x, y) overlay.
    pub fn new(x: DataReference, y: DataReference) -> Self {
        Self {
            x,
            y,
            filter: None,
            error: None,
        }
    }

    /// Attach a filter dataset.
    pub fn with_filter(mut self, filter: DataReference) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Attach an error dataset.
    pub fn with_error(mut self, error: DataReference) -> Self {
        self.error = Some(error);
        self
    }

    /// `x_path:y_path`, the pairing string viewers expect.
    pub fn xy(&self) -> String {
        format!("{}:{}", self.x.to_path(), self.y.to_path())
    }

    /// Every dataset this overlay touches.
    pub fn references(&self) -> impl Iterator<Item = &DataReference> {
        [Some(&self.x), Some(&self.y), self.filter.as_ref(), self.error.as_ref()]
            .into_iter()
            .flatten()
    }
}

/// How a viewer should render a view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewType {
    /// Line plot.
    #[default]
    OneD,
    /// Line plot of a vector slice.
    OneDV,
    /// Color map.
    TwoD,
    /// Box slice.
    ThreeD,
    /// Table.
    Table,
    /// Plain text.
    Text,
}

impl ViewType {
    /// Numeric code stored in the file.
    pub fn code(self) -> u8 {
        match self {
            ViewType::OneD => 0,
            ViewType::OneDV => 1,
            ViewType::TwoD => 2,
            ViewType::ThreeD => 3,
            ViewType::Table => 4,
            ViewType::Text => 5,
        }
    }
}

/// A view: render settings plus one or more overlays shown in the same plot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataView {
    /// Render type.
    pub view_type: ViewType,
    /// Free-form render parameters (labels, marker size, ...).
    pub view_params: serde_json::Value,
    /// Overlays.
    pub view_sets: Vec<DataViewSet>,
}

impl DataView {
    /// Line view over the given overlays.
    pub fn new(view_sets: Vec<DataViewSet>) -> Self {
        Self {
            view_type: ViewType::OneD,
            view_params: serde_json::Value::Object(Default::default()),
            view_sets,
        }
    }

    /// Replace the render parameters.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.view_params = params;
        self
    }

    /// Change the render type.
    pub fn with_view_type(mut self, view_type: ViewType) -> Self {
        self.view_type = view_type;
        self
    }

    /// Number of overlays.
    pub fn overlays(&self) -> usize {
        self.view_sets.len()
    }

    /// Every dataset referenced by any overlay.
    pub fn references(&self) -> impl Iterator<Item = &DataReference> {
        self.view_sets.iter().flat_map(DataViewSet::references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reference_paths_follow_category() {
        assert_eq!(DataReference::new("v_0").to_path(), "/entry/data0/v_0");
        assert_eq!(
            DataReference::analysis("dv_0_di_0").to_path(),
            "/entry/analysis0/dv_0_di_0"
        );
    }

    #[test]
    fn view_set_pairs_paths() {
        let set = DataViewSet::new(DataReference::new("i_0"), DataReference::new("v_0"));
        assert_eq!(set.xy(), "/entry/data0/i_0:/entry/data0/v_0");
    }

    #[test]
    fn references_include_optional_datasets() {
        let view = DataView::new(vec![
            DataViewSet::new(DataReference::new("i_0"), DataReference::new("v_0"))
                .with_error(DataReference::new("v_err")),
            DataViewSet::new(DataReference::new("i_1"), DataReference::new("v_1")),
        ])
        .with_params(json!({"labels": ["V", "I"], "markersize": 5}));
        let names: Vec<&str> = view.references().map(DataReference::name).collect();
        assert_eq!(names, vec!["i_0", "v_0", "v_err", "i_1", "v_1"]);
        assert_eq!(view.overlays(), 2);
    }
}
