//! The simplest adapter: one named value read through a getter.

use anyhow::Result;

use super::MeasurementTypeAdapter;
use crate::data::{DataDescriptor, GeneratedData};
use crate::experiment::context::RuntimeContext;

/// Getter callback of a [`ScalarMeasurement`].
pub type Getter = Box<dyn FnMut() -> Result<f64> + Send>;

/// Reads a single value per measurement cycle.
pub struct ScalarMeasurement {
    descriptor: DataDescriptor,
    getter: Getter,
}

impl ScalarMeasurement {
    /// Scalar named `name` with the default unit.
    pub fn new(name: &str, getter: impl FnMut() -> Result<f64> + Send + 'static) -> Self {
        Self {
            descriptor: DataDescriptor::scalar(name),
            getter: Box::new(getter),
        }
    }

    /// Set the unit.
    pub fn with_unit(mut self, unit: &str) -> Self {
        self.descriptor = self.descriptor.with_unit(unit);
        self
    }
}

impl MeasurementTypeAdapter for ScalarMeasurement {
    fn name(&self) -> String {
        format!("ScalarMeasurement({})", self.descriptor.name())
    }

    fn expected_structure(&self) -> Vec<DataDescriptor> {
        vec![self.descriptor.clone()]
    }

    fn perform_measurement(&mut self, _ctx: &RuntimeContext) -> Result<Vec<GeneratedData>> {
        let value = (self.getter)()?;
        Ok(vec![self.descriptor.with_data(value)?])
    }
}
