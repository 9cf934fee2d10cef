//! Transport (IV / VI) measurements on a source-meter.
//!
//! Every added sweep becomes a pair of datasets: the applied bias
//! (`i_<k>` or `v_<k>`) and the sensed quantity (`v_<k>` or `i_<k>`), both
//! over a per-sweep bias axis `<bias>_b_<k>`. One measurement cycle runs all
//! sweeps back to back on the device.

use anyhow::Result;
use serde_json::json;
use std::sync::Arc;

use super::MeasurementTypeAdapter;
use crate::axis::{arange, Axis};
use crate::data::{DataDescriptor, GeneratedData};
use crate::error::{SweepError, SweepResult};
use crate::experiment::context::RuntimeContext;
use crate::instrument::IvDevice;
use crate::view::{DataReference, DataView, DataViewSet, ViewMap};

pub use crate::instrument::MeasureMode;

#[derive(Debug, Clone, Copy, PartialEq)]
struct BiasSweep {
    start: f64,
    stop: f64,
    step: f64,
}

/// IV or VI curves taken through an [`IvDevice`].
pub struct TransportMeasurement {
    device: Arc<dyn IvDevice>,
    mode: MeasureMode,
    sleep: f64,
    extend_range: bool,
    sweeps: Vec<BiasSweep>,
    descriptors: Vec<(DataDescriptor, DataDescriptor)>,
}

impl TransportMeasurement {
    /// Measurement in `mode`. The device must be configured for the same bias.
    pub fn new(device: Arc<dyn IvDevice>, mode: MeasureMode) -> SweepResult<Self> {
        let configured = device.sweep_bias();
        if configured != mode {
            return Err(SweepError::Configuration(format!(
                "device '{}' sweeps in {:?} mode, measurement requested {:?}",
                device.name(),
                configured,
                mode
            )));
        }
        Ok(Self {
            device,
            mode,
            sleep: 0.0,
            extend_range: false,
            sweeps: Vec::new(),
            descriptors: Vec::new(),
        })
    }

    /// Settling time in seconds, passed to the device and waited after every sweep.
    pub fn with_sleep(mut self, seconds: f64) -> Self {
        self.sleep = seconds.max(0.0);
        self
    }

    /// Include the stop value in the bias axes.
    pub fn with_extend_range(mut self, extend: bool) -> SweepResult<Self> {
        self.extend_range = extend;
        self.descriptors = self
            .sweeps
            .iter()
            .enumerate()
            .map(|(k, sweep)| self.descriptor_pair(k, sweep))
            .collect::<SweepResult<_>>()?;
        Ok(self)
    }

    /// Bias mode.
    pub fn mode(&self) -> MeasureMode {
        self.mode
    }

    /// Add one bias sweep from `start` to `stop` in steps of `step`.
    ///
    /// The sign of `step` is taken from the sweep direction.
    pub fn add_sweep(&mut self, start: f64, stop: f64, step: f64) -> SweepResult<&mut Self> {
        if !(start.is_finite() && stop.is_finite() && step.is_finite()) || step == 0.0 {
            return Err(SweepError::Configuration(format!(
                "invalid bias sweep ({start}, {stop}, {step})"
            )));
        }
        let step = if stop >= start { step.abs() } else { -step.abs() };
        let sweep = BiasSweep { start, stop, step };
        let pair = self.descriptor_pair(self.sweeps.len(), &sweep)?;
        self.sweeps.push(sweep);
        self.descriptors.push(pair);
        Ok(self)
    }

    /// Four sweeps: start to stop, stop to start, start to -stop, -stop to start, all shifted by `offset`.
    pub fn add_4_quadrant_sweep(
        &mut self,
        start: f64,
        stop: f64,
        step: f64,
        offset: f64,
    ) -> SweepResult<&mut Self> {
        self.add_sweep(start + offset, stop + offset, step)?;
        self.add_sweep(stop + offset, start + offset, step)?;
        self.add_sweep(start + offset, -stop + offset, step)?;
        self.add_sweep(-stop + offset, start + offset, step)
    }

    /// Two sweeps: amplitude to -amplitude and back, shifted by `offset`.
    pub fn add_half_swing_sweep(
        &mut self,
        amplitude: f64,
        step: f64,
        offset: f64,
    ) -> SweepResult<&mut Self> {
        self.add_sweep(amplitude + offset, -amplitude + offset, step)?;
        self.add_sweep(-amplitude + offset, amplitude + offset, step)
    }

    /// (bias, measured) descriptor pairs, one per sweep.
    pub fn descriptor_pairs(&self) -> &[(DataDescriptor, DataDescriptor)] {
        &self.descriptors
    }

    fn effective_stop(&self, sweep: &BiasSweep) -> f64 {
        if self.extend_range {
            sweep.stop + sweep.step / 2.0
        } else {
            sweep.stop
        }
    }

    fn descriptor_pair(
        &self,
        k: usize,
        sweep: &BiasSweep,
    ) -> SweepResult<(DataDescriptor, DataDescriptor)> {
        let values = arange(sweep.start, self.effective_stop(sweep), sweep.step);
        if values.is_empty() {
            return Err(SweepError::Configuration(format!(
                "bias sweep {k} ({}, {}, {}) has no points",
                sweep.start, sweep.stop, sweep.step
            )));
        }
        let axis = Axis::new(format!("{}_b_{k}", self.mode.bias_symbol()), values)?
            .with_unit(self.mode.bias_unit());
        Ok((
            DataDescriptor::new(format!("{}_{k}", self.mode.bias_symbol()), vec![axis.clone()])
                .with_unit(self.mode.bias_unit()),
            DataDescriptor::new(format!("{}_{k}", self.mode.measure_symbol()), vec![axis])
                .with_unit(self.mode.measure_unit()),
        ))
    }

    fn view(&self, labels: [&str; 2], current_on_x: bool) -> DataView {
        let sets = self
            .descriptors
            .iter()
            .map(|(bias, measured)| {
                let (b, m) = (DataReference::from(bias), DataReference::from(measured));
                let bias_is_current = self.mode == MeasureMode::IV;
                if bias_is_current == current_on_x {
                    DataViewSet::new(b, m)
                } else {
                    DataViewSet::new(m, b)
                }
            })
            .collect();
        DataView::new(sets).with_params(json!({
            "labels": labels,
            "plot_style": 1,
            "markersize": 5
        }))
    }
}

impl MeasurementTypeAdapter for TransportMeasurement {
    fn name(&self) -> String {
        format!("TransportMeasurement({:?})", self.mode)
    }

    fn expected_structure(&self) -> Vec<DataDescriptor> {
        self.descriptors
            .iter()
            .flat_map(|(b, m)| [b.clone(), m.clone()])
            .collect()
    }

    /// `IV` puts voltage on x, `VI` puts current on x.
    fn default_views(&self) -> ViewMap {
        ViewMap::from([
            ("IV".to_string(), self.view(["V", "I"], false)),
            ("VI".to_string(), self.view(["I", "V"], true)),
        ])
    }

    fn perform_measurement(&mut self, ctx: &RuntimeContext) -> Result<Vec<GeneratedData>> {
        let mut results = Vec::with_capacity(self.descriptors.len() * 2);
        for ((bias, measured), sweep) in self.descriptors.iter().zip(&self.sweeps) {
            let (bias_data, measured_data) =
                self.device
                    .take_iv(sweep.start, self.effective_stop(sweep), sweep.step, self.sleep)?;
            results.push(bias.with_data(bias_data)?);
            results.push(measured.with_data(measured_data)?);
            ctx.sleep(self.sleep);
        }
        Ok(results)
    }
}
