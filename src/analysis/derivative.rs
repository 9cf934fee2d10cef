//! Numerical derivative of one measured quantity with respect to another.
//!
//! For every selected `(x, y)` pair of rank-1 descriptors over the same axis
//! the analysis declares `d<y>_d<x>` with unit `<y.unit>/<x.unit>` and fills it
//! with a gradient evaluated on the possibly non-uniform x values: second-order
//! central differences inside, first-order one-sided differences at both ends.

use anyhow::{anyhow, bail, Result};

use super::AnalysisTypeAdapter;
use crate::data::{DataDescriptor, GeneratedData};
use crate::view::{DataReference, DataView, DataViewSet, ViewMap};

#[derive(Debug, Clone, PartialEq)]
enum Pairs {
    /// Descriptors (0, 1), (2, 3), ... of the parent schema.
    Consecutive,
    /// Named `(x, y)` pairs.
    Named(Vec<(String, String)>),
}

/// dY/dX for pairs of measured datasets.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericalDerivative {
    pairs: Pairs,
}

impl Default for NumericalDerivative {
    fn default() -> Self {
        Self::new()
    }
}

impl NumericalDerivative {
    /// Pair the parent schema two by two, as transport measurements lay it out.
    pub fn new() -> Self {
        Self {
            pairs: Pairs::Consecutive,
        }
    }

    /// Differentiate `y` with respect to `x`. Replaces the consecutive pairing.
    pub fn pair(mut self, x: &str, y: &str) -> Self {
        let pair = (x.to_string(), y.to_string());
        match &mut self.pairs {
            Pairs::Named(pairs) => pairs.push(pair),
            Pairs::Consecutive => self.pairs = Pairs::Named(vec![pair]),
        }
        self
    }

    fn select<'a, T>(
        &self,
        items: &'a [T],
        descriptor: impl Fn(&T) -> &DataDescriptor,
    ) -> Vec<(&'a T, &'a T)> {
        let candidates: Vec<(&T, &T)> = match &self.pairs {
            Pairs::Consecutive => items.chunks_exact(2).map(|c| (&c[0], &c[1])).collect(),
            Pairs::Named(names) => names
                .iter()
                .filter_map(|(x, y)| {
                    let find = |name: &str| items.iter().find(|i| descriptor(*i).name() == name);
                    Some((find(x)?, find(y)?))
                })
                .collect(),
        };
        candidates
            .into_iter()
            .filter(|&(x, y)| {
                let (x, y) = (descriptor(x), descriptor(y));
                y.rank() == 1 && x.axes() == y.axes()
            })
            .collect()
    }

    fn derived(x: &DataDescriptor, y: &DataDescriptor) -> DataDescriptor {
        DataDescriptor::new(format!("d{}_d{}", y.name(), x.name()), y.axes().to_vec())
            .with_unit(format!("{}/{}", y.unit(), x.unit()))
    }
}

impl AnalysisTypeAdapter for NumericalDerivative {
    fn name(&self) -> String {
        "NumericalDerivative".to_string()
    }

    fn expected_structure(&self, parent_schema: &[DataDescriptor]) -> Vec<DataDescriptor> {
        self.select(parent_schema, |d| d)
            .into_iter()
            .map(|(x, y)| Self::derived(x, y))
            .collect()
    }

    fn default_views(&self, parent_schema: &[DataDescriptor]) -> ViewMap {
        self.select(parent_schema, |d| d)
            .into_iter()
            .map(|(x, y)| {
                let derived = Self::derived(x, y);
                let view = DataView::new(vec![DataViewSet::new(
                    DataReference::from(x),
                    DataReference::analysis(derived.name()),
                )]);
                (derived.name().to_string(), view)
            })
            .collect()
    }

    fn perform_analysis(&mut self, measured: &[GeneratedData]) -> Result<Vec<GeneratedData>> {
        self.select(measured, GeneratedData::descriptor)
            .into_iter()
            .map(|(x, y)| {
                let xs: Vec<f64> = x.data().iter().copied().collect();
                let ys: Vec<f64> = y.data().iter().copied().collect();
                let slope = gradient(&ys, &xs)
                    .map_err(|e| anyhow!("d{}/d{}: {e}", y.name(), x.name()))?;
                Ok(Self::derived(x.descriptor(), y.descriptor()).with_data(slope)?)
            })
            .collect()
    }
}

/// Gradient of `y` over sample points `x`.
pub fn gradient(y: &[f64], x: &[f64]) -> Result<Vec<f64>> {
    if y.len() != x.len() {
        bail!("{} values over {} sample points", y.len(), x.len());
    }
    let n = y.len();
    if n < 2 {
        bail!("at least two points are needed, got {n}");
    }
    let mut out = vec![0.0; n];
    out[0] = (y[1] - y[0]) / (x[1] - x[0]);
    out[n - 1] = (y[n - 1] - y[n - 2]) / (x[n - 1] - x[n - 2]);
    for i in 1..n - 1 {
        let dx1 = x[i] - x[i - 1];
        let dx2 = x[i + 1] - x[i];
        let a = -dx2 / (dx1 * (dx1 + dx2));
        let b = (dx2 - dx1) / (dx1 * dx2);
        let c = dx1 / (dx2 * (dx1 + dx2));
        out[i] = a * y[i - 1] + b * y[i] + c * y[i + 1];
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::axis::Axis;

    fn schema() -> Vec<DataDescriptor> {
        let axis = Axis::new("i_b_0", vec![0.0, 1.0, 2.0, 3.0]).unwrap().with_unit("A");
        vec![
            DataDescriptor::new("i_0", vec![axis.clone()]).with_unit("A"),
            DataDescriptor::new("v_0", vec![axis]).with_unit("V"),
        ]
    }

    #[test]
    fn gradient_matches_central_differences() {
        let g = gradient(&[0.0, 1.0, 4.0, 9.0], &[0.0, 1.0, 2.0, 3.0]).unwrap();
        assert_eq!(g, vec![1.0, 2.0, 4.0, 5.0]);
    }

    #[test]
    fn gradient_handles_uneven_spacing() {
        let x = [0.0, 1.0, 3.0];
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        let g = gradient(&y, &x).unwrap();
        for slope in g {
            assert!((slope - 2.0).abs() < 1e-12);
        }
    }

    #[test]
    fn gradient_edges_are_one_sided_differences() {
        let x = [0.0, 1.0, 3.0];
        let y: Vec<f64> = x.iter().map(|v| v * v).collect();
        let g = gradient(&y, &x).unwrap();
        assert!((g[1] - 2.0).abs() < 1e-12);
        assert_eq!(g[0], 1.0);
        assert_eq!(g[2], 4.0);
    }

    #[test]
    fn gradient_needs_two_points() {
        assert!(gradient(&[1.0], &[0.0]).is_err());
    }

    #[test]
    fn declares_resistance_like_quantity() {
        let declared = NumericalDerivative::new().expected_structure(&schema());
        assert_eq!(declared.len(), 1);
        assert_eq!(declared[0].name(), "dv_0_di_0");
        assert_eq!(declared[0].unit(), "V/A");
        assert_eq!(declared[0].rank(), 1);
    }

    #[test]
    fn named_pairs_skip_unknown_names() {
        let d = NumericalDerivative::new().pair("i_0", "v_0").pair("i_9", "v_9");
        assert_eq!(d.expected_structure(&schema()).len(), 1);
    }

    #[test]
    fn analysis_produces_declared_shape() {
        let schema = schema();
        let measured = vec![
            schema[0].with_data(vec![0.0, 1.0, 2.0, 3.0]).unwrap(),
            schema[1].with_data(vec![0.0, 10.0, 20.0, 30.0]).unwrap(),
        ];
        let out = NumericalDerivative::new().perform_analysis(&measured).unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].data().iter().all(|r| (r - 10.0).abs() < 1e-12));
    }
}
