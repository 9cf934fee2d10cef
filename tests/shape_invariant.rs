//! Property tests for `DataDescriptor::with_data`.

use ndarray::{ArrayD, IxDyn};
use proptest::prelude::*;

use rust_sweep::prelude::*;

fn descriptor(lengths: &[usize]) -> DataDescriptor {
    let axes = lengths
        .iter()
        .enumerate()
        .map(|(i, n)| Axis::linspace(format!("ax{i}"), 0.0, 1.0, *n).unwrap())
        .collect();
    DataDescriptor::new("d", axes)
}

proptest! {
    #[test]
    fn matching_shape_round_trips(lengths in prop::collection::vec(1usize..5, 0..4), seed in -1e3f64..1e3) {
        let d = descriptor(&lengths);
        let count: usize = lengths.iter().product();
        let values: Vec<f64> = (0..count).map(|i| seed + i as f64).collect();
        let array = ArrayD::from_shape_vec(IxDyn(&lengths), values).unwrap();
        let generated = d.with_data(array.clone()).unwrap();
        prop_assert_eq!(generated.data(), &array);
    }

    #[test]
    fn other_shapes_are_rejected(
        lengths in prop::collection::vec(1usize..5, 0..4),
        actual in prop::collection::vec(1usize..5, 0..4),
    ) {
        prop_assume!(lengths != actual);
        let d = descriptor(&lengths);
        let array = ArrayD::<f64>::zeros(IxDyn(&actual));
        let is_shape_mismatch = matches!(d.with_data(array), Err(SweepError::ShapeMismatch { .. }));
        prop_assert!(is_shape_mismatch);
    }
}
