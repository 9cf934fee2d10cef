//! Log output of runs, captured with `tracing-test`.

use anyhow::anyhow;
use std::sync::Arc;
use tracing_test::traced_test;

use rust_sweep::instrument::mock::MockSource;
use rust_sweep::prelude::*;

#[traced_test]
#[test]
fn setter_failure_is_logged_with_axis_and_value() {
    let ctx = RuntimeContext::in_memory();
    let source = Arc::new(MockSource::new("bias", "V").failing_at(0.5));
    let mut experiment = Experiment::new("logged", Sample::default());
    experiment
        .sweep(source.setter(), Axis::new("bias", vec![0.0, 0.5]).unwrap())
        .measure(ScalarMeasurement::new("i", || Ok(0.0)));

    assert!(experiment.run(&ctx, RunOptions::default()).is_err());
    assert!(logs_contain("Error setting sweep value"));
    assert!(logs_contain("axis=\"bias\""));
    assert!(logs_contain("value=0.5"));
    assert!(logs_contain("Experiment aborted"));
}

#[traced_test]
#[test]
fn measurement_failure_is_logged_with_position() {
    let ctx = RuntimeContext::in_memory();
    let source = Arc::new(MockSource::new("t", "s"));
    let mut experiment = Experiment::new("logged", Sample::default());
    experiment
        .sweep(source.setter(), Axis::new("t", vec![0.0, 1.0]).unwrap())
        .measure(ScalarMeasurement::new("sig", || Err(anyhow!("adc overflow"))));

    assert!(experiment.run(&ctx, RunOptions::default()).is_err());
    assert!(logs_contain("Measurement failed"));
    assert!(logs_contain("adc overflow"));
    assert!(logs_contain("position=[0]"));
}

#[traced_test]
#[test]
fn finished_run_logs_file_and_steps() {
    let ctx = RuntimeContext::in_memory();
    let source = Arc::new(MockSource::new("t", "s"));
    let mut experiment = Experiment::new("chatty", Sample::default());
    experiment
        .sweep(source.setter(), Axis::new("t", vec![0.0, 1.0, 2.0]).unwrap())
        .measure(ScalarMeasurement::new("sig", || Ok(1.0)));

    experiment.run(&ctx, RunOptions::default()).unwrap();
    assert!(logs_contain("Starting experiment"));
    assert!(logs_contain("sweep step"));
    assert!(logs_contain("total=3"));
    assert!(logs_contain("Experiment finished"));
}
