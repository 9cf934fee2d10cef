//! Runs configured through `SweepConfig` that leave a JSON snapshot on disk.

use anyhow::anyhow;
use std::sync::Arc;

use rust_sweep::config::SweepConfig;
use rust_sweep::instrument::mock::MockSource;
use rust_sweep::prelude::*;
use rust_sweep::storage::memory::MemoryStorage;

fn persisting_config(dir: &std::path::Path) -> SweepConfig {
    let mut config = SweepConfig::default();
    config.storage.data_dir = dir.to_path_buf();
    config.storage.persist_memory = true;
    config
}

#[test]
fn completed_run_is_readable_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = RuntimeContext::from_config(persisting_config(dir.path())).unwrap();
    let x = Arc::new(MockSource::new("x", "V"));
    let reader = x.clone();

    let mut experiment = Experiment::new("demo", Sample::default()).with_comment("on disk");
    experiment
        .sweep(x.setter(), Axis::new("x", vec![0.0, 1.0, 2.0]).unwrap().with_unit("V"))
        .measure(ScalarMeasurement::new("y", move || Ok(reader.get() * 2.0)));
    let report = experiment.run(&ctx, RunOptions::default()).unwrap();

    assert!(report.location.starts_with(dir.path()));
    let snapshot = MemoryStorage::load(report.location.with_extension("json")).unwrap();
    let y = snapshot.array("y").unwrap();
    assert_eq!(y.iter().copied().collect::<Vec<_>>(), vec![0.0, 2.0, 4.0]);
    assert_eq!(snapshot.arrays["x"].spec.unit, "V");
    assert_eq!(snapshot.comments, vec!["on disk".to_string()]);
    assert!(snapshot.text_records.contains_key("settings"));
}

#[test]
fn aborted_run_keeps_partial_rows() {
    let dir = tempfile::tempdir().unwrap();
    let ctx = RuntimeContext::from_config(persisting_config(dir.path())).unwrap();
    let outer = Arc::new(MockSource::new("a", "V"));
    let inner = Arc::new(MockSource::new("b", "V"));
    let watch = outer.clone();

    let mut experiment = Experiment::new("partial", Sample::default());
    experiment
        .sweep(outer.setter(), Axis::linspace("a", 0.0, 2.0, 3).unwrap())
        .sweep(inner.setter(), Axis::linspace("b", 0.0, 1.0, 2).unwrap())
        .measure(ScalarMeasurement::new("z", move || {
            if watch.get() >= 1.0 {
                Err(anyhow!("quench"))
            } else {
                Ok(7.0)
            }
        }));
    assert!(experiment.run(&ctx, RunOptions::default()).is_err());

    let day = std::fs::read_dir(dir.path()).unwrap().next().unwrap().unwrap();
    let folder = std::fs::read_dir(day.path()).unwrap().next().unwrap().unwrap();
    let json = std::fs::read_dir(folder.path())
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().map_or(false, |e| e == "json"))
        .unwrap();
    assert!(json.to_string_lossy().contains("2D_partial"));

    let snapshot = MemoryStorage::load(&json).unwrap();
    let z = &snapshot.arrays["z"];
    assert_eq!(z.shape, vec![1, 2]);
    assert_eq!(z.values, vec![Some(7.0), Some(7.0)]);
    assert_eq!(z.rollovers, 1);
}

#[test]
fn preview_reads_the_closed_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = persisting_config(dir.path());
    config.preview.enabled = true;
    let ctx = RuntimeContext::from_config(config).unwrap();

    let mut experiment = Experiment::new("preview", Sample::default());
    experiment.measure(ScalarMeasurement::new("t", || Ok(4.2)));
    let report = experiment.run(&ctx, RunOptions::default()).unwrap();
    let worker = report.preview.expect("preview enabled");
    worker.join().unwrap();
    assert!(report.location.with_extension("json").exists());
}
