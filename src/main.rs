//! Demo driver: a simulated landscape scan.
//!
//! Sweeps a gate voltage and, inside it, a magnetic field restricted to a
//! window that follows the gate value. Every point records a simulated
//! conductance; before the sweep an IV curve with its numerical derivative is
//! taken once.
//!
//! ```bash
//! cargo run -- --gate-points 21 --field-points 41 --config config/sweep.toml
//! cargo run --features storage_hdf5 -- --backend hdf5
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use rust_sweep::config::SweepConfig;
use rust_sweep::instrument::mock::{MockIvDevice, MockSource};
use rust_sweep::instrument::{InstrumentRegistry, MeasureMode};
use rust_sweep::prelude::*;
use rust_sweep::tracing_setup;

#[derive(Parser, Debug)]
#[command(name = "rust_sweep", about = "Simulated landscape scan on the sweep engine")]
struct Args {
    /// TOML configuration file. Missing files fall back to defaults.
    #[arg(short, long, default_value = "config/sweep.toml")]
    config: PathBuf,

    /// Experiment name.
    #[arg(short, long, default_value = "landscape")]
    name: String,

    /// Points of the outer gate sweep.
    #[arg(long, default_value_t = 11)]
    gate_points: usize,

    /// Points of the inner field sweep.
    #[arg(long, default_value_t = 21)]
    field_points: usize,

    /// Half width of the field window around the gate-dependent centre, in T.
    #[arg(long, default_value_t = 0.3)]
    window: f64,

    /// Override the storage backend (memory or hdf5).
    #[arg(long)]
    backend: Option<String>,

    /// Override the data directory.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Free-text comment stored with the file.
    #[arg(long)]
    comment: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = SweepConfig::load_from(&args.config)
        .with_context(|| format!("failed to load {}", args.config.display()))?;
    if let Some(backend) = &args.backend {
        config.storage.backend = backend.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.storage.data_dir = dir.clone();
    }
    config.validate()?;
    tracing_setup::init_from_config(&config)?;

    let gate = Arc::new(MockSource::new("gate", "V"));
    let field = Arc::new(MockSource::new("magnet", "T"));
    let smu = Arc::new(MockIvDevice::new("smu", MeasureMode::IV, 1.2e3).with_noise(0.01));

    let mut instruments = InstrumentRegistry::new();
    instruments.register(gate.clone())?;
    instruments.register(field.clone())?;
    instruments.register(smu.clone())?;
    let ctx = RuntimeContext::from_config(config)?.with_instruments(instruments);

    let mut iv = TransportMeasurement::new(smu, MeasureMode::IV)?
        .with_sleep(0.0)
        .with_extend_range(true)?;
    iv.add_half_swing_sweep(1e-6, 1e-7, 0.0)?;

    let sample = SampleBuilder::new()
        .name("demo-device")
        .comment("simulated")
        .build();
    let mut experiment = Experiment::new(&args.name, sample);
    if let Some(comment) = &args.comment {
        experiment = experiment.with_comment(comment);
    }
    experiment.measure_analyzed(iv, NumericalDerivative::new());

    let gate_axis = Axis::linspace("gate", -1.0, 1.0, args.gate_points)?.with_unit("V");
    let field_axis = Axis::linspace("field", -1.0, 1.0, args.field_points)?.with_unit("T");

    let gate_sweep = experiment.sweep(gate.setter(), gate_axis);
    let gate_value = gate_sweep.current_value_handle();
    let window = args.window;
    let (g, f) = (gate.clone(), field.clone());
    gate_sweep
        .sweep(field.setter(), field_axis)
        .filtered(move |fields| {
            let centre = 0.5 * gate_value.get().unwrap_or(0.0);
            fields.iter().map(|b| (b - centre).abs() <= window).collect()
        })
        .measure(
            ScalarMeasurement::new("conductance", move || Ok(conductance(g.get(), f.get())))
                .with_unit("e^2/h"),
        );

    println!("{experiment}");
    let report = experiment.run(&ctx, RunOptions::default())?;
    println!(
        "{}D measurement written to {}",
        report.dimensionality,
        report.location.display()
    );
    if let Some(preview) = report.preview {
        if preview.join().is_err() {
            tracing::warn!("preview worker panicked");
        }
    }
    Ok(())
}

/// Lorentzian ridge following `field = gate / 2`.
fn conductance(gate: f64, field: f64) -> f64 {
    let detuning = field - 0.5 * gate;
    1.0 / (1.0 + (detuning / 0.05).powi(2))
}
