//! Explicit runtime state handed to `Experiment::run`.
//!
//! Everything a run needs from its surroundings lives here instead of in
//! process-wide globals: configuration, the instrument registry, the storage
//! factory, the optional live viewer and preview renderer, and the sleep hook
//! adapters use for settling delays.

use anyhow::{Context as _, Result};
use std::fmt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::SweepConfig;
use crate::error::SweepResult;
use crate::instrument::InstrumentRegistry;
use crate::storage::memory::{MemoryStorage, MemoryStorageFactory};
use crate::storage::{factory_from_config, StorageFactory};

/// Cooperative sleep used by adapters.
pub type SleepHook = Arc<dyn Fn(Duration) + Send + Sync>;

/// Opens a viewer on a file that is still being written.
pub trait LiveViewLauncher: Send + Sync {
    /// Start the viewer. `datasets` are in-file paths to open right away.
    fn open(&self, file: &Path, datasets: &[String]) -> Result<Box<dyn LiveViewHandle>>;
}

/// A running viewer.
pub trait LiveViewHandle: Send {
    /// Let go of the viewer. It may keep running on its own.
    fn detach(self: Box<Self>) -> Result<()>;
}

/// Spawns an external viewer program: `<program> <args..> <file> [--datasets a,b]`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
    args: Vec<String>,
}

impl CommandLauncher {
    /// Launcher for `program` with extra leading arguments.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

impl LiveViewLauncher for CommandLauncher {
    fn open(&self, file: &Path, datasets: &[String]) -> Result<Box<dyn LiveViewHandle>> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg(file)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if !datasets.is_empty() {
            command.arg("--datasets").arg(datasets.join(","));
        }
        let child = command
            .spawn()
            .with_context(|| format!("failed to launch live viewer '{}'", self.program))?;
        tracing::info!(program = %self.program, pid = child.id(), "live viewer started");
        Ok(Box::new(ChildHandle { child }))
    }
}

struct ChildHandle {
    child: Child,
}

impl LiveViewHandle for ChildHandle {
    fn detach(mut self: Box<Self>) -> Result<()> {
        if let Some(status) = self.child.try_wait()? {
            tracing::debug!(%status, "live viewer already exited");
        }
        Ok(())
    }
}

/// Renders static previews of a closed measurement file.
///
/// Runs on a worker thread after the file was closed and must only read it.
pub trait PreviewRenderer: Send + Sync {
    /// Render previews of `file`.
    fn render(&self, file: &Path, comment: Option<&str>) -> Result<()>;
}

/// Logs a one-line summary per array of a persisted memory snapshot.
///
/// Only the persisting memory backend writes the `.json` snapshot this reads;
/// [`RuntimeContext::from_config`] installs it for that backend alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct SnapshotSummary;

impl PreviewRenderer for SnapshotSummary {
    fn render(&self, file: &Path, comment: Option<&str>) -> Result<()> {
        let snapshot_path = file.with_extension("json");
        let snapshot = MemoryStorage::load(&snapshot_path)
            .with_context(|| format!("no snapshot at {}", snapshot_path.display()))?;
        if let Some(comment) = comment {
            tracing::info!(file = %file.display(), %comment, "preview");
        }
        for (name, array) in &snapshot.arrays {
            let written: Vec<f64> = array.values.iter().flatten().copied().collect();
            let low = written.iter().copied().fold(f64::INFINITY, f64::min);
            let high = written.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            tracing::info!(
                dataset = %name,
                shape = ?array.shape,
                points = written.len(),
                low,
                high,
                "preview"
            );
        }
        Ok(())
    }
}

/// Runtime state of one or more runs.
#[derive(Clone)]
pub struct RuntimeContext {
    /// Loaded configuration.
    pub config: SweepConfig,
    /// Instruments whose settings are recorded.
    pub instruments: InstrumentRegistry,
    /// Creates one storage unit per run.
    pub storage: Arc<dyn StorageFactory>,
    /// Optional live viewer.
    pub live_view: Option<Arc<dyn LiveViewLauncher>>,
    /// Optional end-of-run preview.
    pub preview: Option<Arc<dyn PreviewRenderer>>,
    sleep: SleepHook,
}

impl RuntimeContext {
    /// Context built from configuration: storage backend, live viewer and preview.
    pub fn from_config(config: SweepConfig) -> SweepResult<Self> {
        let storage = factory_from_config(&config)?;
        let live_view: Option<Arc<dyn LiveViewLauncher>> = if config.live_view.enabled {
            Some(Arc::new(CommandLauncher::new(
                config.live_view.program.clone(),
                config.live_view.args.clone(),
            )))
        } else {
            None
        };
        let snapshots = config.storage.backend == "memory" && config.storage.persist_memory;
        let preview: Option<Arc<dyn PreviewRenderer>> = match (config.preview.enabled, snapshots) {
            (true, true) => Some(Arc::new(SnapshotSummary)),
            (true, false) => {
                tracing::warn!(
                    backend = %config.storage.backend,
                    "preview needs persisted memory snapshots, skipping it"
                );
                None
            }
            (false, _) => None,
        };
        Ok(Self {
            config,
            instruments: InstrumentRegistry::new(),
            storage,
            live_view,
            preview,
            sleep: Arc::new(std::thread::sleep),
        })
    }

    /// Default configuration, in-memory storage, no viewer, no preview.
    pub fn in_memory() -> Self {
        Self::with_factory(SweepConfig::default(), Arc::new(MemoryStorageFactory::new()))
    }

    /// Context with an explicit storage factory.
    pub fn with_factory(config: SweepConfig, storage: Arc<dyn StorageFactory>) -> Self {
        Self {
            config,
            instruments: InstrumentRegistry::new(),
            storage,
            live_view: None,
            preview: None,
            sleep: Arc::new(std::thread::sleep),
        }
    }

    /// Replace the instrument registry.
    pub fn with_instruments(mut self, instruments: InstrumentRegistry) -> Self {
        self.instruments = instruments;
        self
    }

    /// Install a live viewer.
    pub fn with_live_view(mut self, launcher: Arc<dyn LiveViewLauncher>) -> Self {
        self.live_view = Some(launcher);
        self
    }

    /// Install a preview renderer.
    pub fn with_preview(mut self, renderer: Arc<dyn PreviewRenderer>) -> Self {
        self.preview = Some(renderer);
        self
    }

    /// Replace the sleep hook.
    pub fn with_sleep(mut self, sleep: SleepHook) -> Self {
        self.sleep = sleep;
        self
    }

    /// Sleep for `seconds` through the hook. Non-positive values return at once.
    pub fn sleep(&self, seconds: f64) {
        if seconds <= 0.0 || seconds.is_nan() {
            return;
        }
        match Duration::try_from_secs_f64(seconds) {
            Ok(duration) => (self.sleep)(duration),
            Err(error) => tracing::warn!(seconds, %error, "sleep duration out of range, skipped"),
        }
    }
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("config", &self.config)
            .field("instruments", &self.instruments)
            .field("live_view", &self.live_view.is_some())
            .field("preview", &self.preview.is_some())
            .finish()
    }
}

/// Sleep hook that records requested durations instead of sleeping.
#[derive(Debug, Clone, Default)]
pub struct SleepRecorder {
    calls: Arc<Mutex<Vec<Duration>>>,
}

impl SleepRecorder {
    /// Empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Hook feeding this recorder.
    pub fn hook(&self) -> SleepHook {
        let calls = Arc::clone(&self.calls);
        Arc::new(move |d| calls.lock().unwrap_or_else(PoisonError::into_inner).push(d))
    }

    /// Every requested duration, in order.
    pub fn calls(&self) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_goes_through_hook() {
        let recorder = SleepRecorder::new();
        let ctx = RuntimeContext::in_memory().with_sleep(recorder.hook());
        ctx.sleep(0.5);
        ctx.sleep(0.0);
        ctx.sleep(-1.0);
        assert_eq!(recorder.calls(), vec![Duration::from_millis(500)]);
    }

    #[test]
    fn config_enables_viewer_and_preview() {
        let mut config = SweepConfig::default();
        config.live_view.enabled = true;
        config.live_view.program = "viewer".into();
        config.preview.enabled = true;
        config.storage.persist_memory = true;
        let ctx = RuntimeContext::from_config(config).unwrap();
        assert!(ctx.live_view.is_some());
        assert!(ctx.preview.is_some());
        assert!(RuntimeContext::in_memory().live_view.is_none());
    }

    #[test]
    fn preview_needs_persisted_snapshots() {
        let mut config = SweepConfig::default();
        config.preview.enabled = true;
        assert!(RuntimeContext::from_config(config).unwrap().preview.is_none());
    }

    #[test]
    fn oversized_sleep_is_skipped() {
        let recorder = SleepRecorder::new();
        let ctx = RuntimeContext::in_memory().with_sleep(recorder.hook());
        ctx.sleep(1e30);
        ctx.sleep(f64::INFINITY);
        ctx.sleep(f64::NAN);
        assert!(recorder.calls().is_empty());
    }

    #[test]
    fn missing_viewer_program_fails_to_launch() {
        let launcher = CommandLauncher::new("/nonexistent/viewer-binary", Vec::new());
        assert!(launcher.open(Path::new("x.h5"), &[]).is_err());
    }

    #[test]
    fn summary_reads_persisted_snapshot() {
        use crate::storage::Storage;
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run.h5");
        let mut storage = MemoryStorage::persisting(&file);
        storage.create_coordinate("x", "V", Some(&[0.0, 1.0])).unwrap();
        storage.close().unwrap();
        SnapshotSummary.render(&file, Some("cooldown")).unwrap();
        assert!(SnapshotSummary.render(&dir.path().join("missing.h5"), None).is_err());
    }
}
