//! Configuration System using Figment
//!
//! This module provides strongly-typed configuration loading for the sweep engine.
//! Configuration is layered from:
//! 1. Built-in defaults ([`SweepConfig::default`])
//! 2. A TOML file (optional; missing files are skipped)
//! 3. Environment variables (prefixed with `RUST_SWEEP_`, `__` separates sections)
//!
//! # Environment Variable Overrides
//!
//! ```text
//! RUST_SWEEP_APPLICATION__LOG_LEVEL=debug
//! RUST_SWEEP_STORAGE__DATA_DIR=/data/cryostat
//! RUST_SWEEP_STORAGE__BACKEND=hdf5
//! ```
//!
//! # Example
//!
//! ```no_run
//! use rust_sweep::config::SweepConfig;
//!
//! let config = SweepConfig::load_from("config/sweep.toml")?;
//! println!("Writing to {}", config.storage.data_dir.display());
//! # Ok::<(), rust_sweep::error::SweepError>(())
//! ```

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SweepError, SweepResult};

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "RUST_SWEEP_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Application settings
    #[serde(default)]
    pub application: ApplicationConfig,
    /// Storage backend settings
    #[serde(default)]
    pub storage: StorageConfig,
    /// Live viewer settings
    #[serde(default)]
    pub live_view: LiveViewConfig,
    /// End-of-run preview settings
    #[serde(default)]
    pub preview: PreviewConfig,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Operator recorded with every run
    #[serde(default)]
    pub user: String,
    /// Campaign identifier recorded with every run
    #[serde(default)]
    pub run_id: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "rust_sweep".to_string(),
            log_level: "info".to_string(),
            user: "John_Doe".to_string(),
            run_id: "NO_RUN".to_string(),
        }
    }
}

/// Storage backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory for measurement files
    pub data_dir: PathBuf,
    /// Storage backend (memory or hdf5)
    pub backend: String,
    /// Write a JSON snapshot of memory units on close
    #[serde(default)]
    pub persist_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            backend: "memory".to_string(),
            persist_memory: false,
        }
    }
}

/// Live viewer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveViewConfig {
    /// Open a viewer while the run is in progress
    #[serde(default)]
    pub enabled: bool,
    /// Viewer executable
    #[serde(default)]
    pub program: String,
    /// Extra arguments passed before the file path
    #[serde(default)]
    pub args: Vec<String>,
}

/// End-of-run preview configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Render previews once a run has closed its file (persisting memory backend only)
    #[serde(default)]
    pub enabled: bool,
}

// ============================================================================
// Configuration Loading and Validation
// ============================================================================

impl SweepConfig {
    /// Load defaults, then `path` if it exists, then `RUST_SWEEP_` overrides.
    ///
    /// # Errors
    ///
    /// Returns `SweepError::Config` if a source cannot be parsed and
    /// `SweepError::Configuration` if validation fails.
    pub fn load_from<P: AsRef<Path>>(path: P) -> SweepResult<Self> {
        Self::from_figment(Self::figment(path.as_ref()))
    }

    /// Defaults plus environment overrides, no file.
    pub fn from_env() -> SweepResult<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(SweepConfig::default()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// The provider stack used by [`SweepConfig::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(SweepConfig::default()))
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn from_figment(figment: Figment) -> SweepResult<Self> {
        let config: Self = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// Checks:
    /// - Log level is valid (trace, debug, info, warn, error)
    /// - Storage backend is valid (memory, hdf5)
    /// - Data directory is not empty
    /// - A live viewer program is set when live view is enabled
    pub fn validate(&self) -> SweepResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        let valid_backends = ["memory", "hdf5"];
        if !valid_backends.contains(&self.storage.backend.as_str()) {
            return Err(SweepError::Configuration(format!(
                "Invalid storage backend '{}'. Must be one of: {}",
                self.storage.backend,
                valid_backends.join(", ")
            )));
        }

        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(SweepError::Configuration(
                "storage.data_dir cannot be empty".to_string(),
            ));
        }

        if self.live_view.enabled && self.live_view.program.trim().is_empty() {
            return Err(SweepError::Configuration(
                "live_view.program must be set when live_view.enabled = true".to_string(),
            ));
        }

        Ok(())
    }

    /// Operator name as stored in run records (spaces become underscores).
    pub fn normalized_user(&self) -> String {
        self.application.user.trim().replace(' ', "_")
    }

    /// Run identifier as stored in run records (upper case, spaces become underscores).
    pub fn normalized_run_id(&self) -> String {
        self.application
            .run_id
            .trim()
            .replace(' ', "_")
            .to_uppercase()
    }
}
