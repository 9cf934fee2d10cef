//! Custom error types for the sweep engine.
//!
//! This module defines the primary error type, `SweepError`, for the entire crate.
//! Using the `thiserror` crate, it provides a centralized and consistent way to handle
//! the different kinds of errors that can occur while building and running an
//! experiment.
//!
//! ## Error Hierarchy
//!
//! `SweepError` consolidates three families of failures:
//!
//! - **Configuration errors** (`ShapeMismatch`, `UnsupportedRank`, `DuplicateName`,
//!   `InvalidAxis`, `InvalidFilter`, `Configuration`, `AlreadyRun`): detected while
//!   the tree is built or while datasets are created, before any instrument is touched.
//! - **Device errors** (`Setter`, `Measurement`, `Analysis`): raised by user callbacks
//!   and adapters. The original error stays reachable through
//!   [`std::error::Error::source`].
//! - **Storage errors** (`Storage`, `OverwriteAttempt`, `DatasetNotFound`, `Io`, `Json`,
//!   `FeatureNotEnabled`): problems with the file substrate.
//!
//! By using `#[from]`, `SweepError` can be created from the underlying library errors,
//! simplifying error handling throughout the crate with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type SweepResult<T> = std::result::Result<T, SweepError>;

/// Errors raised while building, validating, or running an experiment.
#[derive(Error, Debug)]
pub enum SweepError {
    #[error("Shape mismatch for '{name}': expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<Option<usize>>,
        actual: Vec<usize>,
    },

    #[error("Unsupported rank {rank} for dataset '{name}' (sweep depth {depth}); at most 3 dimensions are supported")]
    UnsupportedRank {
        name: String,
        depth: usize,
        rank: usize,
    },

    #[error("Duplicate {kind} name '{name}'")]
    DuplicateName { kind: &'static str, name: String },

    #[error("Invalid axis '{name}': {reason}")]
    InvalidAxis { name: String, reason: String },

    #[error("Filter for axis '{axis}' returned {actual} entries, expected {expected}")]
    InvalidFilter {
        axis: String,
        expected: usize,
        actual: usize,
    },

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("Experiment has already been run; construct a new experiment per measurement")]
    AlreadyRun,

    #[error("Error setting {axis} to {value}: {source}")]
    Setter {
        axis: String,
        value: f64,
        #[source]
        source: anyhow::Error,
    },

    #[error("Measurement failed for {adapter}: {source}")]
    Measurement {
        adapter: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Analysis failed for {adapter}: {source}")]
    Analysis {
        adapter: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Overwriting data in '{dataset}' at {position:?}; sweep indices were reused")]
    OverwriteAttempt {
        dataset: String,
        position: Vec<usize>,
    },

    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),
}

impl SweepError {
    /// True for errors that are detected before any instrument is touched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SweepError::ShapeMismatch { .. }
                | SweepError::UnsupportedRank { .. }
                | SweepError::DuplicateName { .. }
                | SweepError::InvalidAxis { .. }
                | SweepError::InvalidFilter { .. }
                | SweepError::Configuration(_)
                | SweepError::Config(_)
                | SweepError::AlreadyRun
        )
    }
}

#[cfg(feature = "storage_hdf5")]
impl From<hdf5::Error> for SweepError {
    fn from(err: hdf5::Error) -> Self {
        SweepError::Storage(err.to_string())
    }
}
