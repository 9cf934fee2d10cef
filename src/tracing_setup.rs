//! Subscriber initialisation.
//!
//! Installs a `tracing-subscriber` fmt layer filtered by the configured log
//! level. `RUST_LOG`, when set, wins over the configuration.

use tracing_subscriber::EnvFilter;

use crate::config::SweepConfig;
use crate::error::{SweepError, SweepResult};

/// Build the filter for `config`, honouring `RUST_LOG`.
pub fn env_filter(config: &SweepConfig) -> SweepResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.application.log_level)
        .map_err(|e| SweepError::Configuration(format!("Invalid log filter: {e}")))
}

/// Install the global subscriber. Calling it again is a no-op.
pub fn init_from_config(config: &SweepConfig) -> SweepResult<()> {
    let filter = env_filter(config)?;
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .is_err()
    {
        tracing::debug!("tracing subscriber already installed");
    }
    Ok(())
}
