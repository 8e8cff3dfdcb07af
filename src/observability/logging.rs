//! Structured logging.
//!
//! # Responsibilities
//! - Install the global `tracing` subscriber
//! - Change the log level at runtime when `LOG_LEVEL` changes remotely
//!
//! # Design Decisions
//! - `RUST_LOG`, when set, pins the filter; `LOG_LEVEL` is then ignored
//! - The filter sits behind a reload layer so the watcher never restarts
//!   the subscriber
//! - Events go to stderr; stdout belongs to command output

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

const CRATE_TARGET: &str = "layered_config";
const DEFAULT_DIRECTIVE: &str = "layered_config=info";

#[derive(Debug, Error)]
pub enum LogError {
    #[error("invalid log level \"{0}\"")]
    InvalidLevel(String),

    #[error("failed to reload log filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Handle to the installed filter.
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    pinned: bool,
}

/// Installs the global subscriber. Call once, from the binary.
pub fn init_logging() -> LogHandle {
    let pinned = std::env::var_os(EnvFilter::DEFAULT_ENV).is_some();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    LogHandle { handle, pinned }
}

impl LogHandle {
    /// Switches the crate's log level to `level` (`error`..`trace`, `off`).
    ///
    /// Returns `Ok(false)` when `RUST_LOG` pins the filter.
    pub fn apply_level(&self, level: &str) -> Result<bool, LogError> {
        if self.pinned {
            return Ok(false);
        }

        let directive = level_directive(level)?;
        self.handle.reload(EnvFilter::new(directive))?;
        Ok(true)
    }
}

fn level_directive(level: &str) -> Result<String, LogError> {
    let parsed: LevelFilter = level
        .trim()
        .parse()
        .map_err(|_| LogError::InvalidLevel(level.to_string()))?;
    Ok(format!("{}={}", CRATE_TARGET, parsed))
}
