//! Process-wide tracing setup.
//!
//! Events go to the console and to `<logs.folder>/<logs.prefix>log-tracker.log`.
//! Verbosity comes from `RUST_LOG` and defaults to `info`.

use crate::config::LogsConfig;
use crate::error::Result;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

const DEFAULT_FILTER: &str = "info";

/// Installs the global subscriber and returns the log file path.
///
/// Creates the log folder if needed. Fails if a global subscriber is
/// already installed.
pub fn init(logs: &LogsConfig) -> Result<PathBuf> {
    std::fs::create_dir_all(&logs.folder)?;
    let path = logs.file_path();
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .map_err(std::io::Error::other)?;

    tracing::debug!(path = %path.display(), "logging initialised");
    Ok(path)
}
