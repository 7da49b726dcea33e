//! Logging bootstrap: console plus a timestamped per-run log file.
//!
//! Initialization is explicit and happens once at the top of `main`; nothing
//! here runs as an import-time side effect. The log file is the run's only
//! durable audit trail.

use anyhow::{Context, Result};
use chrono::Local;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber: an ANSI console layer on stdout and a
/// plain-text layer appending to `<log_dir>/index_deployment_<stamp>.log`.
///
/// The log directory is created if absent. `RUST_LOG` overrides the default
/// `info` filter. Returns the log file path so the run can report it.
pub fn init(log_dir: &Path) -> Result<PathBuf> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("create log directory {}", log_dir.display()))?;

    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    let log_path = log_dir.join(format!("index_deployment_{stamp}.log"));
    let log_file = File::create(&log_path)
        .with_context(|| format!("create log file {}", log_path.display()))?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Arc::new(log_file)),
        )
        .try_init()
        .map_err(|err| anyhow::anyhow!("install tracing subscriber: {err}"))?;

    Ok(log_path)
}
