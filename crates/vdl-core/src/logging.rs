//! Logging init: `tracing` to a file under the XDG state dir, or to stderr
//! when the file cannot be opened. `RUST_LOG` overrides the verbosity.

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Where log records end up after [`init`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    File(PathBuf),
    Stderr,
}

/// Filter directives for a `-v` count: 0 is quiet, 1 adds pool and cache
/// decisions, 2+ adds every progress event.
pub fn filter_directives(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,vdl=info,vdl_core=info",
        1 => "info,vdl=debug,vdl_core=debug",
        _ => "debug,vdl=trace,vdl_core=trace",
    }
}

fn env_filter(verbosity: u8) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_directives(verbosity)))
}

/// Path of the log file: `~/.local/state/vdl/vdl.log`.
pub fn log_file_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdl")?;
    Ok(xdg_dirs.get_state_home().join("vdl.log"))
}

/// Installs the file subscriber. Errors leave no subscriber installed.
pub fn init_file(verbosity: u8) -> Result<PathBuf> {
    let path = log_file_path()?;
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).with_context(|| format!("create log dir {}", dir.display()))?;
    }
    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("install tracing subscriber: {}", e))?;
    Ok(path)
}

/// Installs a stderr subscriber. A no-op if one is already installed.
pub fn init_stderr(verbosity: u8) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbosity))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .try_init();
}

/// File logging, falling back to stderr. Never fails.
pub fn init(verbosity: u8) -> LogDestination {
    match init_file(verbosity) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "vdl logging initialized");
            LogDestination::File(path)
        }
        Err(err) => {
            init_stderr(verbosity);
            tracing::warn!("file logging unavailable, using stderr: {:#}", err);
            LogDestination::Stderr
        }
    }
}
