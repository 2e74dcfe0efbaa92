use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Retry flags passed through to download invocations (optional section in config.toml).
/// The external process performs the retries; the core never re-runs a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Value for `--retries`.
    pub retries: u32,
    /// Value for `--fragment-retries`.
    pub fragment_retries: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            fragment_retries: 3,
        }
    }
}

/// Global configuration loaded from `~/.config/vdl/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VdlConfig {
    /// Download jobs allowed to run at once.
    pub max_concurrent_downloads: usize,
    /// Metadata probes allowed to run at once.
    pub max_concurrent_probes: usize,
    /// Deadline for a single metadata fetch, in seconds.
    pub metadata_timeout_secs: u64,
    /// Progress consumer cadence in milliseconds.
    pub tick_ms: u64,
    /// Format label used when a batch does not name one (e.g. "MP4 - 1080p").
    pub default_format: String,
    /// Explicit path to the yt-dlp binary; `yt-dlp` on PATH when unset.
    #[serde(default)]
    pub ytdlp_path: Option<PathBuf>,
    /// Output folder used when the CLI is not given one.
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Optional retry flags; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for VdlConfig {
    fn default() -> Self {
        Self {
            max_concurrent_downloads: 3,
            max_concurrent_probes: 8,
            metadata_timeout_secs: 40,
            tick_ms: 300,
            default_format: "MP4 - 1080p".to_string(),
            ytdlp_path: None,
            download_dir: None,
            retry: None,
        }
    }
}

impl VdlConfig {
    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs.max(1))
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(10))
    }

    pub fn retry_or_default(&self) -> RetryConfig {
        self.retry.clone().unwrap_or_default()
    }

    /// Binary used for every external invocation.
    pub fn ytdlp_program(&self) -> PathBuf {
        self.ytdlp_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("yt-dlp"))
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("vdl")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<VdlConfig> {
    load_or_init_at(&config_path()?)
}

/// Same as [`load_or_init`] for an explicit path.
pub fn load_or_init_at(path: &Path) -> Result<VdlConfig> {
    if !path.exists() {
        let default_cfg = VdlConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, toml).with_context(|| format!("write {}", path.display()))?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: VdlConfig =
        toml::from_str(&data).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
