//! `vdl get` – download targets with a bounded worker pool.

use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use vdl_core::config::VdlConfig;
use vdl_core::format::FormatSelection;
use vdl_core::session::{DownloadRequest, Session};

use super::watch::watch_batch;

pub async fn run_get(
    cfg: VdlConfig,
    targets: &[String],
    format: Option<&str>,
    jobs: Option<usize>,
    dir: Option<PathBuf>,
    no_probe: bool,
) -> Result<()> {
    let format = FormatSelection::parse(format.unwrap_or(&cfg.default_format));
    let output_dir = match dir.or_else(|| cfg.download_dir.clone()) {
        Some(d) => d,
        None => std::env::current_dir().context("resolve current directory")?,
    };
    std::fs::create_dir_all(&output_dir)
        .with_context(|| format!("create output directory {}", output_dir.display()))?;
    let max_concurrency = jobs.unwrap_or(cfg.max_concurrent_downloads);
    let tick = cfg.tick();
    let session = Session::with_command_launcher(cfg);

    if !no_probe {
        let pending = session.uncached(targets);
        if !pending.is_empty() {
            println!("Fetching info for {} target(s)...", pending.len());
            let mut probe = session.prefetch(&pending);
            let tally = watch_batch(&mut probe, tick).await?;
            if tally.failed > 0 {
                tracing::warn!(failed = tally.failed, "some probes failed; downloading anyway");
            }
        }
    }

    let requests: Vec<DownloadRequest> = targets
        .iter()
        .map(|t| DownloadRequest::new(t.clone(), format))
        .collect();
    println!(
        "Downloading {} target(s) as {} into {} ({} at a time)",
        requests.len(),
        format,
        output_dir.display(),
        max_concurrency.max(1)
    );
    let mut batch = session.download(&requests, &output_dir, max_concurrency);
    let tally = watch_batch(&mut batch, tick).await?;

    println!("{} downloaded, {} failed", tally.succeeded, tally.failed);
    if tally.failed > 0 {
        bail!("{} of {} downloads failed", tally.failed, requests.len());
    }
    Ok(())
}
