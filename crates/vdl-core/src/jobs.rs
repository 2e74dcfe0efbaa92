//! The two job kinds: metadata probes and downloads.
//!
//! Each drives at most one external process invocation and returns its
//! outcome; the scheduler publishes the terminal event.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::{FetchOutcome, MetadataCache};
use crate::cancel::CancellationToken;
use crate::config::RetryConfig;
use crate::error::{error_hint, JobError};
use crate::format;
use crate::job::{ArtifactInfo, Job, JobKind, JobSpec};
use crate::metadata::OutputLayout;
use crate::process::{NextLine, ProcessLauncher};
use crate::progress::JobReporter;
use crate::url_model::detect_platform;

/// Probes one target through the shared cache. Honors cancellation.
pub struct MetadataJob {
    spec: JobSpec,
    cache: Arc<MetadataCache>,
    cancel: CancellationToken,
}

impl MetadataJob {
    pub fn new(spec: JobSpec, cache: Arc<MetadataCache>, cancel: CancellationToken) -> Self {
        debug_assert_eq!(spec.kind, JobKind::Metadata);
        Self {
            spec,
            cache,
            cancel,
        }
    }
}

impl Job for MetadataJob {
    fn spec(&self) -> &JobSpec {
        &self.spec
    }

    fn run(&mut self, reporter: &JobReporter) -> Result<ArtifactInfo, JobError> {
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        reporter.status(format!(
            "Fetching info from {}...",
            detect_platform(&self.spec.target)
        ));
        let entry = match self.cache.get_or_fetch(&self.spec.target, &self.cancel) {
            FetchOutcome::Ready(entry) => entry,
            FetchOutcome::Cancelled => return Err(JobError::Cancelled),
        };
        // Finished after cancellation: the entry stays cached, the result is not reported.
        if self.cancel.is_cancelled() {
            return Err(JobError::Cancelled);
        }
        match &entry.payload {
            Ok(info) => Ok(ArtifactInfo {
                summary: info.summary(),
            }),
            Err(e) => Err(e.clone()),
        }
    }
}

/// Settings shared by every download job of a batch.
#[derive(Debug, Clone)]
pub struct DownloadSettings {
    pub output_dir: PathBuf,
    pub retry: RetryConfig,
}

/// Downloads one target with the external fetcher. Runs to completion once started.
pub struct DownloadJob {
    spec: JobSpec,
    cache: Arc<MetadataCache>,
    launcher: Arc<dyn ProcessLauncher>,
    settings: Arc<DownloadSettings>,
    title: String,
}

impl DownloadJob {
    pub fn new(
        spec: JobSpec,
        cache: Arc<MetadataCache>,
        launcher: Arc<dyn ProcessLauncher>,
        settings: Arc<DownloadSettings>,
    ) -> Self {
        debug_assert_eq!(spec.kind, JobKind::Download);
        Self {
            spec,
            cache,
            launcher,
            settings,
            title: "Unknown".to_string(),
        }
    }
}

/// Output template for a target: collections get a folder named after the playlist.
pub fn output_template(output_dir: &Path, layout: OutputLayout) -> String {
    let dir = match layout {
        OutputLayout::SingleItem => output_dir.to_path_buf(),
        OutputLayout::Collection => output_dir.join("%(playlist_title)s"),
    };
    dir.join("%(title)s.%(ext)s").to_string_lossy().into_owned()
}

/// Full argument list for one download invocation.
pub fn download_args(spec: &JobSpec, layout: OutputLayout, settings: &DownloadSettings) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        output_template(&settings.output_dir, layout),
        "--newline".to_string(),
    ];
    args.extend(format::resolve(spec.format, JobKind::Download).to_args());
    args.extend([
        "--retries".to_string(),
        settings.retry.retries.to_string(),
        "--fragment-retries".to_string(),
        settings.retry.fragment_retries.to_string(),
        spec.target.clone(),
    ]);
    args
}

impl Job for DownloadJob {
    fn spec(&self) -> &JobSpec {
        &self.spec
    }

    fn run(&mut self, reporter: &JobReporter) -> Result<ArtifactInfo, JobError> {
        let cached = self.cache.get(&self.spec.target);
        let info = cached.as_ref().and_then(|entry| entry.info());
        let layout = info.map(|i| i.layout()).unwrap_or(OutputLayout::SingleItem);
        if let Some(title) = info.and_then(|i| i.title()) {
            self.title = title.to_string();
        }

        let args = download_args(&self.spec, layout, &self.settings);
        reporter.status(format!(
            "Downloading from {}...",
            detect_platform(&self.spec.target)
        ));
        tracing::info!(job_id = self.spec.id, target = %self.spec.target, format = %self.spec.format, "download starting");

        let mut process = self.launcher.launch(&args)?;
        let mut hint: Option<String> = None;
        loop {
            match process.next_line(None) {
                NextLine::Line(line) => {
                    if let Some(h) = error_hint(&line.text) {
                        hint = Some(h.to_string());
                    }
                    let text = line.text.trim();
                    if !text.is_empty() {
                        reporter.progress(text);
                    }
                }
                NextLine::Eof => break,
                NextLine::TimedOut => continue,
            }
        }

        let code = process.wait()?;
        tracing::debug!(job_id = self.spec.id, ?code, "download process exited");
        if code == Some(0) {
            Ok(ArtifactInfo {
                summary: format!("Done: {}", self.title),
            })
        } else {
            Err(JobError::ExternalFailure { code, hint })
        }
    }

    fn describe_failure(&self, error: &JobError) -> String {
        match error.hint() {
            Some(hint) => format!("Download error: {}: {} ({})", self.title, error, hint),
            None => format!("Download error: {}: {}", self.title, error),
        }
    }
}
