//! Batch orchestration.
//!
//! A [`Session`] owns the shared pieces explicitly (metadata cache, job id
//! allocator, current prefetch token) and builds one [`Batch`] per run:
//! a scheduler, its progress bus, and a board with every job registered
//! before the first job can publish.

use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::cache::{CacheError, MetadataCache};
use crate::cancel::CancellationToken;
use crate::config::VdlConfig;
use crate::format::FormatSelection;
use crate::job::{Job, JobId, JobKind, JobRecord, JobSpec, JobStatus};
use crate::jobs::{DownloadJob, DownloadSettings, MetadataJob};
use crate::process::{CommandLauncher, ProcessLauncher};
use crate::progress::{JobBoard, ProgressBus, ProgressConsumer, ProgressReceiver, ProgressSink};
use crate::scheduler::JobScheduler;

/// One target to download and the format chosen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub target: String,
    pub format: FormatSelection,
}

impl DownloadRequest {
    pub fn new(target: impl Into<String>, format: FormatSelection) -> Self {
        Self {
            target: target.into(),
            format,
        }
    }
}

/// A submitted set of jobs of one kind.
#[derive(Debug)]
pub struct Batch {
    kind: JobKind,
    scheduler: JobScheduler,
    cancel: CancellationToken,
    ids: Vec<JobId>,
    progress: Option<(ProgressReceiver, JobBoard)>,
}

impl Batch {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn job_ids(&self) -> &[JobId] {
        &self.ids
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Takes the consumer side. Returns `None` if already taken.
    pub fn consumer<S: ProgressSink>(&mut self, sink: S) -> Option<ProgressConsumer<S>> {
        self.progress
            .take()
            .map(|(rx, board)| ProgressConsumer::new(rx, board, sink))
    }

    /// Blocks until every job of the batch has finished or been discarded.
    pub fn wait(&self) {
        self.scheduler.wait_idle();
    }

    pub fn records(&self) -> Vec<JobRecord> {
        self.scheduler.snapshot()
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.records().iter().filter(|r| r.status == status).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetReport {
    pub discarded: Vec<JobId>,
    pub cache_entries_cleared: usize,
}

pub struct Session {
    config: VdlConfig,
    launcher: Arc<dyn ProcessLauncher>,
    cache: Arc<MetadataCache>,
    next_id: AtomicU64,
    prefetch_token: Mutex<CancellationToken>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("next_id", &self.next_id)
            .finish()
    }
}

impl Session {
    pub fn new(config: VdlConfig, launcher: Arc<dyn ProcessLauncher>) -> Self {
        let cache = Arc::new(MetadataCache::new(
            Arc::clone(&launcher),
            config.metadata_timeout(),
        ));
        Self {
            config,
            launcher,
            cache,
            next_id: AtomicU64::new(1),
            prefetch_token: Mutex::new(CancellationToken::new()),
        }
    }

    /// Session that launches the configured yt-dlp binary.
    pub fn with_command_launcher(config: VdlConfig) -> Self {
        let launcher = Arc::new(CommandLauncher::new(config.ytdlp_program()));
        Self::new(config, launcher)
    }

    pub fn config(&self) -> &VdlConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MetadataCache> {
        &self.cache
    }

    fn allocate_id(&self) -> JobId {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Targets with no cache entry yet, first occurrence order, duplicates removed.
    pub fn uncached(&self, targets: &[String]) -> Vec<String> {
        let mut seen = HashSet::new();
        targets
            .iter()
            .filter(|t| !self.cache.contains(t) && seen.insert(t.as_str()))
            .cloned()
            .collect()
    }

    fn start_batch(
        &self,
        kind: JobKind,
        max_concurrency: usize,
        cancel: CancellationToken,
        jobs: Vec<Box<dyn Job>>,
    ) -> Batch {
        let (bus, rx) = ProgressBus::new();
        let mut board = JobBoard::new();
        for job in &jobs {
            board.register(job.spec().id, job.spec().target.clone());
        }
        let scheduler = JobScheduler::new(max_concurrency, bus);
        tracing::info!(
            kind = kind.as_str(),
            jobs = jobs.len(),
            max_concurrency = scheduler.max_concurrency(),
            "batch started"
        );
        let ids = scheduler.submit_all(jobs);
        Batch {
            kind,
            scheduler,
            cancel,
            ids,
            progress: Some((rx, board)),
        }
    }

    /// Probes every target in parallel under a fresh cancellation token.
    pub fn prefetch(&self, targets: &[String]) -> Batch {
        let cancel = CancellationToken::new();
        *self
            .prefetch_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = cancel.clone();
        let jobs: Vec<Box<dyn Job>> = targets
            .iter()
            .map(|target| {
                let spec = JobSpec {
                    id: self.allocate_id(),
                    target: target.clone(),
                    format: FormatSelection::default(),
                    kind: JobKind::Metadata,
                };
                Box::new(MetadataJob::new(spec, Arc::clone(&self.cache), cancel.clone()))
                    as Box<dyn Job>
            })
            .collect();
        self.start_batch(
            JobKind::Metadata,
            self.config.max_concurrent_probes,
            cancel,
            jobs,
        )
    }

    /// Stops probes of the current prefetch that have not started their fetch.
    pub fn cancel_prefetch(&self) {
        self.prefetch_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .cancel();
    }

    /// Submits one download job per request, at most `max_concurrency` at once.
    pub fn download(
        &self,
        requests: &[DownloadRequest],
        output_dir: &Path,
        max_concurrency: usize,
    ) -> Batch {
        let settings = Arc::new(DownloadSettings {
            output_dir: output_dir.to_path_buf(),
            retry: self.config.retry_or_default(),
        });
        let jobs: Vec<Box<dyn Job>> = requests
            .iter()
            .map(|req| {
                let spec = JobSpec {
                    id: self.allocate_id(),
                    target: req.target.clone(),
                    format: req.format,
                    kind: JobKind::Download,
                };
                Box::new(DownloadJob::new(
                    spec,
                    Arc::clone(&self.cache),
                    Arc::clone(&self.launcher),
                    Arc::clone(&settings),
                )) as Box<dyn Job>
            })
            .collect();
        self.start_batch(
            JobKind::Download,
            max_concurrency,
            CancellationToken::new(),
            jobs,
        )
    }

    /// Full pipeline reset: cancels the prefetch, discards queued jobs of
    /// the given batches, and clears the metadata cache. The cache clear is
    /// refused while a fetch is still in flight; queued jobs are discarded
    /// either way.
    pub fn reset(&self, batches: &[&Batch]) -> Result<ResetReport, CacheError> {
        self.cancel_prefetch();
        let discarded: Vec<JobId> = batches
            .iter()
            .flat_map(|b| b.scheduler.discard_queued())
            .collect();
        let cleared = self.cache.reset()?;
        Ok(ResetReport {
            discarded,
            cache_entries_cleared: cleared,
        })
    }
}
