//! Bounded worker pool.
//!
//! Keeps up to `max_concurrency` jobs running at once; when one finishes,
//! its worker slot is handed to the next queued job (FIFO) until the
//! backlog is empty. Admission and completion share one short critical
//! section, so two completions can never both see a free slot and overshoot
//! the limit. No I/O happens under the lock.

use std::any::Any;
use std::collections::{BTreeMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::JobError;
use crate::job::{ArtifactInfo, Job, JobId, JobRecord, JobStatus};
use crate::progress::ProgressBus;

type JobOutcome = Result<ArtifactInfo, JobError>;

struct PoolState {
    backlog: VecDeque<Box<dyn Job>>,
    records: BTreeMap<JobId, JobRecord>,
    running: usize,
    peak_running: usize,
}

struct Inner {
    max_concurrency: usize,
    bus: ProgressBus,
    state: Mutex<PoolState>,
    idle: Condvar,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Pops queued jobs into free slots. Caller holds the lock.
    fn admit(&self, state: &mut PoolState) -> Vec<Box<dyn Job>> {
        let mut admitted = Vec::new();
        while state.running < self.max_concurrency {
            let Some(job) = state.backlog.pop_front() else {
                break;
            };
            state.running += 1;
            mark_running(state, job.spec().id);
            admitted.push(job);
        }
        state.peak_running = state.peak_running.max(state.running);
        admitted
    }

    /// Settles a finished job and either hands its slot to the next queued
    /// job or releases it.
    fn complete(&self, id: JobId, outcome: &JobOutcome) -> Option<Box<dyn Job>> {
        let mut state = self.lock();
        if let Some(record) = state.records.get_mut(&id) {
            if let Err(e) = record.settle(outcome) {
                tracing::warn!(job_id = id, "{}", e);
            }
        }
        match state.backlog.pop_front() {
            Some(next) => {
                mark_running(&mut state, next.spec().id);
                Some(next)
            }
            None => {
                state.running -= 1;
                if state.running == 0 {
                    self.idle.notify_all();
                }
                None
            }
        }
    }
}

fn mark_running(state: &mut PoolState, id: JobId) {
    if let Some(record) = state.records.get_mut(&id) {
        if let Err(e) = record.transition(JobStatus::Running) {
            tracing::warn!(job_id = id, "{}", e);
        }
    }
    tracing::debug!(job_id = id, running = state.running, "job admitted");
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Runs jobs on one slot until the backlog has nothing left for it.
fn worker_loop(inner: Arc<Inner>, mut job: Box<dyn Job>) {
    loop {
        let id = job.spec().id;
        let reporter = inner.bus.reporter(id);
        let outcome = catch_unwind(AssertUnwindSafe(|| job.run(&reporter)))
            .unwrap_or_else(|payload| Err(JobError::Panicked(panic_message(payload))));
        match &outcome {
            Ok(_) => tracing::info!(job_id = id, "job succeeded"),
            Err(e) => tracing::info!(job_id = id, kind = e.kind().as_str(), "job failed: {}", e),
        }
        reporter.finish(&outcome, |e| job.describe_failure(e));
        drop(job);
        match inner.complete(id, &outcome) {
            Some(next) => job = next,
            None => break,
        }
    }
}

fn start_worker(inner: &Arc<Inner>, job: Box<dyn Job>) {
    let mut pending = Some(job);
    while let Some(job) = pending.take() {
        let id = job.spec().id;
        let worker_inner = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("vdl-job-{}", id))
            .spawn(move || worker_loop(worker_inner, job));
        if let Err(e) = spawned {
            tracing::error!(job_id = id, "could not start worker thread: {}", e);
            let outcome: JobOutcome = Err(JobError::Io(format!("start worker: {}", e)));
            inner.bus.reporter(id).finish(&outcome, JobError::to_string);
            pending = inner.complete(id, &outcome);
        }
    }
}

/// Bounded worker pool for one batch.
#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for JobScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("JobScheduler")
            .field("max_concurrency", &self.inner.max_concurrency)
            .field("running", &state.running)
            .field("queued", &state.backlog.len())
            .field("jobs", &state.records.len())
            .finish()
    }
}

impl JobScheduler {
    /// `max_concurrency` is clamped to at least 1 and fixed for this instance.
    pub fn new(max_concurrency: usize, bus: ProgressBus) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_concurrency: max_concurrency.max(1),
                bus,
                state: Mutex::new(PoolState {
                    backlog: VecDeque::new(),
                    records: BTreeMap::new(),
                    running: 0,
                    peak_running: 0,
                }),
                idle: Condvar::new(),
            }),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.inner.max_concurrency
    }

    /// Enqueues a job and starts it at once if a slot is free.
    pub fn submit(&self, job: Box<dyn Job>) -> JobId {
        let id = job.spec().id;
        let admitted = {
            let mut state = self.inner.lock();
            state.records.insert(id, JobRecord::new(job.spec().clone()));
            state.backlog.push_back(job);
            self.inner.admit(&mut state)
        };
        for job in admitted {
            start_worker(&self.inner, job);
        }
        id
    }

    pub fn submit_all<I>(&self, jobs: I) -> Vec<JobId>
    where
        I: IntoIterator<Item = Box<dyn Job>>,
    {
        jobs.into_iter().map(|job| self.submit(job)).collect()
    }

    /// Removes jobs that have not started yet. Running jobs are unaffected.
    /// Each removed id is announced on the bus so the consumer stops
    /// waiting for it.
    pub fn discard_queued(&self) -> Vec<JobId> {
        let discarded: Vec<JobId> = {
            let mut state = self.inner.lock();
            let discarded: Vec<JobId> = state.backlog.drain(..).map(|j| j.spec().id).collect();
            for id in &discarded {
                state.records.remove(id);
            }
            if state.running == 0 {
                self.inner.idle.notify_all();
            }
            discarded
        };
        for id in &discarded {
            self.inner.bus.discard(*id);
        }
        if !discarded.is_empty() {
            tracing::info!(count = discarded.len(), "discarded queued jobs");
        }
        discarded
    }

    /// Blocks until nothing is running or queued.
    pub fn wait_idle(&self) {
        let mut state = self.inner.lock();
        while state.running > 0 || !state.backlog.is_empty() {
            state = self
                .inner
                .idle
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_idle`](Self::wait_idle) with a bound; returns whether the pool went idle.
    pub fn wait_idle_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.lock();
        while state.running > 0 || !state.backlog.is_empty() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .inner
                .idle
                .wait_timeout(state, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.lock();
        state.running == 0 && state.backlog.is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running
    }

    pub fn queued_count(&self) -> usize {
        self.inner.lock().backlog.len()
    }

    /// Highest number of simultaneously running jobs seen so far.
    pub fn peak_running(&self) -> usize {
        self.inner.lock().peak_running
    }

    pub fn record(&self, id: JobId) -> Option<JobRecord> {
        self.inner.lock().records.get(&id).cloned()
    }

    /// All records in id order.
    pub fn snapshot(&self) -> Vec<JobRecord> {
        self.inner.lock().records.values().cloned().collect()
    }
}
