//! Single-flight memoized metadata lookups.
//!
//! Each target has at most one fetch in flight. Callers arriving while a
//! fetch runs wait on that target's in-flight marker (not a global lock)
//! and receive the same entry. Failures are cached as error markers, so a
//! failed target is not re-fetched until the cache is reset.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};

use crate::cancel::CancellationToken;
use crate::error::{error_hint, JobError};
use crate::format::{self, FormatSelection};
use crate::job::JobKind;
use crate::metadata::MediaInfo;
use crate::process::{NextLine, ProcessLauncher, RunningProcess, Stream, WaitOutcome};

/// Fetched metadata, or the failure that was cached in its place.
pub type MetadataPayload = Result<Arc<MediaInfo>, JobError>;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub target: String,
    pub payload: MetadataPayload,
    pub fetched_at: SystemTime,
}

impl CacheEntry {
    pub fn info(&self) -> Option<&MediaInfo> {
        self.payload.as_ref().ok().map(Arc::as_ref)
    }

    pub fn is_error(&self) -> bool {
        self.payload.is_err()
    }
}

#[derive(Debug, Clone)]
pub enum FetchOutcome {
    Ready(Arc<CacheEntry>),
    /// Cancellation was set before the external call started; nothing was
    /// spawned and nothing was cached.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cannot reset metadata cache: {0} fetch(es) still in flight")]
    FetchInFlight(usize),
}

#[derive(Default)]
enum Flight {
    #[default]
    Pending,
    Settled(Arc<CacheEntry>),
    /// The leader stopped before spawning anything; no entry was written.
    Abandoned,
}

#[derive(Default)]
struct InFlight {
    state: Mutex<Flight>,
    done: Condvar,
}

impl InFlight {
    fn finish(&self, outcome: Flight) {
        *lock(&self.state) = outcome;
        self.done.notify_all();
    }

    /// Blocks until the leader finishes. `None` if it abandoned the fetch.
    fn wait(&self) -> Option<Arc<CacheEntry>> {
        let mut guard = lock(&self.state);
        loop {
            match &*guard {
                Flight::Pending => {}
                Flight::Settled(entry) => return Some(Arc::clone(entry)),
                Flight::Abandoned => return None,
            }
            guard = self
                .done
                .wait(guard)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

enum Role {
    Leader(Arc<InFlight>),
    Waiter(Arc<InFlight>),
}

enum Slot {
    Ready(Arc<CacheEntry>),
    InFlight(Arc<InFlight>),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Completes the in-flight marker even if the fetch unwinds, so waiters
/// never block forever.
struct LeaderGuard<'a> {
    cache: &'a MetadataCache,
    target: &'a str,
    flight: Arc<InFlight>,
    settled: bool,
}

impl LeaderGuard<'_> {
    fn settle(mut self, payload: MetadataPayload) -> Arc<CacheEntry> {
        self.settled = true;
        self.cache.publish(self.target, &self.flight, payload)
    }

    /// Removes the in-flight marker without caching anything; waiters retry.
    fn abandon(mut self) {
        self.settled = true;
        {
            let mut slots = lock(&self.cache.slots);
            if let Some(Slot::InFlight(current)) = slots.get(self.target) {
                if Arc::ptr_eq(current, &self.flight) {
                    slots.remove(self.target);
                }
            }
        }
        self.flight.finish(Flight::Abandoned);
    }
}

impl Drop for LeaderGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.cache.publish(
                self.target,
                &self.flight,
                Err(JobError::Panicked("metadata fetch aborted".to_string())),
            );
        }
    }
}

/// Shared memo from target to fetched metadata.
pub struct MetadataCache {
    launcher: Arc<dyn ProcessLauncher>,
    timeout: Duration,
    slots: Mutex<HashMap<String, Slot>>,
}

impl std::fmt::Debug for MetadataCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (ready, in_flight) = self.counts();
        f.debug_struct("MetadataCache")
            .field("timeout", &self.timeout)
            .field("ready", &ready)
            .field("in_flight", &in_flight)
            .finish()
    }
}

impl MetadataCache {
    pub fn new(launcher: Arc<dyn ProcessLauncher>, timeout: Duration) -> Self {
        Self {
            launcher,
            timeout,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cached entry for `target`, fetching it at most once.
    pub fn get_or_fetch(&self, target: &str, cancel: &CancellationToken) -> FetchOutcome {
        loop {
            if let Some(outcome) = self.try_get_or_fetch(target, cancel) {
                return outcome;
            }
            tracing::debug!(target, "in-flight metadata fetch was abandoned; retrying");
        }
    }

    /// One lookup attempt. `None` when the fetch this call waited on was
    /// abandoned by its leader.
    fn try_get_or_fetch(&self, target: &str, cancel: &CancellationToken) -> Option<FetchOutcome> {
        let role = {
            let mut slots = lock(&self.slots);
            match slots.get(target) {
                Some(Slot::Ready(entry)) => {
                    tracing::debug!(target, "metadata cache hit");
                    return Some(FetchOutcome::Ready(Arc::clone(entry)));
                }
                Some(Slot::InFlight(flight)) => Role::Waiter(Arc::clone(flight)),
                None => {
                    if cancel.is_cancelled() {
                        tracing::debug!(target, "metadata fetch skipped: cancelled");
                        return Some(FetchOutcome::Cancelled);
                    }
                    let flight = Arc::new(InFlight::default());
                    slots.insert(target.to_string(), Slot::InFlight(Arc::clone(&flight)));
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Waiter(waiting_on) => {
                tracing::debug!(target, "metadata fetch already in flight; waiting");
                waiting_on.wait().map(FetchOutcome::Ready)
            }
            Role::Leader(flight) => {
                let guard = LeaderGuard {
                    cache: self,
                    target,
                    flight,
                    settled: false,
                };
                // Cancellation may have landed after the marker went in.
                if cancel.is_cancelled() {
                    tracing::debug!(target, "metadata fetch skipped before launch: cancelled");
                    guard.abandon();
                    return Some(FetchOutcome::Cancelled);
                }
                let payload = self.fetch(target);
                Some(FetchOutcome::Ready(guard.settle(payload)))
            }
        }
    }

    /// Cached entry without fetching.
    pub fn get(&self, target: &str) -> Option<Arc<CacheEntry>> {
        match lock(&self.slots).get(target) {
            Some(Slot::Ready(entry)) => Some(Arc::clone(entry)),
            _ => None,
        }
    }

    pub fn contains(&self, target: &str) -> bool {
        self.get(target).is_some()
    }

    /// Number of settled entries.
    pub fn len(&self) -> usize {
        self.counts().0
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drops every entry. Refused while any fetch is in flight.
    pub fn reset(&self) -> Result<usize, CacheError> {
        let mut slots = lock(&self.slots);
        let in_flight = slots
            .values()
            .filter(|s| matches!(s, Slot::InFlight(_)))
            .count();
        if in_flight > 0 {
            return Err(CacheError::FetchInFlight(in_flight));
        }
        let cleared = slots.len();
        slots.clear();
        tracing::info!(cleared, "metadata cache reset");
        Ok(cleared)
    }

    /// Drops one entry so the next lookup re-fetches it. Refused while that
    /// target's fetch is in flight.
    pub fn invalidate(&self, target: &str) -> Result<bool, CacheError> {
        let mut slots = lock(&self.slots);
        if let Some(Slot::InFlight(_)) = slots.get(target) {
            return Err(CacheError::FetchInFlight(1));
        }
        Ok(slots.remove(target).is_some())
    }

    fn counts(&self) -> (usize, usize) {
        let slots = lock(&self.slots);
        slots.values().fold((0, 0), |(ready, flying), s| match s {
            Slot::Ready(_) => (ready + 1, flying),
            Slot::InFlight(_) => (ready, flying + 1),
        })
    }

    fn publish(&self, target: &str, flight: &InFlight, payload: MetadataPayload) -> Arc<CacheEntry> {
        if let Err(e) = &payload {
            tracing::warn!(target, kind = e.kind().as_str(), "metadata fetch failed: {}", e);
        }
        let entry = Arc::new(CacheEntry {
            target: target.to_string(),
            payload,
            fetched_at: SystemTime::now(),
        });
        lock(&self.slots).insert(target.to_string(), Slot::Ready(Arc::clone(&entry)));
        flight.finish(Flight::Settled(Arc::clone(&entry)));
        entry
    }

    fn expire(&self, target: &str, process: &mut dyn RunningProcess) -> JobError {
        if let Err(e) = process.kill() {
            tracing::warn!(target, "could not kill timed-out probe: {}", e);
        }
        JobError::Timeout(self.timeout)
    }

    /// Runs the probe once, bounded by the fetch deadline.
    fn fetch(&self, target: &str) -> MetadataPayload {
        let mut args = format::resolve(FormatSelection::default(), JobKind::Metadata).to_args();
        args.push(target.to_string());

        tracing::debug!(target, "fetching metadata");
        let mut process = self.launcher.launch(&args)?;
        let deadline = Instant::now() + self.timeout;
        let mut stdout = String::new();
        let mut hint: Option<String> = None;
        loop {
            match process.next_line(Some(deadline)) {
                NextLine::Line(line) => match line.stream {
                    Stream::Stdout => {
                        stdout.push_str(&line.text);
                        stdout.push('\n');
                    }
                    Stream::Stderr => {
                        if let Some(h) = error_hint(&line.text) {
                            hint = Some(h.to_string());
                        }
                    }
                },
                NextLine::Eof => break,
                NextLine::TimedOut => return Err(self.expire(target, process.as_mut())),
            }
        }

        // Output closed; the exit is bounded by the same deadline.
        let code = match process.wait_until(deadline)? {
            WaitOutcome::Exited(code) => code,
            WaitOutcome::TimedOut => return Err(self.expire(target, process.as_mut())),
        };
        if code != Some(0) {
            return Err(JobError::ExternalFailure { code, hint });
        }
        MediaInfo::parse(&stdout).map(Arc::new)
    }
}
