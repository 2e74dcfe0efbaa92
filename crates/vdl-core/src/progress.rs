//! Progress bus: many job workers publish, one consumer drains on a tick.
//!
//! Publishing never blocks and never fails. Events from one job arrive in
//! the order that job published them; nothing is ordered across jobs. The
//! consumer removes everything queued on each tick, applies it to the
//! per-job [`JobBoard`], and stops once every job of the batch is terminal.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::error::JobError;
use crate::job::{ArtifactInfo, JobId, JobStatus};

/// Rendered text longer than this is cut and suffixed with `...`.
pub const MAX_RENDERED_CHARS: usize = 180;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Status,
    Progress,
    Success,
    Failure,
    /// Removed from the queue before it ran; the consumer stops tracking it.
    /// Never forwarded to a sink.
    Discarded,
}

impl EventKind {
    pub fn is_terminal(self) -> bool {
        matches!(self, EventKind::Success | EventKind::Failure)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub job_id: JobId,
    pub kind: EventKind,
    pub message: String,
}

/// Producer side. Cheap to clone; one clone per worker.
#[derive(Debug, Clone)]
pub struct ProgressBus {
    tx: UnboundedSender<ProgressEvent>,
}

/// Consumer side of a [`ProgressBus`].
#[derive(Debug)]
pub struct ProgressReceiver {
    rx: UnboundedReceiver<ProgressEvent>,
}

impl ProgressBus {
    pub fn new() -> (Self, ProgressReceiver) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, ProgressReceiver { rx })
    }

    pub fn publish(&self, event: ProgressEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("progress consumer gone; event dropped");
        }
    }

    /// Tells the consumer that `job_id` left the batch without running.
    pub fn discard(&self, job_id: JobId) {
        self.publish(ProgressEvent {
            job_id,
            kind: EventKind::Discarded,
            message: String::new(),
        });
    }

    pub fn reporter(&self, job_id: JobId) -> JobReporter {
        JobReporter {
            job_id,
            bus: self.clone(),
        }
    }
}

impl ProgressReceiver {
    /// Removes every currently queued event. The flag is true once all
    /// producers are gone and the queue is empty.
    pub fn drain(&mut self) -> (Vec<ProgressEvent>, bool) {
        let mut events = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return (events, false),
                Err(TryRecvError::Disconnected) => return (events, true),
            }
        }
    }
}

/// A job's handle on the bus; every event it sends carries its id.
#[derive(Debug, Clone)]
pub struct JobReporter {
    job_id: JobId,
    bus: ProgressBus,
}

impl JobReporter {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub fn status(&self, message: impl Into<String>) {
        self.send(EventKind::Status, message.into());
    }

    pub fn progress(&self, message: impl Into<String>) {
        self.send(EventKind::Progress, message.into());
    }

    /// Publishes the single terminal event for this job's outcome.
    pub(crate) fn finish(
        &self,
        outcome: &Result<ArtifactInfo, JobError>,
        failure_message: impl FnOnce(&JobError) -> String,
    ) {
        match outcome {
            Ok(artifact) => self.send(EventKind::Success, artifact.summary.clone()),
            Err(e) => self.send(EventKind::Failure, failure_message(e)),
        }
    }

    fn send(&self, kind: EventKind, message: String) {
        self.bus.publish(ProgressEvent {
            job_id: self.job_id,
            kind,
            message,
        });
    }
}

/// Presentation-layer hook called once per applied event.
pub trait ProgressSink {
    fn on_progress_applied(&mut self, job_id: JobId, rendered_text: &str);
}

impl<F> ProgressSink for F
where
    F: FnMut(JobId, &str),
{
    fn on_progress_applied(&mut self, job_id: JobId, rendered_text: &str) {
        self(job_id, rendered_text)
    }
}

/// Display state for one job, as seen by the consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobView {
    pub target: String,
    pub status: JobStatus,
    pub message: String,
}

/// Consumer-side state for the jobs of the current batch.
#[derive(Debug, Default)]
pub struct JobBoard {
    views: BTreeMap<JobId, JobView>,
    terminal: usize,
}

impl JobBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, job_id: JobId, target: impl Into<String>) {
        self.views.insert(
            job_id,
            JobView {
                target: target.into(),
                status: JobStatus::Queued,
                message: String::new(),
            },
        );
    }

    /// Applies one event. Returns `None` for untracked jobs, for events
    /// arriving after a job's terminal event, and for `Discarded` (which
    /// forgets the job).
    pub fn apply(&mut self, event: &ProgressEvent) -> Option<&JobView> {
        let status = match event.kind {
            EventKind::Status | EventKind::Progress => JobStatus::Running,
            EventKind::Success => JobStatus::Succeeded,
            EventKind::Failure => JobStatus::Failed,
            EventKind::Discarded => {
                self.forget(event.job_id);
                return None;
            }
        };
        let view = self.views.get_mut(&event.job_id)?;
        if view.status.is_terminal() {
            return None;
        }
        view.status = status;
        if event.kind.is_terminal() {
            self.terminal += 1;
        }
        view.message = render(&event.message);
        Some(view)
    }

    /// Stops tracking one job so it no longer counts toward the stop
    /// condition. Returns whether it was tracked.
    pub fn forget(&mut self, job_id: JobId) -> bool {
        match self.views.remove(&job_id) {
            Some(view) => {
                if view.status.is_terminal() {
                    self.terminal -= 1;
                }
                true
            }
            None => false,
        }
    }

    pub fn get(&self, job_id: JobId) -> Option<&JobView> {
        self.views.get(&job_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (JobId, &JobView)> {
        self.views.iter().map(|(id, v)| (*id, v))
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn terminal_count(&self) -> usize {
        self.terminal
    }

    pub fn count(&self, status: JobStatus) -> usize {
        self.views.values().filter(|v| v.status == status).count()
    }

    /// Stop condition: every tracked job has reached a terminal state.
    pub fn all_terminal(&self) -> bool {
        self.terminal == self.views.len()
    }

    /// Forgets every job; later events for them are ignored.
    pub fn clear(&mut self) {
        self.views.clear();
        self.terminal = 0;
    }
}

/// Cuts display text to [`MAX_RENDERED_CHARS`].
pub fn render(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.chars().count() <= MAX_RENDERED_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(MAX_RENDERED_CHARS).collect();
    out.push_str("...");
    out
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub applied: usize,
    pub ignored: usize,
    /// Jobs dropped from the board because they were discarded unrun.
    pub discarded: usize,
    pub disconnected: bool,
}

/// Drains the bus on a fixed cadence and forwards applied events to a sink.
pub struct ProgressConsumer<S> {
    rx: ProgressReceiver,
    board: JobBoard,
    sink: S,
}

impl<S: ProgressSink> ProgressConsumer<S> {
    pub fn new(rx: ProgressReceiver, board: JobBoard, sink: S) -> Self {
        Self { rx, board, sink }
    }

    pub fn board(&self) -> &JobBoard {
        &self.board
    }

    pub fn board_mut(&mut self) -> &mut JobBoard {
        &mut self.board
    }

    pub fn into_parts(self) -> (ProgressReceiver, JobBoard, S) {
        (self.rx, self.board, self.sink)
    }

    /// Removes all queued events in one pass and applies them in order.
    pub fn drain_and_apply(&mut self) -> DrainReport {
        let (events, disconnected) = self.rx.drain();
        let mut report = DrainReport {
            disconnected,
            ..DrainReport::default()
        };
        for event in &events {
            if event.kind == EventKind::Discarded {
                if self.board.forget(event.job_id) {
                    report.discarded += 1;
                }
                continue;
            }
            match self.board.apply(event) {
                Some(view) => {
                    report.applied += 1;
                    self.sink.on_progress_applied(event.job_id, &view.message);
                }
                None => {
                    report.ignored += 1;
                    tracing::trace!(job_id = event.job_id, "ignored event for untracked job");
                }
            }
        }
        report
    }

    /// Re-arms every `tick` until all tracked jobs are terminal.
    pub async fn run(&mut self, tick: Duration) {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let report = self.drain_and_apply();
            if self.board.all_terminal() {
                break;
            }
            if report.disconnected {
                tracing::warn!(
                    pending = self.board.len() - self.board.terminal_count(),
                    "progress producers gone before every job finished"
                );
                break;
            }
        }
    }
}
