//! Job records and the per-job lifecycle.
//!
//! `Queued → Running → {Succeeded, Failed}`. Terminal states never change.

use std::fmt;

use crate::error::{FailureKind, JobError};
use crate::format::FormatSelection;
use crate::progress::JobReporter;

/// Job identifier; the correlation key carried on every progress event.
pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Metadata,
    Download,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Metadata => "metadata",
            JobKind::Download => "download",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("job {id}: illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub id: JobId,
    pub from: JobStatus,
    pub to: JobStatus,
}

/// What a job was asked to do. Immutable for the job's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub id: JobId,
    pub target: String,
    pub format: FormatSelection,
    pub kind: JobKind,
}

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactInfo {
    /// Short human-readable summary (published on the `Success` event).
    pub summary: String,
}

/// Result of a failed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&JobError> for ErrorInfo {
    fn from(e: &JobError) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobResult {
    Artifact(ArtifactInfo),
    Error(ErrorInfo),
}

/// One unit of work and its mutable status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRecord {
    pub spec: JobSpec,
    pub status: JobStatus,
    pub result: Option<JobResult>,
}

impl JobRecord {
    pub fn new(spec: JobSpec) -> Self {
        Self {
            spec,
            status: JobStatus::Queued,
            result: None,
        }
    }

    pub fn id(&self) -> JobId {
        self.spec.id
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                id: self.spec.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Moves a running record to its terminal state from a job outcome.
    pub fn settle(&mut self, outcome: &Result<ArtifactInfo, JobError>) -> Result<(), TransitionError> {
        match outcome {
            Ok(artifact) => {
                self.transition(JobStatus::Succeeded)?;
                self.result = Some(JobResult::Artifact(artifact.clone()));
            }
            Err(e) => {
                self.transition(JobStatus::Failed)?;
                self.result = Some(JobResult::Error(ErrorInfo::from(e)));
            }
        }
        Ok(())
    }
}

/// A unit of work executed exactly once by a scheduler worker slot.
///
/// Implementations publish `Status`/`Progress` events through the reporter;
/// the scheduler publishes the single terminal event from the returned value.
pub trait Job: Send {
    fn spec(&self) -> &JobSpec;

    fn run(&mut self, reporter: &JobReporter) -> Result<ArtifactInfo, JobError>;

    /// Message carried on the `Failure` event.
    fn describe_failure(&self, error: &JobError) -> String {
        error.to_string()
    }
}
