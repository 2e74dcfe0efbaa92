//! Job failure taxonomy and its classification.
//!
//! Every failure is caught at the job boundary and becomes a terminal
//! `Failed` status plus one `Failure` progress event; nothing here escapes a
//! worker. [`JobError`] is `Clone` so one cached failure can be handed to
//! every caller waiting on the same metadata fetch.

use std::time::Duration;

/// The external process could not be started (missing binary, permissions).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("could not launch {program}: {reason}")]
pub struct LaunchError {
    pub program: String,
    pub reason: String,
}

/// Why a job (or a metadata fetch) did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Launch(#[from] LaunchError),
    /// Process started but exited non-zero (`None` when killed by a signal).
    #[error("external process failed ({})", describe_exit(.code))]
    ExternalFailure {
        code: Option<i32>,
        hint: Option<String>,
    },
    /// Process succeeded but its output could not be parsed.
    #[error("malformed metadata: {0}")]
    MalformedMetadata(String),
    #[error("metadata fetch timed out after {}s", whole_secs(.0))]
    Timeout(Duration),
    /// Skipped or discarded because the prefetch was cancelled.
    #[error("metadata fetch cancelled")]
    Cancelled,
    /// Waiting on or reading from the process failed after it started.
    #[error("process i/o: {0}")]
    Io(String),
    #[error("worker panicked: {0}")]
    Panicked(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("exit code {}", c),
        None => "terminated by signal".to_string(),
    }
}

fn whole_secs(d: &Duration) -> u64 {
    d.as_secs()
}

/// High-level classification used for display and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Launch,
    External,
    Malformed,
    Timeout,
    /// Not an error: the work was never started or its result was dropped.
    Cancelled,
    Internal,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Launch => "launch",
            FailureKind::External => "external",
            FailureKind::Malformed => "malformed",
            FailureKind::Timeout => "timeout",
            FailureKind::Cancelled => "cancelled",
            FailureKind::Internal => "internal",
        }
    }
}

impl JobError {
    pub fn kind(&self) -> FailureKind {
        match self {
            JobError::Launch(_) => FailureKind::Launch,
            JobError::ExternalFailure { .. } => FailureKind::External,
            JobError::MalformedMetadata(_) => FailureKind::Malformed,
            JobError::Timeout(_) => FailureKind::Timeout,
            JobError::Cancelled => FailureKind::Cancelled,
            JobError::Io(_) | JobError::Panicked(_) => FailureKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind() == FailureKind::Cancelled
    }

    /// Last diagnostic line the external process printed, if any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            JobError::ExternalFailure { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }
}

impl From<std::io::Error> for JobError {
    fn from(e: std::io::Error) -> Self {
        JobError::Io(e.to_string())
    }
}

/// Extracts the diagnostic from an external-process output line (`ERROR: ...`).
pub fn error_hint(line: &str) -> Option<&str> {
    let trimmed = line.trim();
    trimmed
        .strip_prefix("ERROR:")
        .map(str::trim)
        .filter(|rest| !rest.is_empty())
}
