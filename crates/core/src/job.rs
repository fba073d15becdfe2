//! Job rows, error records and handler failures.

use std::backtrace::Backtrace;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::status::JobStatus;

/// Store-assigned row identifier of a job.
///
/// Unique per insertion. Not stable if the underlying file is compacted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub i64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A named unit of work. Names are not unique; each row is independent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub name: String,
    pub status: JobStatus,
}

/// Immutable log entry written when a handler fails under resilient mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub error_at: DateTime<Utc>,
    pub job_id: JobId,
    /// Name of the referenced job, if its row still exists.
    pub job_name: Option<String>,
    pub message: String,
    pub backtrace: String,
}

/// Failure reported by a job handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub message: String,
    pub trace: String,
}

impl JobFailure {
    /// Build a failure from a message, capturing the current backtrace.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: Backtrace::force_capture().to_string(),
        }
    }

    pub fn with_trace(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: trace.into(),
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for JobFailure {}

impl From<anyhow::Error> for JobFailure {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            trace: format!("{err:?}"),
        }
    }
}

/// Failure policy of a worker, fixed when the worker is constructed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// A handler failure aborts the worker; the job stays `current`.
    #[default]
    Strict,
    /// A handler failure is logged to the error table and the job is marked `error`.
    Resilient,
}
