//! Job status enum and its persisted integer codes.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StatusError;

/// Lifecycle status of a job.
///
/// The integer codes are written to the queue file and must never change:
/// `ready=0, current=1, done=2, removed=3, error=4, paused=5`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Not processed yet; will be claimed by the next worker.
    Ready,
    /// Claimed by a worker and not finished.
    Current,
    /// Finished successfully; never processed again.
    Done,
    /// Removed by an operator.
    Removed,
    /// The handler failed under resilient mode.
    Error,
    /// Parked by an operator until rescheduled manually.
    Paused,
}

impl JobStatus {
    /// All statuses in code order.
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Ready,
        JobStatus::Current,
        JobStatus::Done,
        JobStatus::Removed,
        JobStatus::Error,
        JobStatus::Paused,
    ];

    /// Persisted integer code.
    pub const fn code(self) -> i64 {
        match self {
            JobStatus::Ready => 0,
            JobStatus::Current => 1,
            JobStatus::Done => 2,
            JobStatus::Removed => 3,
            JobStatus::Error => 4,
            JobStatus::Paused => 5,
        }
    }

    /// Inverse of [`JobStatus::code`].
    pub fn from_code(code: i64) -> Result<Self, StatusError> {
        match code {
            0 => Ok(JobStatus::Ready),
            1 => Ok(JobStatus::Current),
            2 => Ok(JobStatus::Done),
            3 => Ok(JobStatus::Removed),
            4 => Ok(JobStatus::Error),
            5 => Ok(JobStatus::Paused),
            other => Err(StatusError::UnknownCode { code: other }),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Current => "current",
            JobStatus::Done => "done",
            JobStatus::Removed => "removed",
            JobStatus::Error => "error",
            JobStatus::Paused => "paused",
        }
    }

    /// Comma-separated list of every status name, for usage messages.
    pub fn valid_names() -> String {
        Self::ALL
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StatusError::unknown_name(s))
    }
}

/// Number of jobs at each status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub ready: u64,
    pub current: u64,
    pub done: u64,
    pub removed: u64,
    pub error: u64,
    pub paused: u64,
}

impl StatusCounts {
    pub fn get(&self, status: JobStatus) -> u64 {
        match status {
            JobStatus::Ready => self.ready,
            JobStatus::Current => self.current,
            JobStatus::Done => self.done,
            JobStatus::Removed => self.removed,
            JobStatus::Error => self.error,
            JobStatus::Paused => self.paused,
        }
    }

    pub fn add(&mut self, status: JobStatus, n: u64) {
        let slot = match status {
            JobStatus::Ready => &mut self.ready,
            JobStatus::Current => &mut self.current,
            JobStatus::Done => &mut self.done,
            JobStatus::Removed => &mut self.removed,
            JobStatus::Error => &mut self.error,
            JobStatus::Paused => &mut self.paused,
        };
        *slot += n;
    }

    pub fn total(&self) -> u64 {
        JobStatus::ALL.iter().map(|s| self.get(*s)).sum()
    }
}
