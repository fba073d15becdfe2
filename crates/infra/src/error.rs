//! Queue error model.

use jobfleet_core::{JobFailure, JobId, StatusError};

pub type QueueResult<T> = Result<T, QueueError>;

/// Errors surfaced by the store, workers and fleet.
///
/// Lock contention never appears here: the gate retries it silently.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Status(#[from] StatusError),

    /// The queue file holds data outside the expected layout.
    #[error("corrupt queue file: {0}")]
    Corrupt(String),

    /// A handler failed under strict mode; the job was left `current`.
    #[error("job '{name}' (id {id}) failed: {failure}")]
    JobFailed {
        id: JobId,
        name: String,
        failure: JobFailure,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("coordinator task failed: {0}")]
    Coordinator(#[from] tokio::task::JoinError),
}

impl QueueError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }
}
