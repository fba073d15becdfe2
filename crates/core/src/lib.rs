//! `jobfleet-core`: domain vocabulary of the job queue.
//!
//! This crate contains **pure domain** types (no storage or runtime concerns):
//! job statuses and their persisted codes, job rows, error records, and the
//! failure/execution-mode types shared by workers.

pub mod error;
pub mod job;
pub mod status;

pub use error::StatusError;
pub use job::{ErrorRecord, ExecutionMode, Job, JobFailure, JobId};
pub use status::{JobStatus, StatusCounts};
