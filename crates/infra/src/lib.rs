//! Infrastructure layer: SQLite-backed job store, the exclusive-transaction
//! gate, worker loops and the fleet coordinator.

pub mod config;
pub mod error;
pub mod jobs;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use jobs::{
    handler_fn, ConcurrencyGate, Fleet, FleetOutcome, FleetReport, JobHandler, JobQueue, Store,
    Worker, WorkerReport,
};
