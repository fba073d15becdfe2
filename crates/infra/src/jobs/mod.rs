//! Persistent job queue shared by independently scheduled workers.
//!
//! ## Design
//!
//! - One SQLite file per queue; no broker, no shared memory
//! - Claims run inside an exclusive transaction, so a ready job is handed to
//!   exactly one worker
//! - Handlers run outside the transaction
//! - Busy locks are retried forever with a fixed delay
//! - Opening a queue resets `current` jobs left behind by a crash
//!
//! ## Components
//!
//! - `Store`: one connection to the queue file
//! - `ConcurrencyGate`: exclusive transactions and busy retry
//! - `Worker`: claim → handle → record loop
//! - `Fleet`: N isolated workers, joined at the end
//! - `JobQueue`: opening, recovery and the single-worker/fleet entry points

pub mod fleet;
pub mod gate;
pub mod queue;
pub mod store;
pub mod worker;

pub use fleet::{Fleet, FleetOutcome, FleetReport};
pub use gate::ConcurrencyGate;
pub use queue::JobQueue;
pub use store::Store;
pub use worker::{handler_fn, JobHandler, Worker, WorkerReport};
