//! Queue facade: opening with recovery, administration, and execution.

use std::sync::Arc;

use tracing::{info, warn};

use jobfleet_core::{ErrorRecord, ExecutionMode, Job, JobStatus, StatusCounts};

use super::fleet::{Fleet, FleetReport};
use super::store::Store;
use super::worker::{JobHandler, Worker, WorkerReport};
use crate::config::QueueConfig;
use crate::error::QueueResult;

/// An opened queue.
///
/// Opening creates the schema if needed and runs the recovery pass, which
/// puts every `current` job back to `ready`. Open a queue once per process,
/// before any worker starts: workers spawned by [`JobQueue::fleet`] open their
/// own plain store handles and never run recovery themselves.
#[derive(Debug)]
pub struct JobQueue {
    config: QueueConfig,
    store: Store,
}

impl JobQueue {
    pub async fn open(config: QueueConfig) -> QueueResult<Self> {
        let store = Store::connect(&config).await?;
        store.ensure_schema().await?;

        let recovered = store
            .set_all_status(JobStatus::Current, JobStatus::Ready)
            .await?;
        if recovered > 0 {
            warn!(recovered, "reset interrupted jobs to ready");
        }
        info!(path = %config.path.display(), "queue opened");

        Ok(Self { config, store })
    }

    /// Like [`JobQueue::open`] without the recovery pass.
    ///
    /// For inspecting or administering a queue that a running fleet may be
    /// draining: its `current` jobs are left alone.
    pub async fn attach(config: QueueConfig) -> QueueResult<Self> {
        let store = Store::connect(&config).await?;
        store.ensure_schema().await?;
        Ok(Self { config, store })
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Delete all jobs and error records.
    pub async fn clear(&self) -> QueueResult<&Self> {
        self.store.clear().await?;
        Ok(self)
    }

    /// Append jobs as `ready`.
    pub async fn load<I, S>(&self, jobs: I) -> QueueResult<&Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.insert_jobs(jobs).await?;
        Ok(self)
    }

    /// Set the status of the named jobs.
    pub async fn set<I, S>(&self, jobs: I, status: JobStatus) -> QueueResult<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.set_status(jobs, status).await
    }

    /// Move every job at `from` to `to`.
    pub async fn set_all(&self, from: JobStatus, to: JobStatus) -> QueueResult<u64> {
        self.store.set_all_status(from, to).await
    }

    /// Mark the named jobs `removed`.
    pub async fn remove<I, S>(&self, jobs: I) -> QueueResult<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.store.set_status(jobs, JobStatus::Removed).await
    }

    pub async fn list(&self, status: Option<JobStatus>) -> QueueResult<Vec<Job>> {
        self.store.list(status).await
    }

    pub async fn errors(&self) -> QueueResult<Vec<ErrorRecord>> {
        self.store.errors().await
    }

    pub async fn counts(&self) -> QueueResult<StatusCounts> {
        self.store.counts().await
    }

    /// Run a single worker inline, as worker 0.
    pub async fn one<H>(&self, mode: ExecutionMode, handler: &H) -> QueueResult<WorkerReport>
    where
        H: JobHandler + ?Sized,
    {
        Worker::new(&self.store, 0, mode).run(handler).await
    }

    /// Run `workers` isolated workers (indices `0..workers`) and wait for all
    /// of them.
    pub async fn fleet<H>(
        &self,
        workers: usize,
        mode: ExecutionMode,
        handler: Arc<H>,
    ) -> QueueResult<FleetReport>
    where
        H: JobHandler + ?Sized + 'static,
    {
        Fleet::new(self.config.clone(), workers, mode)?
            .run(handler)
            .await
    }
}
