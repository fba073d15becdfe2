//! Per-worker execution loop.

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use jobfleet_core::{ExecutionMode, JobFailure};

use super::store::Store;
use crate::error::{QueueError, QueueResult};

/// Work performed for one claimed job.
///
/// Called with the job name and the index of the worker running it. The call
/// happens outside the gate, so it may take as long as it needs.
#[async_trait(?Send)]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &str, worker: usize) -> Result<(), JobFailure>;
}

#[async_trait(?Send)]
impl<F> JobHandler for F
where
    F: Fn(&str, usize) -> Result<(), JobFailure> + Send + Sync,
{
    async fn handle(&self, job: &str, worker: usize) -> Result<(), JobFailure> {
        self(job, worker)
    }
}

/// Pin a closure's argument types so it is usable as a [`JobHandler`].
pub fn handler_fn<F>(f: F) -> F
where
    F: Fn(&str, usize) -> Result<(), JobFailure> + Send + Sync,
{
    f
}

/// Outcome counters of one worker run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub worker: usize,
    pub succeeded: u64,
    pub failed: u64,
}

impl WorkerReport {
    pub fn new(worker: usize) -> Self {
        Self {
            worker,
            ..Self::default()
        }
    }

    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed
    }
}

/// Claims ready jobs one at a time until none remain.
#[derive(Debug)]
pub struct Worker<'s> {
    store: &'s Store,
    index: usize,
    mode: ExecutionMode,
}

impl<'s> Worker<'s> {
    pub fn new(store: &'s Store, index: usize, mode: ExecutionMode) -> Self {
        Self { store, index, mode }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Drain the queue.
    ///
    /// Returns once a claim finds no ready job. Under strict mode the first
    /// handler failure ends the run with [`QueueError::JobFailed`] and the job
    /// stays `current` until the next recovery pass.
    pub async fn run<H>(&self, handler: &H) -> QueueResult<WorkerReport>
    where
        H: JobHandler + ?Sized,
    {
        let mut report = WorkerReport::new(self.index);
        self.drain(handler, &mut report).await?;
        Ok(report)
    }

    /// Like [`Worker::run`], counting into `report` so the jobs handled
    /// before a failure are still accounted for.
    pub async fn drain<H>(&self, handler: &H, report: &mut WorkerReport) -> QueueResult<()>
    where
        H: JobHandler + ?Sized,
    {
        let worker = self.index;
        info!(worker, mode = ?self.mode, "worker started");

        while let Some(job) = self.store.claim().await? {
            debug!(worker, job_id = %job.id, job = %job.name, "claimed job");

            let outcome = handler.handle(&job.name, worker).await;
            match outcome {
                Ok(()) => {
                    self.store.complete(job.id).await?;
                    report.succeeded += 1;
                    debug!(worker, job_id = %job.id, job = %job.name, "job done");
                }
                Err(failure) => match self.mode {
                    ExecutionMode::Strict => {
                        error!(
                            worker,
                            job_id = %job.id,
                            job = %job.name,
                            error = %failure,
                            "job failed, stopping worker"
                        );
                        return Err(QueueError::JobFailed {
                            id: job.id,
                            name: job.name,
                            failure,
                        });
                    }
                    ExecutionMode::Resilient => {
                        warn!(
                            worker,
                            job_id = %job.id,
                            job = %job.name,
                            error = %failure,
                            "job failed, recorded"
                        );
                        self.store.fail(job.id, &failure).await?;
                        report.failed += 1;
                    }
                },
            }
        }

        info!(
            worker,
            succeeded = report.succeeded,
            failed = report.failed,
            "worker finished, no ready jobs"
        );
        Ok(())
    }
}
