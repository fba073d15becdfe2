//! Multi-worker fan-out and join.
//!
//! Each worker runs on its own OS thread with its own single-threaded tokio
//! runtime and its own store handle. Workers share nothing in memory: the
//! queue file is the only thing they coordinate through.

use std::sync::Arc;
use std::thread;

use serde::Serialize;
use tracing::{error, info};

use jobfleet_core::ExecutionMode;

use super::store::Store;
use super::worker::{JobHandler, Worker, WorkerReport};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Aggregated result of a fleet run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetReport {
    /// One report per worker, by worker index. A worker that stopped on an
    /// error reports the jobs it handled before stopping.
    pub workers: Vec<WorkerReport>,
    /// Indices of the workers that stopped on an error.
    pub failed_workers: Vec<usize>,
}

impl FleetReport {
    pub fn succeeded(&self) -> u64 {
        self.workers.iter().map(|w| w.succeeded).sum()
    }

    pub fn failed(&self) -> u64 {
        self.workers.iter().map(|w| w.failed).sum()
    }
}

/// Report of a finished fleet together with the first worker error.
#[derive(Debug)]
pub struct FleetOutcome {
    pub report: FleetReport,
    /// Error of the lowest-indexed failing worker.
    pub failure: Option<QueueError>,
}

impl FleetOutcome {
    pub fn into_result(self) -> QueueResult<FleetReport> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(self.report),
        }
    }
}

/// A fixed number of workers draining one queue.
#[derive(Debug, Clone)]
pub struct Fleet {
    config: QueueConfig,
    size: usize,
    mode: ExecutionMode,
}

impl Fleet {
    pub fn new(config: QueueConfig, size: usize, mode: ExecutionMode) -> QueueResult<Self> {
        if size == 0 {
            return Err(QueueError::invalid_config("a fleet needs at least one worker"));
        }
        Ok(Self { config, size, mode })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Spawn every worker and wait until all of them have exited.
    ///
    /// A failing worker does not stop the others. Once all are joined, the
    /// failure of the lowest-indexed failing worker is returned.
    pub async fn run<H>(&self, handler: Arc<H>) -> QueueResult<FleetReport>
    where
        H: JobHandler + ?Sized + 'static,
    {
        self.execute(handler).await?.into_result()
    }

    /// Like [`Fleet::run`], keeping the full report when a worker fails.
    ///
    /// Errors only when a worker thread cannot be started or joined.
    pub async fn execute<H>(&self, handler: Arc<H>) -> QueueResult<FleetOutcome>
    where
        H: JobHandler + ?Sized + 'static,
    {
        info!(workers = self.size, mode = ?self.mode, "starting fleet");

        let mut handles = Vec::with_capacity(self.size);
        for index in 0..self.size {
            let config = self.config.clone();
            let mode = self.mode;
            let handler = Arc::clone(&handler);
            let spawned = thread::Builder::new()
                .name(format!("jobfleet-worker-{index}"))
                .spawn(move || run_isolated(&config, index, mode, &*handler));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(worker = index, error = %err, "failed to spawn worker thread");
                    join_all(handles).await?;
                    return Err(err.into());
                }
            }
        }

        let mut report = FleetReport::default();
        let mut failure = None;
        for (index, (worker, result)) in join_all(handles).await?.into_iter().enumerate() {
            report.workers.push(worker);
            if let Err(err) = result {
                error!(worker = index, error = %err, "worker exited with error");
                report.failed_workers.push(index);
                if failure.is_none() {
                    failure = Some(err);
                }
            }
        }

        info!(
            succeeded = report.succeeded(),
            failed = report.failed(),
            failed_workers = report.failed_workers.len(),
            "fleet finished"
        );
        Ok(FleetOutcome { report, failure })
    }
}

type WorkerExit = (WorkerReport, QueueResult<()>);

/// Body of one worker thread.
fn run_isolated<H>(config: &QueueConfig, index: usize, mode: ExecutionMode, handler: &H) -> WorkerExit
where
    H: JobHandler + ?Sized,
{
    let mut report = WorkerReport::new(index);
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => return (report, Err(err.into())),
    };
    let result = runtime.block_on(async {
        let store = Store::connect(config).await?;
        Worker::new(&store, index, mode)
            .drain(handler, &mut report)
            .await
    });
    (report, result)
}

/// Join worker threads without blocking the caller's runtime.
async fn join_all(handles: Vec<thread::JoinHandle<WorkerExit>>) -> QueueResult<Vec<WorkerExit>> {
    let joined = tokio::task::spawn_blocking(move || {
        handles
            .into_iter()
            .enumerate()
            .map(|(index, handle)| {
                handle.join().unwrap_or_else(|_| {
                    (WorkerReport::new(index), Err(QueueError::WorkerPanicked(index)))
                })
            })
            .collect::<Vec<_>>()
    })
    .await?;
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_workers_is_rejected() {
        let err = Fleet::new(QueueConfig::new("unused.db"), 0, ExecutionMode::Strict).unwrap_err();
        assert!(matches!(err, QueueError::InvalidConfig(_)));
    }

    #[test]
    fn report_totals_sum_workers() {
        let report = FleetReport {
            workers: vec![
                WorkerReport { worker: 0, succeeded: 2, failed: 1 },
                WorkerReport { worker: 1, succeeded: 3, failed: 0 },
            ],
            failed_workers: vec![],
        };
        assert_eq!(report.succeeded(), 5);
        assert_eq!(report.failed(), 1);
    }
}
