//! Job handler that runs one shell command per job.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use jobfleet_core::JobFailure;
use jobfleet_infra::JobHandler;

const PLACEHOLDER: &str = "{}";

/// Runs `template` through `sh -c` with every `{}` replaced by the job name.
///
/// The child inherits stdout and stderr. A non-zero exit, a kill by signal or
/// a failure to spawn is reported as a job failure.
#[derive(Debug, Clone)]
pub struct ShellCommand {
    template: String,
}

impl ShellCommand {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
        }
    }

    /// Build the template from command words, joined with spaces.
    pub fn from_words(words: &[String]) -> Self {
        Self::new(words.join(" "))
    }

    pub fn expand(&self, job: &str) -> String {
        self.template.replace(PLACEHOLDER, job)
    }
}

#[async_trait(?Send)]
impl JobHandler for ShellCommand {
    async fn handle(&self, job: &str, worker: usize) -> Result<(), JobFailure> {
        let line = self.expand(job);
        debug!(worker, job, command = %line, "running command");

        let status = Command::new("sh")
            .arg("-c")
            .arg(&line)
            .status()
            .await
            .map_err(|err| {
                JobFailure::with_trace(
                    format!("failed to start `{line}`: {err}"),
                    format!("worker {worker}\ncommand: {line}"),
                )
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(JobFailure::with_trace(
                format!("`{line}` failed with {status}"),
                format!("worker {worker}\ncommand: {line}\n{status}"),
            ))
        }
    }
}
