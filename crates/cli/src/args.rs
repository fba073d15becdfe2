use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "jobfleet")]
#[command(version)]
#[command(about = "Persistent job queue drained by parallel workers")]
#[command(after_help = STATUS_HELP)]
pub struct Args {
    /// Queue file (created on first use)
    pub queue: PathBuf,

    /// Delay in milliseconds before retrying a locked queue
    #[arg(long, env = "JOBFLEET_BUSY_DELAY_MS", default_value_t = 100, global = true)]
    pub busy_delay_ms: u64,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Clear the queue (jobs and error log)
    Clear,

    /// Add jobs to the queue
    Load {
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// Add jobs from a file, one per line ("-" reads standard input)
    Loadall { source: String },

    /// Set the specified jobs to a status
    Set {
        status: String,
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// Set all jobs of one status to another
    Setall { from: String, to: String },

    /// Mark jobs as removed
    Remove {
        #[arg(required = true)]
        jobs: Vec<String>,
    },

    /// List all jobs, or all jobs of one status
    List {
        status: Option<String>,
        /// Print a JSON array instead of tab-separated lines
        #[arg(long)]
        json: bool,
    },

    /// Show the error log
    Errors {
        #[arg(long)]
        json: bool,
    },

    /// Count jobs per status
    Stats,

    /// Run a shell command for each ready job, replacing {} with the job name
    Run {
        /// Number of parallel workers
        workers: usize,
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
}

const STATUS_HELP: &str = "\
Statuses:
    ready     not processed yet; scheduled by the next run
    current   started but not finished; rescheduled by the next run
    done      finished successfully; never processed again
    error     the command failed; set it back to ready to retry
    removed   no longer needed
    paused    parked until rescheduled manually";
