//! Queue configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fixed delay between attempts to acquire a busy store lock.
pub const DEFAULT_BUSY_DELAY: Duration = Duration::from_millis(100);

/// Location of a queue file and its lock-retry policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// SQLite file holding the queue. Created on first open.
    pub path: PathBuf,
    /// Delay before retrying a busy lock. Never grows, never gives up.
    pub busy_delay: Duration,
}

impl QueueConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            busy_delay: DEFAULT_BUSY_DELAY,
        }
    }

    pub fn with_busy_delay(mut self, delay: Duration) -> Self {
        self.busy_delay = delay;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
