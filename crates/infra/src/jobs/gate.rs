//! Exclusive-transaction gate over the queue file.
//!
//! The SQLite file lock is the only synchronization primitive shared by
//! workers. A `BEGIN EXCLUSIVE` transaction keeps every other connection from
//! reading or writing until it ends. Busy locks are retried forever with a
//! fixed delay.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sqlx::{Connection, SqliteConnection};
use tracing::{trace, warn};

use crate::config::DEFAULT_BUSY_DELAY;

/// Boxed future borrowing a connection, produced by retried operations.
pub type ConnFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, sqlx::Error>> + 'c>>;

const BEGIN_EXCLUSIVE: &str = "BEGIN EXCLUSIVE";

const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Whether `err` reports lock contention (any `SQLITE_BUSY`/`SQLITE_LOCKED`
/// extended code).
pub fn is_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, SQLITE_BUSY | SQLITE_LOCKED))
}

/// Serializes read-modify-write sequences across every handle on one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyGate {
    busy_delay: Duration,
}

impl Default for ConcurrencyGate {
    fn default() -> Self {
        Self::new(DEFAULT_BUSY_DELAY)
    }
}

impl ConcurrencyGate {
    pub fn new(busy_delay: Duration) -> Self {
        Self { busy_delay }
    }

    pub fn busy_delay(&self) -> Duration {
        self.busy_delay
    }

    /// Sleep for the fixed retry delay.
    pub async fn pause(&self) {
        tokio::time::sleep(self.busy_delay).await;
    }

    /// Run `op` until it finishes without hitting a busy lock.
    ///
    /// Non-contention errors are returned immediately.
    pub async fn stubbornly<T, F>(
        &self,
        conn: &mut SqliteConnection,
        mut op: F,
    ) -> Result<T, sqlx::Error>
    where
        F: for<'c> FnMut(&'c mut SqliteConnection) -> ConnFuture<'c, T>,
    {
        loop {
            match op(&mut *conn).await {
                Ok(value) => return Ok(value),
                Err(err) if is_busy(&err) => {
                    trace!(delay_ms = self.busy_delay.as_millis() as u64, "store busy, retrying");
                    self.pause().await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Run `body` inside one exclusive transaction.
    ///
    /// `BEGIN EXCLUSIVE` is retried while another handle holds the lock. The
    /// transaction commits when `body` succeeds and rolls back otherwise; a
    /// failed rollback is reported instead of the body's error. If the
    /// returned future is dropped before it completes, the transaction is
    /// rolled back on the connection's next use.
    pub async fn exclusive<T, F>(
        &self,
        conn: &mut SqliteConnection,
        body: F,
    ) -> Result<T, sqlx::Error>
    where
        F: for<'c> FnOnce(&'c mut SqliteConnection) -> ConnFuture<'c, T>,
    {
        loop {
            match conn.begin_with(BEGIN_EXCLUSIVE).await {
                Ok(mut tx) => {
                    let outcome = body(&mut *tx).await;
                    return match outcome {
                        Ok(value) => {
                            tx.commit().await?;
                            Ok(value)
                        }
                        Err(err) => {
                            if let Err(rollback) = tx.rollback().await {
                                warn!(error = %err, "critical section failed");
                                return Err(rollback);
                            }
                            Err(err)
                        }
                    };
                }
                Err(err) if is_busy(&err) => {
                    trace!(delay_ms = self.busy_delay.as_millis() as u64, "store locked, retrying");
                    self.pause().await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
