//! SQLite-backed job store.
//!
//! One file holds two tables:
//!
//! - `jobs (name, status)`: one row per loaded job, identified by `ROWID`
//! - `errors (error_at, job_id, message, backtrace)`: append-only failure log
//!
//! Every mutation runs in one [`ConcurrencyGate::exclusive`] transaction.
//! Reads retry on a busy lock but do not take the gate.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow};
use sqlx::{Connection, Row, SqliteConnection};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use jobfleet_core::{ErrorRecord, Job, JobFailure, JobId, JobStatus, StatusCounts};

use super::gate::{is_busy, ConcurrencyGate};
use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};

/// Same shape as SQLite's `CURRENT_TIMESTAMP`.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single handle on a queue file.
///
/// Each worker opens its own handle; handles are never shared across workers.
pub struct Store {
    conn: Mutex<SqliteConnection>,
    gate: ConcurrencyGate,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").field("gate", &self.gate).finish_non_exhaustive()
    }
}

impl Store {
    /// Open a connection to the queue file, creating the file if needed.
    ///
    /// Does not create tables or run recovery; see [`super::JobQueue::open`].
    pub async fn connect(config: &QueueConfig) -> QueueResult<Self> {
        let gate = ConcurrencyGate::new(config.busy_delay);
        let options = SqliteConnectOptions::new()
            .filename(&config.path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete)
            .busy_timeout(Duration::ZERO);

        let conn = loop {
            match SqliteConnection::connect_with(&options).await {
                Ok(conn) => break conn,
                Err(err) if is_busy(&err) => gate.pause().await,
                Err(err) => return Err(err.into()),
            }
        };
        debug!(path = %config.path.display(), "opened queue store");

        Ok(Self {
            conn: Mutex::new(conn),
            gate,
        })
    }

    pub fn gate(&self) -> ConcurrencyGate {
        self.gate
    }

    /// Create the `jobs` and `errors` tables if absent.
    pub async fn ensure_schema(&self) -> QueueResult<()> {
        let mut conn = self.conn.lock().await;
        self.gate
            .exclusive::<(), _>(&mut conn, |c| {
                Box::pin(async move {
                    sqlx::query("CREATE TABLE IF NOT EXISTS jobs (name TEXT, status INTEGER)")
                        .execute(&mut *c)
                        .await?;
                    sqlx::query(
                        "CREATE TABLE IF NOT EXISTS errors (error_at TEXT, job_id INTEGER, message TEXT, backtrace TEXT)",
                    )
                    .execute(&mut *c)
                    .await?;
                    Ok::<_, sqlx::Error>(())
                })
            })
            .await?;
        Ok(())
    }

    /// Delete every job and every error record.
    pub async fn clear(&self) -> QueueResult<()> {
        let mut conn = self.conn.lock().await;
        self.gate
            .exclusive::<(), _>(&mut conn, |c| {
                Box::pin(async move {
                    sqlx::query("DELETE FROM jobs").execute(&mut *c).await?;
                    sqlx::query("DELETE FROM errors").execute(&mut *c).await?;
                    Ok::<_, sqlx::Error>(())
                })
            })
            .await?;
        debug!("cleared queue");
        Ok(())
    }

    /// Append each name as a new `ready` row. Returns the number inserted.
    pub async fn insert_jobs<I, S>(&self, names: I) -> QueueResult<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: Vec<String> = names.into_iter().map(|n| n.as_ref().to_owned()).collect();
        let mut conn = self.conn.lock().await;
        let inserted = self
            .gate
            .exclusive::<u64, _>(&mut conn, move |c| {
                Box::pin(async move {
                    for name in &names {
                        sqlx::query("INSERT INTO jobs (name, status) VALUES (?1, ?2)")
                            .bind(name.as_str())
                            .bind(JobStatus::Ready.code())
                            .execute(&mut *c)
                            .await?;
                    }
                    Ok::<_, sqlx::Error>(names.len() as u64)
                })
            })
            .await?;
        debug!(inserted, "loaded jobs");
        Ok(inserted)
    }

    /// All jobs, or only those at `status`. No ordering is promised.
    pub async fn list(&self, status: Option<JobStatus>) -> QueueResult<Vec<Job>> {
        let mut conn = self.conn.lock().await;
        let rows = self
            .gate
            .stubbornly::<Vec<SqliteRow>, _>(&mut conn, move |c| {
                Box::pin(async move {
                    match status {
                        Some(status) => {
                            sqlx::query("SELECT ROWID, name, status FROM jobs WHERE status = ?1")
                                .bind(status.code())
                                .fetch_all(c)
                                .await
                        }
                        None => {
                            sqlx::query("SELECT ROWID, name, status FROM jobs")
                                .fetch_all(c)
                                .await
                        }
                    }
                })
            })
            .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Fetch a single job by row id.
    pub async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.lock().await;
        let row = self
            .gate
            .stubbornly::<Option<SqliteRow>, _>(&mut conn, move |c| {
                Box::pin(async move {
                    sqlx::query("SELECT ROWID, name, status FROM jobs WHERE ROWID = ?1")
                        .bind(id.0)
                        .fetch_optional(c)
                        .await
                })
            })
            .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Set `status` on every row whose name is in `names`.
    ///
    /// Rows sharing a name are all updated; a name given twice is applied
    /// once. All names are applied in one exclusive transaction. Returns the
    /// number of rows changed.
    pub async fn set_status<I, S>(&self, names: I, status: JobStatus) -> QueueResult<u64>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: BTreeSet<String> = names.into_iter().map(|n| n.as_ref().to_owned()).collect();
        let mut conn = self.conn.lock().await;
        let changed = self
            .gate
            .exclusive::<u64, _>(&mut conn, move |c| {
                Box::pin(async move {
                    let mut changed = 0u64;
                    for name in &names {
                        changed += sqlx::query("UPDATE jobs SET status = ?1 WHERE name = ?2")
                            .bind(status.code())
                            .bind(name.as_str())
                            .execute(&mut *c)
                            .await?
                            .rows_affected();
                    }
                    Ok::<_, sqlx::Error>(changed)
                })
            })
            .await?;
        debug!(%status, changed, "set job status");
        Ok(changed)
    }

    /// Move every row at `from` to `to`. Returns the number of rows changed.
    pub async fn set_all_status(&self, from: JobStatus, to: JobStatus) -> QueueResult<u64> {
        let mut conn = self.conn.lock().await;
        let changed = self
            .gate
            .exclusive::<u64, _>(&mut conn, move |c| {
                Box::pin(async move {
                    let done = sqlx::query("UPDATE jobs SET status = ?1 WHERE status = ?2")
                        .bind(to.code())
                        .bind(from.code())
                        .execute(c)
                        .await?;
                    Ok::<_, sqlx::Error>(done.rows_affected())
                })
            })
            .await?;
        debug!(%from, %to, changed, "bulk status transition");
        Ok(changed)
    }

    /// Append an error record stamped with the current time.
    pub async fn record_error(&self, id: JobId, message: &str, trace: &str) -> QueueResult<()> {
        let (message, trace) = (message.to_owned(), trace.to_owned());
        let mut conn = self.conn.lock().await;
        self.gate
            .exclusive::<(), _>(&mut conn, move |c| {
                Box::pin(async move { insert_error(c, id, &message, &trace).await })
            })
            .await?;
        Ok(())
    }

    /// Atomically reserve one `ready` job and mark it `current`.
    ///
    /// Returns `None` when no ready job exists. The row picked is whichever
    /// SQLite yields first; callers must not rely on FIFO order.
    pub async fn claim(&self) -> QueueResult<Option<Job>> {
        let mut conn = self.conn.lock().await;
        let claimed = self
            .gate
            .exclusive::<Option<Job>, _>(&mut conn, |c| {
                Box::pin(async move {
                    let row = sqlx::query("SELECT ROWID, name FROM jobs WHERE status = ?1 LIMIT 1")
                        .bind(JobStatus::Ready.code())
                        .fetch_optional(&mut *c)
                        .await?;
                    let Some(row) = row else {
                        return Ok(None);
                    };
                    let id: i64 = row.try_get(0)?;
                    let name: String = row.try_get(1)?;
                    sqlx::query("UPDATE jobs SET status = ?1 WHERE ROWID = ?2")
                        .bind(JobStatus::Current.code())
                        .bind(id)
                        .execute(&mut *c)
                        .await?;
                    Ok::<_, sqlx::Error>(Some(Job {
                        id: JobId(id),
                        name,
                        status: JobStatus::Current,
                    }))
                })
            })
            .await?;
        if let Some(job) = &claimed {
            trace!(job_id = %job.id, job = %job.name, "claimed");
        }
        Ok(claimed)
    }

    /// Mark a claimed job `done`.
    pub async fn complete(&self, id: JobId) -> QueueResult<()> {
        self.set_status_by_id(id, JobStatus::Done).await
    }

    /// Log `failure` against a claimed job and mark it `error`, in one
    /// exclusive transaction.
    pub async fn fail(&self, id: JobId, failure: &JobFailure) -> QueueResult<()> {
        let failure = failure.clone();
        let mut conn = self.conn.lock().await;
        self.gate
            .exclusive::<(), _>(&mut conn, move |c| {
                Box::pin(async move {
                    insert_error(&mut *c, id, &failure.message, &failure.trace).await?;
                    sqlx::query("UPDATE jobs SET status = ?1 WHERE ROWID = ?2")
                        .bind(JobStatus::Error.code())
                        .bind(id.0)
                        .execute(&mut *c)
                        .await?;
                    Ok::<_, sqlx::Error>(())
                })
            })
            .await?;
        Ok(())
    }

    async fn set_status_by_id(&self, id: JobId, status: JobStatus) -> QueueResult<()> {
        let mut conn = self.conn.lock().await;
        self.gate
            .exclusive::<(), _>(&mut conn, move |c| {
                Box::pin(async move {
                    sqlx::query("UPDATE jobs SET status = ?1 WHERE ROWID = ?2")
                        .bind(status.code())
                        .bind(id.0)
                        .execute(c)
                        .await?;
                    Ok::<_, sqlx::Error>(())
                })
            })
            .await?;
        Ok(())
    }

    /// Every error record, oldest first.
    pub async fn errors(&self) -> QueueResult<Vec<ErrorRecord>> {
        let mut conn = self.conn.lock().await;
        let rows = self
            .gate
            .stubbornly::<Vec<SqliteRow>, _>(&mut conn, |c| {
                Box::pin(async move {
                    sqlx::query(
                        r#"
                        SELECT e.error_at, e.job_id, j.name, e.message, e.backtrace
                        FROM errors e
                        LEFT JOIN jobs j ON j.ROWID = e.job_id
                        ORDER BY e.ROWID ASC
                        "#,
                    )
                    .fetch_all(c)
                    .await
                })
            })
            .await?;

        rows.iter().map(row_to_error).collect()
    }

    /// Number of jobs at each status.
    pub async fn counts(&self) -> QueueResult<StatusCounts> {
        let mut conn = self.conn.lock().await;
        let rows = self
            .gate
            .stubbornly::<Vec<SqliteRow>, _>(&mut conn, |c| {
                Box::pin(async move {
                    sqlx::query("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                        .fetch_all(c)
                        .await
                })
            })
            .await?;

        let mut counts = StatusCounts::default();
        for row in &rows {
            let code: i64 = row.try_get(0)?;
            let n: i64 = row.try_get(1)?;
            let status = JobStatus::from_code(code)
                .map_err(|err| QueueError::corrupt(format!("status count: {err}")))?;
            counts.add(status, n.max(0) as u64);
        }
        Ok(counts)
    }
}

async fn insert_error(
    conn: &mut SqliteConnection,
    id: JobId,
    message: &str,
    trace: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("INSERT INTO errors (error_at, job_id, message, backtrace) VALUES (?1, ?2, ?3, ?4)")
        .bind(Utc::now().format(TIMESTAMP_FORMAT).to_string())
        .bind(id.0)
        .bind(message)
        .bind(trace)
        .execute(conn)
        .await?;
    Ok(())
}

fn row_to_job(row: &SqliteRow) -> QueueResult<Job> {
    let id: i64 = row.try_get(0)?;
    let name: String = row.try_get(1)?;
    let code: i64 = row.try_get(2)?;
    let status = JobStatus::from_code(code)
        .map_err(|err| QueueError::corrupt(format!("job {id}: {err}")))?;
    Ok(Job {
        id: JobId(id),
        name,
        status,
    })
}

fn row_to_error(row: &SqliteRow) -> QueueResult<ErrorRecord> {
    let error_at: String = row.try_get(0)?;
    let job_id: i64 = row.try_get(1)?;
    Ok(ErrorRecord {
        error_at: parse_timestamp(&error_at)?,
        job_id: JobId(job_id),
        job_name: row.try_get(2)?,
        message: row.try_get::<Option<String>, _>(3)?.unwrap_or_default(),
        backtrace: row.try_get::<Option<String>, _>(4)?.unwrap_or_default(),
    })
}

fn parse_timestamp(raw: &str) -> QueueResult<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| QueueError::corrupt(format!("invalid error_at timestamp '{raw}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dir: &tempfile::TempDir) -> QueueConfig {
        QueueConfig::new(dir.path().join("queue.db")).with_busy_delay(Duration::from_millis(5))
    }

    async fn open_store(dir: &tempfile::TempDir) -> Store {
        let store = Store::connect(&config(dir)).await.unwrap();
        store.ensure_schema().await.unwrap();
        store
    }

    fn names(jobs: &[Job]) -> Vec<String> {
        let mut names: Vec<String> = jobs.iter().map(|j| j.name.clone()).collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn load_then_list_all_ready() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;

        store.insert_jobs(["a", "b", "c"]).await.unwrap();

        let jobs = store.list(None).await.unwrap();
        assert_eq!(names(&jobs), vec!["a", "b", "c"]);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Ready));
    }

    #[tokio::test]
    async fn ensure_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["keep"]).await.unwrap();

        store.ensure_schema().await.unwrap();

        assert_eq!(store.list(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_names_are_independent_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["dup", "dup", "other"]).await.unwrap();

        let jobs = store.list(None).await.unwrap();
        assert_eq!(jobs.len(), 3);
        assert_ne!(jobs[0].id, jobs[1].id);

        let changed = store.set_status(["dup"], JobStatus::Paused).await.unwrap();
        assert_eq!(changed, 2);
        assert_eq!(names(&store.list(Some(JobStatus::Paused)).await.unwrap()), vec!["dup", "dup"]);
        assert_eq!(names(&store.list(Some(JobStatus::Ready)).await.unwrap()), vec!["other"]);
    }

    #[tokio::test]
    async fn repeated_names_count_each_row_once() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["a", "b"]).await.unwrap();

        let changed = store.set_status(["a", "a", "b", "a"], JobStatus::Done).await.unwrap();

        assert_eq!(changed, 2);
        assert_eq!(names(&store.list(Some(JobStatus::Done)).await.unwrap()), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn cancelled_claim_does_not_wedge_the_queue() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs((0..10).map(|i| format!("job-{i}"))).await.unwrap();

        for _ in 0..10 {
            let _ = tokio::time::timeout(Duration::ZERO, store.claim()).await;
            tokio::time::timeout(Duration::from_secs(5), store.claim())
                .await
                .expect("claim after a cancelled claim finishes")
                .unwrap();
        }

        let other = tokio::time::timeout(Duration::from_secs(5), async {
            let other = Store::connect(&config(&dir)).await?;
            other.list(None).await
        })
        .await
        .expect("another handle can use the file");
        let jobs = other.unwrap();
        assert_eq!(jobs.len(), 10);
        assert!(jobs
            .iter()
            .all(|j| matches!(j.status, JobStatus::Ready | JobStatus::Current)));
    }

    #[tokio::test]
    async fn reads_wait_out_an_exclusive_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["a", "b"]).await.unwrap();

        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("queue.db"))
            .journal_mode(SqliteJournalMode::Delete)
            .busy_timeout(Duration::ZERO);
        let mut locker = SqliteConnection::connect_with(&options).await.unwrap();
        sqlx::query("BEGIN EXCLUSIVE").execute(&mut locker).await.unwrap();

        let started = std::time::Instant::now();
        let release = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sqlx::query("COMMIT").execute(&mut locker).await.unwrap();
        };
        let ((), listed, counted) = tokio::join!(release, store.list(None), store.counts());

        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(names(&listed.unwrap()), vec!["a", "b"]);
        assert_eq!(counted.unwrap().ready, 2);
    }

    #[tokio::test]
    async fn set_all_moves_every_matching_row() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["a", "b", "c"]).await.unwrap();

        let changed = store
            .set_all_status(JobStatus::Ready, JobStatus::Removed)
            .await
            .unwrap();

        assert_eq!(changed, 3);
        assert!(store.list(Some(JobStatus::Ready)).await.unwrap().is_empty());
        assert_eq!(
            names(&store.list(Some(JobStatus::Removed)).await.unwrap()),
            vec!["a", "b", "c"]
        );
    }

    #[tokio::test]
    async fn claim_marks_current_and_drains() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["only"]).await.unwrap();

        let job = store.claim().await.unwrap().expect("one ready job");
        assert_eq!(job.name, "only");
        assert_eq!(job.status, JobStatus::Current);
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Current);

        assert!(store.claim().await.unwrap().is_none());

        store.complete(job.id).await.unwrap();
        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn claim_skips_non_ready_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["paused", "ready"]).await.unwrap();
        store.set_status(["paused"], JobStatus::Paused).await.unwrap();

        let job = store.claim().await.unwrap().unwrap();
        assert_eq!(job.name, "ready");
        assert!(store.claim().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fail_records_error_and_marks_job() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["x"]).await.unwrap();
        let job = store.claim().await.unwrap().unwrap();

        let failure = JobFailure::with_trace("exploded", "frame 1\nframe 2");
        store.fail(job.id, &failure).await.unwrap();

        assert_eq!(store.get(job.id).await.unwrap().unwrap().status, JobStatus::Error);
        let errors = store.errors().await.unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].job_id, job.id);
        assert_eq!(errors[0].job_name.as_deref(), Some("x"));
        assert_eq!(errors[0].message, "exploded");
        assert_eq!(errors[0].backtrace, "frame 1\nframe 2");
        assert!(errors[0].error_at <= Utc::now());
    }

    #[tokio::test]
    async fn clear_empties_jobs_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["a", "b"]).await.unwrap();
        let job = store.claim().await.unwrap().unwrap();
        store.record_error(job.id, "boom", "").await.unwrap();

        store.clear().await.unwrap();

        assert!(store.list(None).await.unwrap().is_empty());
        assert!(store.errors().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn counts_cover_every_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        store.insert_jobs(["a", "b", "c", "d"]).await.unwrap();
        store.set_status(["d"], JobStatus::Paused).await.unwrap();
        let job = store.claim().await.unwrap().unwrap();
        store.complete(job.id).await.unwrap();

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.ready, 2);
        assert_eq!(counts.done, 1);
        assert_eq!(counts.paused, 1);
        assert_eq!(counts.total(), 4);
    }

    #[tokio::test]
    async fn unknown_status_code_on_disk_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir).await;
        {
            let mut conn = store.conn.lock().await;
            sqlx::query("INSERT INTO jobs (name, status) VALUES ('weird', 42)")
                .execute(&mut *conn)
                .await
                .unwrap();
        }

        let err = store.list(None).await.unwrap_err();
        assert!(matches!(err, QueueError::Corrupt(_)), "got {err:?}");
    }

    #[test]
    fn parses_sqlite_and_rfc3339_timestamps() {
        let ts = parse_timestamp("2024-05-01 12:30:00").unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-05-01T12:30:00+00:00");
        assert!(parse_timestamp("2024-05-01T12:30:00Z").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }
}
