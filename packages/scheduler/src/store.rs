//! SQLite-backed job store.
//!
//! The store is the single source of truth for job state. All multi-field
//! mutations go through [`JobUpdate`] so a whole field group (status plus
//! its timestamps) lands in one `UPDATE ... RETURNING` statement; an
//! expected-status guard turns the same statement into a compare-and-set,
//! which is how the scheduler discards late transitions against jobs that
//! already reached a terminal state.
//!
//! Enums are stored as their snake_case wire names, payload/result as JSON
//! text, timestamps as RFC 3339 text via chrono.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{FromRow, QueryBuilder, Sqlite};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{StoreError, StoreResult};
use crate::job::{Job, JobStatus, JobType, QueueStats};

const JOB_COLUMNS: &str = "id, job_type, status, priority, payload, progress, result, error, \
     attempts, max_attempts, parent_job_id, user_initiated, timeout_seconds, \
     created_at, queued_at, started_at, completed_at, timeout_at";

const CREATE_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id              TEXT PRIMARY KEY,
    job_type        TEXT NOT NULL,
    status          TEXT NOT NULL,
    priority        INTEGER NOT NULL,
    payload         TEXT NOT NULL,
    progress        INTEGER NOT NULL DEFAULT 0,
    result          TEXT,
    error           TEXT,
    attempts        INTEGER NOT NULL DEFAULT 0,
    max_attempts    INTEGER NOT NULL,
    parent_job_id   TEXT,
    user_initiated  INTEGER NOT NULL DEFAULT 0,
    timeout_seconds INTEGER NOT NULL,
    created_at      TEXT NOT NULL,
    queued_at       TEXT,
    started_at      TEXT,
    completed_at    TEXT,
    timeout_at      TEXT
)
"#;

const CREATE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs (status)";
const CREATE_PARENT_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_parent ON jobs (parent_job_id)";
const CREATE_QUEUE_ORDER_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_jobs_queue_order ON jobs (status, priority, created_at)";

/// Raw row as persisted; converted into [`Job`] after enum and JSON parsing
#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    job_type: String,
    status: String,
    priority: i64,
    payload: String,
    progress: i64,
    result: Option<String>,
    error: Option<String>,
    attempts: i64,
    max_attempts: i64,
    parent_job_id: Option<String>,
    user_initiated: bool,
    timeout_seconds: i64,
    created_at: DateTime<Utc>,
    queued_at: Option<DateTime<Utc>>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    timeout_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let job_type = JobType::from_str(&row.job_type)
            .map_err(|_| StoreError::corrupt(&row.id, format!("unknown job type '{}'", row.job_type)))?;
        let status = JobStatus::from_str(&row.status)
            .map_err(|_| StoreError::corrupt(&row.id, format!("unknown status '{}'", row.status)))?;
        let payload: Value = serde_json::from_str(&row.payload)
            .map_err(|e| StoreError::corrupt(&row.id, format!("payload is not valid JSON: {e}")))?;
        let result = row
            .result
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()
            .map_err(|e| StoreError::corrupt(&row.id, format!("result is not valid JSON: {e}")))?;

        Ok(Job {
            id: row.id,
            job_type,
            status,
            priority: row.priority as i32,
            payload,
            progress: row.progress as i32,
            result,
            error: row.error,
            attempts: row.attempts as i32,
            max_attempts: row.max_attempts as i32,
            parent_job_id: row.parent_job_id,
            user_initiated: row.user_initiated,
            timeout_seconds: row.timeout_seconds,
            created_at: row.created_at,
            queued_at: row.queued_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            timeout_at: row.timeout_at,
        })
    }
}

/// A whole-field-group update, applied in a single statement.
///
/// `expect_status` makes the statement conditional on the row's current
/// status; when the guard misses, [`SqliteJobStore::update`] returns
/// `None` and the row is untouched. The `clear_*` methods set a column
/// back to NULL, which plain absence of a setter never does.
#[derive(Debug, Clone, Default)]
pub struct JobUpdate {
    status: Option<JobStatus>,
    expected_status: Option<JobStatus>,
    progress: Option<i32>,
    attempts: Option<i32>,
    payload: Option<Value>,
    result: Option<Option<Value>>,
    error: Option<Option<String>>,
    queued_at: Option<Option<DateTime<Utc>>>,
    started_at: Option<Option<DateTime<Utc>>>,
    completed_at: Option<Option<DateTime<Utc>>>,
    timeout_at: Option<Option<DateTime<Utc>>>,
}

impl JobUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: JobStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Only apply the update if the row currently has this status
    pub fn expect_status(mut self, status: JobStatus) -> Self {
        self.expected_status = Some(status);
        self
    }

    pub fn progress(mut self, progress: i32) -> Self {
        self.progress = Some(progress.clamp(0, 100));
        self
    }

    pub fn attempts(mut self, attempts: i32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn result(mut self, result: Value) -> Self {
        self.result = Some(Some(result));
        self
    }

    pub fn clear_result(mut self) -> Self {
        self.result = Some(None);
        self
    }

    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(Some(error.into()));
        self
    }

    pub fn clear_error(mut self) -> Self {
        self.error = Some(None);
        self
    }

    pub fn queued_at(mut self, at: DateTime<Utc>) -> Self {
        self.queued_at = Some(Some(at));
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(Some(at));
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(Some(at));
        self
    }

    pub fn clear_completed_at(mut self) -> Self {
        self.completed_at = Some(None);
        self
    }

    pub fn timeout_at(mut self, at: DateTime<Utc>) -> Self {
        self.timeout_at = Some(Some(at));
        self
    }

    pub fn clear_timeout_at(mut self) -> Self {
        self.timeout_at = Some(None);
        self
    }

    fn is_empty(&self) -> bool {
        self.status.is_none()
            && self.progress.is_none()
            && self.attempts.is_none()
            && self.payload.is_none()
            && self.result.is_none()
            && self.error.is_none()
            && self.queued_at.is_none()
            && self.started_at.is_none()
            && self.completed_at.is_none()
            && self.timeout_at.is_none()
    }
}

/// Repository over the `jobs` table
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if missing) the database at `database_url`
    /// (e.g. `sqlite:///home/dj/.deckhand/deckhand.db`), sizing the pool
    /// and the busy wait from the caller's configuration
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        busy_timeout: Duration,
    ) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(StoreError::Database)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(busy_timeout);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;
        Ok(Self::new(pool))
    }

    /// The underlying pool, shared with the track catalog
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the jobs table and its indexes if they do not exist yet
    pub async fn init_schema(&self) -> StoreResult<()> {
        for statement in [
            CREATE_JOBS_TABLE,
            CREATE_STATUS_INDEX,
            CREATE_PARENT_INDEX,
            CREATE_QUEUE_ORDER_INDEX,
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    #[tracing::instrument(skip(self, job), fields(job_id = %job.id, job_type = %job.job_type))]
    pub async fn insert(&self, job: &Job) -> StoreResult<()> {
        let payload = serde_json::to_string(&job.payload)?;
        let result = job
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO jobs (
                id, job_type, status, priority, payload, progress, result, error,
                attempts, max_attempts, parent_job_id, user_initiated, timeout_seconds,
                created_at, queued_at, started_at, completed_at, timeout_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&job.id)
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(payload)
        .bind(job.progress)
        .bind(result)
        .bind(&job.error)
        .bind(job.attempts)
        .bind(job.max_attempts)
        .bind(&job.parent_job_id)
        .bind(job.user_initiated)
        .bind(job.timeout_seconds)
        .bind(job.created_at)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.timeout_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply a field-group update and return the updated row, or `None`
    /// when the row is missing or the status guard missed
    pub async fn update(&self, id: &str, update: JobUpdate) -> StoreResult<Option<Job>> {
        if update.is_empty() {
            return self.get(id).await;
        }

        // Serialize JSON fields up front so the builder below is pure SQL
        let payload_raw = update
            .payload
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let result_raw: Option<Option<String>> = match &update.result {
            None => None,
            Some(None) => Some(None),
            Some(Some(value)) => Some(Some(serde_json::to_string(value)?)),
        };

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE jobs SET ");
        {
            let mut set = qb.separated(", ");
            if let Some(status) = update.status {
                set.push("status = ");
                set.push_bind_unseparated(status.as_str());
            }
            if let Some(progress) = update.progress {
                set.push("progress = ");
                set.push_bind_unseparated(progress);
            }
            if let Some(attempts) = update.attempts {
                set.push("attempts = ");
                set.push_bind_unseparated(attempts);
            }
            if let Some(raw) = payload_raw {
                set.push("payload = ");
                set.push_bind_unseparated(raw);
            }
            match result_raw {
                None => {}
                Some(None) => {
                    set.push("result = NULL");
                }
                Some(Some(raw)) => {
                    set.push("result = ");
                    set.push_bind_unseparated(raw);
                }
            }
            match update.error {
                None => {}
                Some(None) => {
                    set.push("error = NULL");
                }
                Some(Some(error)) => {
                    set.push("error = ");
                    set.push_bind_unseparated(error);
                }
            }
            for (column, field) in [
                ("queued_at", update.queued_at),
                ("started_at", update.started_at),
                ("completed_at", update.completed_at),
                ("timeout_at", update.timeout_at),
            ] {
                match field {
                    None => {}
                    Some(None) => {
                        set.push(format!("{column} = NULL"));
                    }
                    Some(Some(at)) => {
                        set.push(format!("{column} = "));
                        set.push_bind_unseparated(at);
                    }
                }
            }
        }

        qb.push(" WHERE id = ");
        qb.push_bind(id);
        if let Some(expected) = update.expected_status {
            qb.push(" AND status = ");
            qb.push_bind(expected.as_str());
        }
        qb.push(" RETURNING ");
        qb.push(JOB_COLUMNS);

        let row: Option<JobRow> = qb.build_query_as().fetch_optional(&self.pool).await?;
        row.map(Job::try_from).transpose()
    }

    /// Monotonic progress write; only touches rows that are still running.
    /// Returns the stored progress, or `None` when the row was not running.
    pub async fn update_progress(&self, id: &str, progress: i32) -> StoreResult<Option<i32>> {
        let clamped = progress.clamp(0, 100);
        let row: Option<(i64,)> = sqlx::query_as(
            "UPDATE jobs SET progress = MAX(progress, ?) \
             WHERE id = ? AND status = 'running' RETURNING progress",
        )
        .bind(clamped)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(p,)| p as i32))
    }

    pub async fn get(&self, id: &str) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Job::try_from).transpose()
    }

    pub async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    pub async fn list_by_parent(&self, parent_id: &str) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE parent_job_id = ? ORDER BY created_at ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// User-facing job history, most recent first
    pub async fn list_user_initiated(&self) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE user_initiated = 1 ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Queued and running jobs, the set `abort_all_jobs` tears down
    pub async fn list_active(&self) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status IN ('queued', 'running') ORDER BY created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// The next job admission would dispatch: first by priority, then age
    pub async fn next_queued(&self) -> StoreResult<Option<Job>> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'queued' \
             ORDER BY priority ASC, created_at ASC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;
        row.map(Job::try_from).transpose()
    }

    /// Running jobs that count against the concurrency limit. Batch parents
    /// supervise children instead of doing work, so they are excluded.
    pub async fn count_running_leaf(&self) -> StoreResult<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE status = 'running' \
             AND job_type NOT IN ('batch_analyze', 'batch_export')",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    pub async fn count_by_status(&self) -> StoreResult<QueueStats> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut stats = QueueStats::default();
        for (status, count) in rows {
            let status = JobStatus::from_str(&status)
                .map_err(|_| StoreError::corrupt("<stats>", format!("unknown status '{status}'")))?;
            stats.record(status, count.max(0) as u64);
        }
        Ok(stats)
    }

    /// Queued jobs whose previously computed timeout window has already
    /// elapsed; recovery marks these timed out without dispatching them
    pub async fn list_queued_timed_out(&self, now: DateTime<Utc>) -> StoreResult<Vec<Job>> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'queued' \
             AND timeout_at IS NOT NULL AND timeout_at < ? ORDER BY created_at ASC"
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Job::try_from).collect()
    }

    /// Retention sweep: drop terminal jobs finished before `cutoff`.
    /// Returns the number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_terminal_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed', 'cancelled', 'timeout') \
             AND completed_at IS NOT NULL AND completed_at < ?",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
