//! SQLite job store.
//!
//! A file-based ledger. Good for:
//! - Single-server deployments
//! - Local development
//! - Testing with persistent data
//!
//! Status changes are single `UPDATE ... WHERE status IN (..) RETURNING`
//! statements, so validation and write happen atomically in the database.

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::JobStore;
use crate::types::job::{CrawlJob, JobCounts, JobStatus, JobUpdate};

/// Version of the `crawl_jobs` layout recorded in `store_meta`.
pub const SCHEMA_VERSION: i64 = 1;

const JOB_COLUMNS: &str = "id, url, team_id, status, retry_count, error_message, depth, parent_url, created_at, updated_at";

pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    /// Open (creating if needed) a store at the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://./data/jobs.db?mode=rwc` - File-based, create if missing
    /// - `sqlite::memory:` - In-memory database (ephemeral)
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(db_error)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(db_error)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// An in-memory store (for testing).
    ///
    /// Uses one connection: every in-memory connection is its own database.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(db_error)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS store_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                schema_version INTEGER NOT NULL,
                created_at TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        sqlx::query(
            r#"
            INSERT INTO store_meta (id, schema_version, created_at)
            VALUES (1, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(SCHEMA_VERSION)
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let version: i64 = sqlx::query_scalar("SELECT schema_version FROM store_meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        if version != SCHEMA_VERSION {
            return Err(StoreError::Corrupt(format!(
                "store schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_jobs (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                team_id TEXT NOT NULL,
                status TEXT NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                depth INTEGER,
                parent_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_jobs_status ON crawl_jobs(status, created_at);
            CREATE INDEX IF NOT EXISTS idx_crawl_jobs_team ON crawl_jobs(team_id);
            CREATE INDEX IF NOT EXISTS idx_crawl_jobs_updated ON crawl_jobs(updated_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// When this ledger was first created.
    pub async fn created_at(&self) -> StoreResult<DateTime<Utc>> {
        let raw: String = sqlx::query_scalar("SELECT created_at FROM store_meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        parse_timestamp(&raw)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn fetch_where(&self, clause: &str, bind: &str) -> StoreResult<Vec<CrawlJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE {clause} ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(bind)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }
}

// Row type for sqlx queries
#[derive(Debug, FromRow)]
struct JobRow {
    id: String,
    url: String,
    team_id: String,
    status: String,
    retry_count: i64,
    error_message: Option<String>,
    depth: Option<i64>,
    parent_url: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn into_job(self) -> StoreResult<CrawlJob> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| StoreError::Corrupt(format!("invalid id {}: {}", self.id, e)))?;
        let status = self.status.parse::<JobStatus>().map_err(StoreError::Corrupt)?;
        let retry_count = u32::try_from(self.retry_count)
            .map_err(|_| StoreError::Corrupt(format!("invalid retry_count {}", self.retry_count)))?;
        let depth = self
            .depth
            .map(|d| u32::try_from(d).map_err(|_| StoreError::Corrupt(format!("invalid depth {d}"))))
            .transpose()?;

        Ok(CrawlJob {
            id,
            url: self.url,
            team_id: self.team_id,
            status,
            retry_count,
            error_message: self.error_message,
            depth,
            parent_url: self.parent_url,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

/// Fixed-width UTC timestamps compare correctly as strings.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("invalid timestamp {raw}: {e}")))
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(Box::new(e))
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn enqueue(&self, job: CrawlJob) -> StoreResult<CrawlJob> {
        sqlx::query(
            r#"
            INSERT INTO crawl_jobs (id, url, team_id, status, retry_count, error_message, depth, parent_url, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(job.id.to_string())
        .bind(&job.url)
        .bind(&job.team_id)
        .bind(job.status.as_str())
        .bind(i64::from(job.retry_count))
        .bind(&job.error_message)
        .bind(job.depth.map(i64::from))
        .bind(&job.parent_url)
        .bind(timestamp(job.created_at))
        .bind(timestamp(job.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                StoreError::AlreadyExists { id: job.id }
            }
            other => db_error(other),
        })?;

        Ok(job)
    }

    async fn transition(
        &self,
        id: Uuid,
        status: JobStatus,
        update: JobUpdate,
    ) -> StoreResult<CrawlJob> {
        let allowed = status
            .predecessors()
            .iter()
            .map(|s| format!("'{}'", s.as_str()))
            .collect::<Vec<_>>()
            .join(", ");

        let sql = format!(
            r#"
            UPDATE crawl_jobs
            SET status = ?,
                retry_count = retry_count + ?,
                error_message = COALESCE(?, error_message),
                updated_at = ?
            WHERE id = ? AND status IN ({allowed})
            RETURNING {JOB_COLUMNS}
            "#
        );

        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(status.as_str())
            .bind(i64::from(update.bump_retry))
            .bind(&update.error_message)
            .bind(timestamp(Utc::now()))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match row {
            Some(row) => row.into_job(),
            None => match self.get(id).await? {
                None => Err(StoreError::NotFound { id }),
                Some(current) => Err(StoreError::InvalidTransition {
                    id,
                    from: current.status,
                    to: status,
                }),
            },
        }
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<CrawlJob>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE id = ?");
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(JobRow::into_job).transpose()
    }

    async fn list_pending(&self, limit: usize) -> StoreResult<Vec<CrawlJob>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM crawl_jobs WHERE status = 'pending' ORDER BY created_at, id LIMIT ?"
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(JobRow::into_job).collect()
    }

    async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<CrawlJob>> {
        self.fetch_where("status = ?", status.as_str()).await
    }

    async fn list_by_team(&self, team_id: &str) -> StoreResult<Vec<CrawlJob>> {
        self.fetch_where("team_id = ?", team_id).await
    }

    async fn purge_older_than(&self, days: u32) -> StoreResult<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let result = sqlx::query(
            "DELETE FROM crawl_jobs WHERE status IN ('completed', 'failed') AND updated_at < ?",
        )
        .bind(timestamp(cutoff))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }

    async fn counts(&self) -> StoreResult<JobCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM crawl_jobs GROUP BY status")
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        let mut counts = JobCounts::default();
        for (status, n) in rows {
            let status = status.parse::<JobStatus>().map_err(StoreError::Corrupt)?;
            counts.add(status, n as usize);
        }
        Ok(counts)
    }

    async fn reset_in_flight(&self) -> StoreResult<usize> {
        let result = sqlx::query(
            "UPDATE crawl_jobs SET status = 'pending', updated_at = ? WHERE status = 'processing'",
        )
        .bind(timestamp(Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() as usize)
    }
}
