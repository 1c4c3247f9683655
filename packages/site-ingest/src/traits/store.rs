//! Job store trait: the durable ledger of extraction jobs.
//!
//! The store is the single source of truth for job status. Every read
//! reflects all writes committed before it, and every mutation of a job goes
//! through [`JobStore::transition`], which validates and applies the change
//! atomically. Two workers racing to claim or finish the same job therefore
//! serialize here: the loser gets [`StoreError::InvalidTransition`].

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::types::job::{CrawlJob, JobCounts, JobStatus, JobUpdate};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new job. Returns the stored copy; a reused id fails with
    /// [`StoreError::AlreadyExists`].
    async fn enqueue(&self, job: CrawlJob) -> StoreResult<CrawlJob>;

    /// Move a job to `status`, applying `update`, and refresh `updated_at`.
    ///
    /// Unknown ids fail with [`StoreError::NotFound`]; illegal moves fail
    /// with [`StoreError::InvalidTransition`]. Neither writes anything.
    async fn transition(
        &self,
        id: Uuid,
        status: JobStatus,
        update: JobUpdate,
    ) -> StoreResult<CrawlJob>;

    async fn get(&self, id: Uuid) -> StoreResult<Option<CrawlJob>>;

    /// Oldest pending jobs first, at most `limit`.
    async fn list_pending(&self, limit: usize) -> StoreResult<Vec<CrawlJob>>;

    async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<CrawlJob>>;

    async fn list_by_team(&self, team_id: &str) -> StoreResult<Vec<CrawlJob>>;

    /// Delete terminal jobs whose `updated_at` is older than `days` days.
    /// Non-terminal jobs are never purged. Returns the number removed.
    async fn purge_older_than(&self, days: u32) -> StoreResult<usize>;

    async fn counts(&self) -> StoreResult<JobCounts>;

    /// Return jobs stranded in `processing` (a crashed worker) to `pending`.
    async fn reset_in_flight(&self) -> StoreResult<usize>;

    /// Get a job or fail with `NotFound`.
    async fn require(&self, id: Uuid) -> StoreResult<CrawlJob> {
        self.get(id).await?.ok_or(StoreError::NotFound { id })
    }

    /// Enqueue several jobs, stopping at the first failure.
    async fn enqueue_all(&self, jobs: Vec<CrawlJob>) -> StoreResult<Vec<CrawlJob>> {
        let mut stored = Vec::with_capacity(jobs.len());
        for job in jobs {
            stored.push(self.enqueue(job).await?);
        }
        Ok(stored)
    }
}
