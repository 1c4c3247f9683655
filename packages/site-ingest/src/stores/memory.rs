//! In-memory job store for testing and development.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::traits::store::JobStore;
use crate::types::job::{CrawlJob, JobCounts, JobStatus, JobUpdate};

/// In-memory job ledger.
///
/// Every operation takes the lock once and releases it before returning, so
/// transitions are atomic and no lock is held across an await point. Data is
/// lost on restart; use `SqliteJobStore` for durability.
#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, CrawlJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Overwrite a job's timestamps (for retention tests).
    pub fn backdate(&self, id: Uuid, days: i64) {
        if let Some(job) = self.jobs.write().unwrap().get_mut(&id) {
            job.updated_at = Utc::now() - Duration::days(days);
            job.created_at = job.updated_at;
        }
    }

    fn sorted(mut jobs: Vec<CrawlJob>) -> Vec<CrawlJob> {
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        jobs
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn enqueue(&self, job: CrawlJob) -> StoreResult<CrawlJob> {
        match self.jobs.write().unwrap().entry(job.id) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists { id: job.id }),
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                Ok(job)
            }
        }
    }

    async fn transition(
        &self,
        id: Uuid,
        status: JobStatus,
        update: JobUpdate,
    ) -> StoreResult<CrawlJob> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs.get_mut(&id).ok_or(StoreError::NotFound { id })?;

        if !job.status.can_transition_to(status) {
            return Err(StoreError::InvalidTransition {
                id,
                from: job.status,
                to: status,
            });
        }

        job.apply(status, &update, Utc::now());
        Ok(job.clone())
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<CrawlJob>> {
        Ok(self.jobs.read().unwrap().get(&id).cloned())
    }

    async fn list_pending(&self, limit: usize) -> StoreResult<Vec<CrawlJob>> {
        let mut pending = self.list_by_status(JobStatus::Pending).await?;
        pending.truncate(limit);
        Ok(pending)
    }

    async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<CrawlJob>> {
        let jobs = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.status == status)
            .cloned()
            .collect();
        Ok(Self::sorted(jobs))
    }

    async fn list_by_team(&self, team_id: &str) -> StoreResult<Vec<CrawlJob>> {
        let jobs = self
            .jobs
            .read()
            .unwrap()
            .values()
            .filter(|j| j.team_id == team_id)
            .cloned()
            .collect();
        Ok(Self::sorted(jobs))
    }

    async fn purge_older_than(&self, days: u32) -> StoreResult<usize> {
        let cutoff = Utc::now() - Duration::days(i64::from(days));
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| !(j.is_terminal() && j.updated_at < cutoff));
        Ok(before - jobs.len())
    }

    async fn counts(&self) -> StoreResult<JobCounts> {
        let mut counts = JobCounts::default();
        for job in self.jobs.read().unwrap().values() {
            counts.add(job.status, 1);
        }
        Ok(counts)
    }

    async fn reset_in_flight(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let mut reset = 0;
        for job in self.jobs.write().unwrap().values_mut() {
            if job.status == JobStatus::Processing {
                job.apply(JobStatus::Pending, &JobUpdate::none(), now);
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transition_unknown_id_is_not_found() {
        let store = MemoryJobStore::new();
        let err = store
            .transition(Uuid::now_v7(), JobStatus::Processing, JobUpdate::none())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_is_rejected() {
        let store = MemoryJobStore::new();
        let job = store
            .enqueue(CrawlJob::new("https://example.com/a", "team"))
            .await
            .unwrap();
        store
            .transition(job.id, JobStatus::Processing, JobUpdate::none())
            .await
            .unwrap();

        let err = store.enqueue(job.clone()).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { id } if id == job.id));
        assert_eq!(store.require(job.id).await.unwrap().status, JobStatus::Processing);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_transition_writes_nothing() {
        let store = MemoryJobStore::new();
        let job = store
            .enqueue(CrawlJob::new("https://example.com/a", "team"))
            .await
            .unwrap();

        let err = store
            .transition(job.id, JobStatus::Completed, JobUpdate::failure("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));

        let stored = store.require(job.id).await.unwrap();
        assert_eq!(stored, job);
    }

    #[tokio::test]
    async fn test_second_claim_loses() {
        let store = MemoryJobStore::new();
        let job = store
            .enqueue(CrawlJob::new("https://example.com/a", "team"))
            .await
            .unwrap();

        store
            .transition(job.id, JobStatus::Processing, JobUpdate::none())
            .await
            .unwrap();
        let second = store
            .transition(job.id, JobStatus::Processing, JobUpdate::none())
            .await;
        assert!(matches!(second, Err(StoreError::InvalidTransition { .. })));
    }

    #[tokio::test]
    async fn test_list_pending_is_oldest_first_and_limited() {
        let store = MemoryJobStore::new();
        let mut ids = Vec::new();
        for i in 0..5 {
            let job = store
                .enqueue(CrawlJob::new(format!("https://example.com/{i}"), "team"))
                .await
                .unwrap();
            ids.push(job.id);
        }

        let pending = store.list_pending(3).await.unwrap();
        let listed: Vec<Uuid> = pending.iter().map(|j| j.id).collect();
        assert_eq!(listed, ids[..3].to_vec());
    }

    #[tokio::test]
    async fn test_list_by_team() {
        let store = MemoryJobStore::new();
        store.enqueue(CrawlJob::new("https://a.com/1", "red")).await.unwrap();
        store.enqueue(CrawlJob::new("https://a.com/2", "blue")).await.unwrap();
        store.enqueue(CrawlJob::new("https://a.com/3", "red")).await.unwrap();

        let red = store.list_by_team("red").await.unwrap();
        assert_eq!(red.len(), 2);
        assert!(red.iter().all(|j| j.team_id == "red"));
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_terminal_jobs_and_is_idempotent() {
        let store = MemoryJobStore::new();

        let old_done = store.enqueue(CrawlJob::new("https://a.com/1", "t")).await.unwrap();
        store.transition(old_done.id, JobStatus::Processing, JobUpdate::none()).await.unwrap();
        store.transition(old_done.id, JobStatus::Completed, JobUpdate::none()).await.unwrap();
        store.backdate(old_done.id, 40);

        let old_pending = store.enqueue(CrawlJob::new("https://a.com/2", "t")).await.unwrap();
        store.backdate(old_pending.id, 40);

        let fresh_failed = store.enqueue(CrawlJob::new("https://a.com/3", "t")).await.unwrap();
        store
            .transition(fresh_failed.id, JobStatus::Failed, JobUpdate::failure("gone"))
            .await
            .unwrap();

        assert_eq!(store.purge_older_than(30).await.unwrap(), 1);
        assert_eq!(store.purge_older_than(30).await.unwrap(), 0);

        assert!(store.get(old_done.id).await.unwrap().is_none());
        assert!(store.get(old_pending.id).await.unwrap().is_some());
        assert!(store.get(fresh_failed.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_reset_in_flight() {
        let store = MemoryJobStore::new();
        let job = store.enqueue(CrawlJob::new("https://a.com/1", "t")).await.unwrap();
        store.transition(job.id, JobStatus::Processing, JobUpdate::none()).await.unwrap();

        assert_eq!(store.reset_in_flight().await.unwrap(), 1);
        let job = store.require(job.id).await.unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 0);

        let counts = store.counts().await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.total(), 1);
    }
}
