//! Worker pool behavior under a paused clock: retries, backoff, the
//! concurrency bound, polling, and drain-only shutdown.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use site_ingest::error::{PoolError, StoreResult};
use site_ingest::testing::MockExtractor;
use site_ingest::{
    CrawlJob, JobCounts, JobStatus, JobStore, JobUpdate, MemoryJobStore, PoolConfig, WorkerPool,
};
use tokio::sync::mpsc;
use uuid::Uuid;

const URL: &str = "https://example.com/blog/flaky-post";

fn pool_with(store: Arc<dyn JobStore>, extractor: MockExtractor, n: usize) -> WorkerPool {
    WorkerPool::new(
        store,
        Arc::new(extractor),
        PoolConfig::default().with_max_concurrency(n),
    )
}

#[tokio::test(start_paused = true)]
async fn two_transient_failures_then_success() {
    let store = Arc::new(MemoryJobStore::new());
    let extractor = MockExtractor::new().fail_times(URL, 2);
    let job = store.enqueue(CrawlJob::new(URL, "team")).await.unwrap();
    let pool = pool_with(store.clone(), extractor.clone(), 2);

    let started = tokio::time::Instant::now();
    let outcome = pool.submit(&job).await.unwrap().outcome().await.unwrap();

    assert_eq!(outcome.status, JobStatus::Completed);
    assert_eq!(outcome.retry_count, 2);
    assert_eq!(outcome.attempts, 3);
    assert!(outcome.error.is_none());

    let stored = store.require(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.retry_count, 2);
    assert_eq!(
        stored.error_message.as_deref(),
        Some(MockExtractor::failure_message(URL, 2).as_str())
    );

    // Backoff of 1s then 2s.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(extractor.attempts(URL), 3);
    assert_eq!(pool.stats().retried, 2);
}

#[tokio::test(start_paused = true)]
async fn four_failures_exhaust_retries() {
    let store = Arc::new(MemoryJobStore::new());
    let extractor = MockExtractor::new().fail_times(URL, 4);
    let job = store.enqueue(CrawlJob::new(URL, "team")).await.unwrap();
    let pool = pool_with(store.clone(), extractor.clone(), 2);

    let outcome = pool.submit(&job).await.unwrap().outcome().await.unwrap();

    assert_eq!(outcome.status, JobStatus::Failed);
    assert_eq!(outcome.retry_count, 3);
    assert_eq!(outcome.attempts, 4);
    let last = MockExtractor::failure_message(URL, 4);
    assert_eq!(outcome.error.as_deref(), Some(last.as_str()));

    let stored = store.require(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some(last.as_str()));
    assert_eq!(extractor.attempts(URL), 4);
    assert_eq!(pool.stats().failed, 1);
}

/// Delegating store that tracks how many jobs are `processing` at once.
#[derive(Default)]
struct ObservedStore {
    inner: MemoryJobStore,
    processing: AtomicUsize,
    max_processing: AtomicUsize,
}

#[async_trait]
impl JobStore for ObservedStore {
    async fn enqueue(&self, job: CrawlJob) -> StoreResult<CrawlJob> {
        self.inner.enqueue(job).await
    }

    async fn transition(&self, id: Uuid, status: JobStatus, update: JobUpdate) -> StoreResult<CrawlJob> {
        let before = self.inner.get(id).await?.map(|j| j.status);
        let job = self.inner.transition(id, status, update).await?;
        if status == JobStatus::Processing {
            let now = self.processing.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_processing.fetch_max(now, Ordering::SeqCst);
        } else if before == Some(JobStatus::Processing) {
            self.processing.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> StoreResult<Option<CrawlJob>> {
        self.inner.get(id).await
    }

    async fn list_pending(&self, limit: usize) -> StoreResult<Vec<CrawlJob>> {
        self.inner.list_pending(limit).await
    }

    async fn list_by_status(&self, status: JobStatus) -> StoreResult<Vec<CrawlJob>> {
        self.inner.list_by_status(status).await
    }

    async fn list_by_team(&self, team_id: &str) -> StoreResult<Vec<CrawlJob>> {
        self.inner.list_by_team(team_id).await
    }

    async fn purge_older_than(&self, days: u32) -> StoreResult<usize> {
        self.inner.purge_older_than(days).await
    }

    async fn counts(&self) -> StoreResult<JobCounts> {
        self.inner.counts().await
    }

    async fn reset_in_flight(&self) -> StoreResult<usize> {
        self.inner.reset_in_flight().await
    }
}

#[tokio::test(start_paused = true)]
async fn never_more_than_n_jobs_processing() {
    let store = Arc::new(ObservedStore::default());
    let extractor = MockExtractor::new().with_delay(Duration::from_millis(100));
    let pool = pool_with(store.clone(), extractor.clone(), 3);

    let mut handles = Vec::new();
    for i in 0..10 {
        let job = store
            .enqueue(CrawlJob::new(format!("https://example.com/blog/post-{i}"), "team"))
            .await
            .unwrap();
        handles.push(pool.submit(&job).await.unwrap());
    }
    for handle in handles {
        assert!(handle.outcome().await.unwrap().is_success());
    }

    assert_eq!(store.max_processing.load(Ordering::SeqCst), 3);
    assert_eq!(extractor.max_concurrent(), 3);
    assert_eq!(store.counts().await.unwrap().completed, 10);
    assert_eq!(pool.stats().in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn retry_count_never_decreases() {
    let store = Arc::new(MemoryJobStore::new());
    let extractor = MockExtractor::new()
        .fail_times(URL, 2)
        .with_delay(Duration::from_millis(10));
    let job = store.enqueue(CrawlJob::new(URL, "team")).await.unwrap();
    let pool = pool_with(store.clone(), extractor, 1);

    let handle = pool.submit(&job).await.unwrap();
    let mut last = 0;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let current = store.require(job.id).await.unwrap();
        assert!(current.retry_count >= last);
        assert!(current.retry_count <= 3);
        last = current.retry_count;
        if current.is_terminal() {
            break;
        }
    }
    assert!(handle.outcome().await.unwrap().is_success());
}

#[tokio::test(start_paused = true)]
async fn poller_picks_up_stored_jobs() {
    let store = Arc::new(MemoryJobStore::new());
    for i in 0..3 {
        store
            .enqueue(CrawlJob::new(format!("https://example.com/news/item-{i}"), "team"))
            .await
            .unwrap();
    }

    let (tx, mut rx) = mpsc::channel(8);
    let pool = pool_with(store.clone(), MockExtractor::new(), 2).with_outcome_sender(tx);
    pool.start_polling();

    let mut completed = 0;
    while completed < 3 {
        let outcome = rx.recv().await.unwrap();
        assert!(outcome.is_success());
        assert!(outcome.document.is_some());
        completed += 1;
    }

    pool.shutdown().await;
    assert_eq!(store.counts().await.unwrap().completed, 3);
}

#[tokio::test(start_paused = true)]
async fn shutdown_drains_in_flight_and_rejects_new_work() {
    let store = Arc::new(MemoryJobStore::new());
    let extractor = MockExtractor::new().with_delay(Duration::from_secs(1));
    let first = store
        .enqueue(CrawlJob::new("https://example.com/blog/first-post", "team"))
        .await
        .unwrap();
    let second = store
        .enqueue(CrawlJob::new("https://example.com/blog/second-post", "team"))
        .await
        .unwrap();
    let pool = pool_with(store.clone(), extractor.clone(), 1);

    let first_handle = pool.submit(&first).await.unwrap();
    let second_handle = pool.submit(&second).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        store.require(first.id).await.unwrap().status,
        JobStatus::Processing
    );

    pool.shutdown().await;

    assert!(first_handle.outcome().await.unwrap().is_success());
    assert_eq!(second_handle.outcome().await.unwrap().status, JobStatus::Pending);
    assert_eq!(extractor.call_count(), 1);

    let late = store
        .enqueue(CrawlJob::new("https://example.com/blog/late-post", "team"))
        .await
        .unwrap();
    assert!(matches!(pool.submit(&late).await, Err(PoolError::ShuttingDown)));
    assert_eq!(store.require(late.id).await.unwrap().status, JobStatus::Pending);
}

#[tokio::test(start_paused = true)]
async fn retry_waiting_at_shutdown_stays_pending() {
    let store = Arc::new(MemoryJobStore::new());
    let extractor = MockExtractor::new().fail_times(URL, 1);
    let job = store.enqueue(CrawlJob::new(URL, "team")).await.unwrap();
    let pool = pool_with(store.clone(), extractor.clone(), 1);

    let handle = pool.submit(&job).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    pool.shutdown().await;

    let outcome = handle.outcome().await.unwrap();
    assert_eq!(outcome.status, JobStatus::Pending);
    assert_eq!(outcome.retry_count, 1);
    assert_eq!(extractor.attempts(URL), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let stored = store.require(job.id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert_eq!(stored.retry_count, 1);
    assert_eq!(extractor.attempts(URL), 1);
}

#[tokio::test(start_paused = true)]
async fn terminal_jobs_cannot_be_resubmitted() {
    let store = Arc::new(MemoryJobStore::new());
    let job = store.enqueue(CrawlJob::new(URL, "team")).await.unwrap();
    let pool = pool_with(store.clone(), MockExtractor::new(), 1);

    pool.submit(&job).await.unwrap().outcome().await.unwrap();
    let err = pool.submit(&job).await.unwrap_err();
    assert!(matches!(err, PoolError::Store(_)));
}
