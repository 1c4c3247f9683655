//! Bounded-concurrency worker pool over the job store.
//!
//! The `WorkerPool` is a long-running service that:
//! - Admits jobs through [`WorkerPool::submit`] or its own poll loop
//! - Runs at most `N` extractions at once (a counting semaphore)
//! - Moves every job through the store's atomic `transition`
//! - Retries failures with exponential backoff via a delay queue
//! - Drains in-flight work on shutdown without cancelling it
//!
//! # Architecture
//!
//! ```text
//! WorkerPool
//!     │
//!     ├─► submit / enqueue_and_submit / poll loop ─► admit (claimed set, waiter)
//!     ├─► execution task: permit ─► pending→processing ─► Extractor.extract
//!     │       ├─► ok:   processing→completed, resolve outcome
//!     │       ├─► err:  processing→pending (+retry, error) ─► ScheduledRetry
//!     │       └─► last: processing→failed, resolve outcome
//!     └─► retry scheduler (DelayQueue) ─► resume execution when due
//! ```
//!
//! Shutdown is drain-only: in-flight extractions run to completion, which can
//! make shutdown as slow as the slowest extraction.

mod poller;
pub mod retry;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::PoolConfig;
use crate::error::{PoolError, PoolResult, StoreError};
use crate::traits::{Extractor, JobStore};
use crate::types::document::Document;
use crate::types::job::{CrawlJob, JobStatus, JobUpdate};

pub use retry::{RetryPolicy, ScheduledRetry};

/// The final word on one job, as seen by the pool.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job_id: Uuid,
    pub url: String,
    pub team_id: String,
    /// `Completed` or `Failed`; `Pending` only when the pool shut down while
    /// the job waited for a retry.
    pub status: JobStatus,
    #[serde(skip)]
    pub document: Option<Document>,
    /// Last failure reason, for jobs that did not complete.
    pub error: Option<String>,
    pub retry_count: u32,
    pub attempts: u32,
}

impl JobOutcome {
    fn from_job(job: &CrawlJob, document: Option<Document>) -> Self {
        let error = match job.status {
            JobStatus::Completed => None,
            _ => job.error_message.clone(),
        };
        Self {
            job_id: job.id,
            url: job.url.clone(),
            team_id: job.team_id.clone(),
            status: job.status,
            document,
            error,
            retry_count: job.retry_count,
            attempts: job.retry_count + 1,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// Resolves once the submitted job reaches a terminal state.
#[derive(Debug)]
pub struct JobHandle {
    job_id: Uuid,
    rx: oneshot::Receiver<JobOutcome>,
}

impl JobHandle {
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    pub async fn outcome(self) -> PoolResult<JobOutcome> {
        self.rx.await.map_err(|_| PoolError::ShuttingDown)
    }
}

/// Snapshot of pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
    pub retried: usize,
    pub in_flight: usize,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
    retried: AtomicUsize,
    in_flight: AtomicUsize,
}

pub(crate) struct PoolInner {
    store: Arc<dyn JobStore>,
    extractor: Arc<dyn Extractor>,
    config: PoolConfig,
    policy: RetryPolicy,
    permits: Arc<Semaphore>,
    shutting_down: AtomicBool,
    cancel: CancellationToken,
    tracker: TaskTracker,
    /// Jobs running, queued for a permit, or waiting for a retry.
    claimed: Mutex<HashSet<Uuid>>,
    waiters: Mutex<HashMap<Uuid, oneshot::Sender<JobOutcome>>>,
    outcomes: Mutex<Option<mpsc::Sender<JobOutcome>>>,
    retries: mpsc::UnboundedSender<ScheduledRetry>,
    counters: Counters,
}

#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create a pool and start its retry scheduler. Must be called inside a
    /// tokio runtime. The poll loop is started separately with
    /// [`start_polling`](Self::start_polling).
    pub fn new(store: Arc<dyn JobStore>, extractor: Arc<dyn Extractor>, config: PoolConfig) -> Self {
        let (retries, incoming) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let inner = Arc::new(PoolInner {
            permits: Arc::new(Semaphore::new(config.max_concurrency.max(1))),
            policy: RetryPolicy::from_config(&config),
            store,
            extractor,
            config,
            shutting_down: AtomicBool::new(false),
            cancel: cancel.clone(),
            tracker: tracker.clone(),
            claimed: Mutex::new(HashSet::new()),
            waiters: Mutex::new(HashMap::new()),
            outcomes: Mutex::new(None),
            retries,
            counters: Counters::default(),
        });

        tokio::spawn(retry::run_scheduler(Arc::downgrade(&inner), incoming, cancel));

        Self { inner }
    }

    /// Forward outcomes of jobs that have no [`JobHandle`] (poller-admitted).
    pub fn with_outcome_sender(self, sender: mpsc::Sender<JobOutcome>) -> Self {
        *self.inner.outcomes.lock().unwrap() = Some(sender);
        self
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Admit one stored job for execution.
    ///
    /// Rejected synchronously, with nothing written, when the pool is
    /// shutting down, the job does not exist, is not pending, or is already
    /// scheduled here.
    pub async fn submit(&self, job: &CrawlJob) -> PoolResult<JobHandle> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        let stored = self.inner.store.require(job.id).await?;
        if stored.status != JobStatus::Pending {
            return Err(PoolError::Store(StoreError::InvalidTransition {
                id: job.id,
                from: stored.status,
                to: JobStatus::Processing,
            }));
        }

        let (tx, rx) = oneshot::channel();
        self.inner.admit(job.id, Some(tx))?;
        Ok(JobHandle { job_id: job.id, rx })
    }

    /// Store a new job and admit it in one step.
    ///
    /// The id is claimed before the write, so a running poll loop never picks
    /// the job up ahead of the returned handle. Nothing is stored when the
    /// pool is shutting down.
    pub async fn enqueue_and_submit(&self, job: CrawlJob) -> PoolResult<JobHandle> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        let id = job.id;
        let (tx, rx) = oneshot::channel();
        self.inner.claim(id, Some(tx))?;

        if let Err(e) = self.inner.store.enqueue(job).await {
            self.inner.release(id);
            self.inner.waiters.lock().unwrap().remove(&id);
            return Err(e.into());
        }

        self.inner.counters.submitted.fetch_add(1, Ordering::SeqCst);
        self.inner.spawn_execution(id);
        Ok(JobHandle { job_id: id, rx })
    }

    /// Start the background poll loop.
    pub fn start_polling(&self) {
        let pool = Arc::downgrade(&self.inner);
        let cancel = self.inner.cancel.clone();
        self.inner.tracker.spawn(poller::run(pool, cancel));
    }

    /// One poll cycle: admit up to `2N` pending jobs not already claimed.
    /// Returns how many were admitted.
    pub async fn poll_once(&self) -> PoolResult<usize> {
        self.inner.poll_once().await
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            submitted: c.submitted.load(Ordering::SeqCst),
            completed: c.completed.load(Ordering::SeqCst),
            failed: c.failed.load(Ordering::SeqCst),
            retried: c.retried.load(Ordering::SeqCst),
            in_flight: c.in_flight.load(Ordering::SeqCst),
        }
    }

    /// Stop admitting work, stop polling and retrying, and wait for every
    /// admitted execution to finish. Handles of jobs left waiting for a
    /// retry resolve with the job's stored (pending) state.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            debug!("Worker pool shutdown already requested");
        }
        info!(
            in_flight = self.inner.counters.in_flight.load(Ordering::SeqCst),
            "Worker pool shutting down, draining in-flight jobs"
        );

        self.inner.cancel.cancel();
        self.inner.tracker.close();
        self.inner.tracker.wait().await;

        let leftover: Vec<(Uuid, oneshot::Sender<JobOutcome>)> =
            self.inner.waiters.lock().unwrap().drain().collect();
        for (id, tx) in leftover {
            match self.inner.store.get(id).await {
                Ok(Some(job)) => {
                    let _ = tx.send(JobOutcome::from_job(&job, None));
                }
                Ok(None) => {}
                Err(e) => error!(job_id = %id, error = %e, "Failed to load job at shutdown"),
            }
        }

        info!(stats = ?self.stats(), "Worker pool stopped");
    }
}

impl PoolInner {
    /// Claim `id` for this pool and spawn its execution.
    fn admit(self: &Arc<Self>, id: Uuid, waiter: Option<oneshot::Sender<JobOutcome>>) -> PoolResult<()> {
        self.claim(id, waiter)?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        self.spawn_execution(id);
        Ok(())
    }

    fn claim(&self, id: Uuid, waiter: Option<oneshot::Sender<JobOutcome>>) -> PoolResult<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PoolError::ShuttingDown);
        }
        if !self.claimed.lock().unwrap().insert(id) {
            return Err(PoolError::AlreadyScheduled { id });
        }
        if let Some(tx) = waiter {
            self.waiters.lock().unwrap().insert(id, tx);
        }
        Ok(())
    }

    /// Run a job whose retry delay elapsed.
    pub(crate) fn resume(self: &Arc<Self>, id: Uuid) {
        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }
        self.spawn_execution(id);
    }

    fn spawn_execution(self: &Arc<Self>, id: Uuid) {
        let pool = Arc::clone(self);
        self.tracker.spawn(async move { pool.execute(id).await });
    }

    async fn poll_once(self: &Arc<Self>) -> PoolResult<usize> {
        let pending = self.store.list_pending(self.config.poll_batch()).await?;
        let mut admitted = 0;
        for job in pending {
            if self.claimed.lock().unwrap().contains(&job.id) {
                continue;
            }
            match self.admit(job.id, None) {
                Ok(()) => admitted += 1,
                Err(PoolError::AlreadyScheduled { .. }) => {}
                Err(PoolError::ShuttingDown) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(admitted)
    }

    async fn execute(self: Arc<Self>, id: Uuid) {
        // The permit is held from claim to final write, so at most N jobs
        // are ever `processing` on behalf of this pool.
        let Ok(_permit) = Arc::clone(&self.permits).acquire_owned().await else {
            return;
        };
        // Queued behind the permit when shutdown began: never started, stays pending.
        if self.shutting_down.load(Ordering::SeqCst) {
            self.abandon(id).await;
            return;
        }

        let job = match self.store.transition(id, JobStatus::Processing, JobUpdate::none()).await {
            Ok(job) => job,
            Err(e) => {
                warn!(job_id = %id, error = %e, "Could not claim job");
                self.abandon(id).await;
                return;
            }
        };

        debug!(job_id = %id, url = %job.url, retry_count = job.retry_count, "Job started");
        self.counters.in_flight.fetch_add(1, Ordering::SeqCst);
        let result = self.extractor.extract(&job.url, &job.team_id).await;
        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(document) => {
                match self.store.transition(id, JobStatus::Completed, JobUpdate::none()).await {
                    Ok(done) => {
                        info!(job_id = %id, url = %done.url, retry_count = done.retry_count, "Job completed");
                        self.counters.completed.fetch_add(1, Ordering::SeqCst);
                        self.finish(JobOutcome::from_job(&done, Some(document))).await;
                    }
                    Err(e) => {
                        error!(job_id = %id, error = %e, "Failed to mark job completed");
                        self.abandon(id).await;
                    }
                }
            }
            Err(e) => self.handle_failure(&job, e.to_string()).await,
        }
    }

    async fn handle_failure(self: &Arc<Self>, job: &CrawlJob, message: String) {
        let id = job.id;

        if self.policy.should_retry(job.retry_count) {
            let delay = self.policy.delay_for(job.retry_count);
            match self
                .store
                .transition(id, JobStatus::Pending, JobUpdate::retry(message.clone()))
                .await
            {
                Ok(updated) => {
                    warn!(
                        job_id = %id,
                        url = %job.url,
                        retry_count = updated.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "Job failed, retry scheduled"
                    );
                    self.counters.retried.fetch_add(1, Ordering::SeqCst);
                    if self.retries.send(ScheduledRetry::after(id, delay)).is_err() {
                        // Scheduler gone: leave the job pending for the next run.
                        self.abandon(id).await;
                    }
                }
                Err(e) => {
                    error!(job_id = %id, error = %e, "Failed to return job to pending");
                    self.abandon(id).await;
                }
            }
            return;
        }

        match self
            .store
            .transition(id, JobStatus::Failed, JobUpdate::failure(message.clone()))
            .await
        {
            Ok(failed) => {
                warn!(
                    job_id = %id,
                    url = %job.url,
                    retry_count = failed.retry_count,
                    error = %message,
                    "Job failed permanently"
                );
                self.counters.failed.fetch_add(1, Ordering::SeqCst);
                self.finish(JobOutcome::from_job(&failed, None)).await;
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to mark job failed");
                self.abandon(id).await;
            }
        }
    }

    fn release(&self, id: Uuid) {
        self.claimed.lock().unwrap().remove(&id);
    }

    /// Deliver a terminal outcome to its handle, or to the outcome channel.
    async fn finish(&self, outcome: JobOutcome) {
        self.release(outcome.job_id);

        let waiter = self.waiters.lock().unwrap().remove(&outcome.job_id);
        if let Some(tx) = waiter {
            let _ = tx.send(outcome);
            return;
        }

        let sender = self.outcomes.lock().unwrap().clone();
        if let Some(sender) = sender {
            if sender.send(outcome).await.is_err() {
                debug!("Outcome receiver dropped");
            }
        }
    }

    /// Give up on a job this pool could not drive (lost a race, store error):
    /// release it and resolve any waiter with whatever the store holds.
    async fn abandon(&self, id: Uuid) {
        self.release(id);
        let waiter = self.waiters.lock().unwrap().remove(&id);
        let Some(tx) = waiter else {
            return;
        };
        if let Ok(Some(job)) = self.store.get(id).await {
            let _ = tx.send(JobOutcome::from_job(&job, None));
        }
    }
}
