//! Retry policy and the delayed-retry scheduler.
//!
//! A retry is a value, [`ScheduledRetry`], placed on a `DelayQueue` owned by
//! one scheduler task. When it expires the job is handed back to the pool.
//! Under a paused tokio clock the whole path runs in virtual time.

use std::sync::Weak;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::time::DelayQueue;
use tracing::debug;
use uuid::Uuid;

use super::PoolInner;
use crate::config::PoolConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts allowed to retry; the next failure is terminal.
    pub max_retries: u32,
    pub base: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&PoolConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base: config.backoff_base,
            max_delay: config.backoff_max,
        }
    }

    /// Whether a job that just failed with `retry_count` prior retries gets
    /// another attempt.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// `base * 2^retry_count`, capped at `max_delay`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        2u32.checked_pow(retry_count)
            .and_then(|factor| self.base.checked_mul(factor))
            .map(|delay| delay.min(self.max_delay))
            .unwrap_or(self.max_delay)
    }
}

/// A job due to run again at `due`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledRetry {
    pub job_id: Uuid,
    pub due: Instant,
}

impl ScheduledRetry {
    pub fn after(job_id: Uuid, delay: Duration) -> Self {
        Self {
            job_id,
            due: Instant::now() + delay,
        }
    }
}

/// Own the delay queue until cancellation or until the pool is dropped.
///
/// Retries still queued when this returns stay `pending` in the store and
/// are picked up by the next poll (or the next process).
pub(crate) async fn run_scheduler(
    pool: Weak<PoolInner>,
    mut incoming: mpsc::UnboundedReceiver<ScheduledRetry>,
    cancel: CancellationToken,
) {
    let mut queue: DelayQueue<ScheduledRetry> = DelayQueue::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            received = incoming.recv() => match received {
                Some(retry) => {
                    queue.insert_at(retry, retry.due);
                }
                None => break,
            },
            Some(expired) = queue.next(), if !queue.is_empty() => {
                let retry = expired.into_inner();
                let Some(pool) = pool.upgrade() else {
                    break;
                };
                debug!(job_id = %retry.job_id, "Retry due");
                pool.resume(retry.job_id);
            }
        }
    }

    if !queue.is_empty() {
        debug!(left = queue.len(), "Retry scheduler stopped with retries queued");
    }
}
