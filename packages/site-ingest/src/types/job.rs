//! Extraction job model and lifecycle.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Processing,
        JobStatus::Completed,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal jobs never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Statuses a job may be in immediately before entering `self`.
    pub fn predecessors(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[JobStatus::Processing],
            JobStatus::Processing => &[JobStatus::Pending],
            JobStatus::Completed => &[JobStatus::Processing],
            JobStatus::Failed => &[JobStatus::Pending, JobStatus::Processing],
        }
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        next.predecessors().contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

// ============================================================================
// Job
// ============================================================================

/// One unit of extraction work: "extract this URL for this team".
///
/// Jobs are owned by the job store. Anything else holds a transient copy
/// and writes back through [`JobStore::transition`](crate::traits::store::JobStore::transition).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct CrawlJob {
    #[builder(default = Uuid::now_v7())]
    pub id: Uuid,

    pub url: String,
    pub team_id: String,

    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub retry_count: u32,
    #[builder(default, setter(strip_option))]
    pub error_message: Option<String>,

    // Provenance for jobs produced by discovery
    #[builder(default, setter(strip_option))]
    pub depth: Option<u32>,
    #[builder(default, setter(strip_option))]
    pub parent_url: Option<String>,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl CrawlJob {
    /// A fresh pending job for `url`.
    pub fn new(url: impl Into<String>, team_id: impl Into<String>) -> Self {
        Self::builder().url(url.into()).team_id(team_id.into()).build()
    }

    /// A pending job produced by discovery from `parent_url`.
    pub fn discovered(
        url: impl Into<String>,
        team_id: impl Into<String>,
        parent_url: impl Into<String>,
        depth: u32,
    ) -> Self {
        Self::builder()
            .url(url.into())
            .team_id(team_id.into())
            .parent_url(parent_url.into())
            .depth(depth)
            .build()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Apply a transition in memory. Stores call this after validating the
    /// move so every backend mutates records identically.
    pub fn apply(&mut self, status: JobStatus, update: &JobUpdate, now: DateTime<Utc>) {
        self.status = status;
        if update.bump_retry {
            self.retry_count += 1;
        }
        if let Some(message) = &update.error_message {
            self.error_message = Some(message.clone());
        }
        self.updated_at = now;
    }
}

/// Field changes that accompany a status transition.
///
/// `error_message` is only ever overwritten, never cleared: the last failure
/// reason survives a later success.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobUpdate {
    pub bump_retry: bool,
    pub error_message: Option<String>,
}

impl JobUpdate {
    pub fn none() -> Self {
        Self::default()
    }

    /// A failed attempt that will be retried.
    pub fn retry(error: impl Into<String>) -> Self {
        Self {
            bump_retry: true,
            error_message: Some(error.into()),
        }
    }

    /// A failed attempt with no retry left.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            bump_retry: false,
            error_message: Some(error.into()),
        }
    }
}

/// Per-status totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl JobCounts {
    pub fn add(&mut self, status: JobStatus, n: usize) {
        match status {
            JobStatus::Pending => self.pending += n,
            JobStatus::Processing => self.processing += n,
            JobStatus::Completed => self.completed += n,
            JobStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}
