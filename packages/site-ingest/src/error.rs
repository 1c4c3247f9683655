//! Typed errors for the ingestion core.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can match
//! on the failure that matters to them: a missing job, a shutdown rejection,
//! a rendering engine that is not reachable.

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::types::job::JobStatus;

/// Errors raised by a [`JobStore`](crate::traits::store::JobStore).
#[derive(Debug, Error)]
pub enum StoreError {
    /// No job with this id exists; nothing was written.
    #[error("job not found: {id}")]
    NotFound { id: Uuid },

    /// A job with this id is already stored; nothing was written.
    #[error("job already exists: {id}")]
    AlreadyExists { id: Uuid },

    /// The requested status change is not a legal lifecycle step.
    #[error("job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    /// The backing database failed
    #[error("database error: {0}")]
    Database(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A stored row could not be decoded.
    #[error("corrupt job record: {0}")]
    Corrupt(String),
}

/// Errors raised while fetching raw pages.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Invalid URL format
    #[error("invalid URL: {url}")]
    InvalidUrl { url: String },

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    /// Connection timeout
    #[error("timeout fetching: {url}")]
    Timeout { url: String },
}

/// Errors from the external extraction capability.
///
/// Every variant is treated as transient by the worker pool's retry policy.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// The target answered but carried no usable content (empty body or a
    /// placeholder shell).
    #[error("empty or placeholder content at {url}")]
    EmptyContent { url: String },

    #[error("unsupported content type {content_type} at {url}")]
    UnsupportedContent { url: String, content_type: String },

    #[error("{0}")]
    Other(String),
}

/// Errors from the browser rendering capability.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Rendering engine not configured or not reachable
    #[error("rendering engine unavailable: {0}")]
    Unavailable(String),

    #[error("rendering API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("rendering session timed out")]
    Timeout,

    /// The page script ran but returned something unusable.
    #[error("rendering script failed: {0}")]
    Script(String),
}

impl From<reqwest::Error> for RenderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            RenderError::Timeout
        } else {
            RenderError::Unavailable(err.to_string())
        }
    }
}

/// Errors inside a single discovery layer.
///
/// The orchestrator never propagates these: a failing layer counts as a layer
/// that produced zero URLs.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid seed URL: {url}")]
    InvalidSeed { url: String },

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("render failed: {0}")]
    Render(#[from] RenderError),

    /// The layer ran out of its time budget before producing anything.
    #[error("layer {layer} exceeded its time budget")]
    Budget { layer: u8 },
}

/// Errors reported synchronously by the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool is draining; no new work is admitted.
    #[error("worker pool is shutting down")]
    ShuttingDown,

    /// The job is already running or waiting for a retry in this pool.
    #[error("job {id} is already scheduled")]
    AlreadyScheduled { id: Uuid },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Fatal configuration errors, raised before any job processing begins.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing configuration value: {key}")]
    Missing { key: String },

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("storage directory {path} is not writable: {source}")]
    StorageUnwritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type alias for job store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Result type alias for fetch operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Result type alias for extraction operations.
pub type ExtractionResult<T> = std::result::Result<T, ExtractionError>;

/// Result type alias for rendering operations.
pub type RenderResult<T> = std::result::Result<T, RenderError>;

/// Result type alias for discovery layer operations.
pub type LayerResult<T> = std::result::Result<T, DiscoveryError>;

/// Result type alias for pool operations.
pub type PoolResult<T> = std::result::Result<T, PoolError>;
