//! Adaptive Site Ingestion
//!
//! Finds the content pages of a website and extracts each of them through a
//! bounded, retrying worker pool backed by a durable job ledger.
//!
//! # Design
//!
//! - Spend as little as possible per site: parse what was already fetched,
//!   then try cheap auxiliary endpoints, and only drive a browser for sites
//!   that look JavaScript-heavy and are still short of URLs
//! - Every job status change goes through one atomic store operation
//! - Collaborators (fetching, extraction, rendering, storage) are traits so
//!   tests run without network access
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use site_ingest::{Discovery, DiscoveryConfig, HttpExtractor, HttpFetcher};
//! use site_ingest::{Ingestor, MemoryJobStore, PoolConfig, WorkerPool};
//! use site_ingest::testing::CollectingSink;
//!
//! let fetcher = Arc::new(HttpFetcher::new()?);
//! let extractor = Arc::new(HttpExtractor::new(fetcher.clone()));
//! let store = Arc::new(MemoryJobStore::new());
//!
//! let discovery = Discovery::new(fetcher, extractor.clone(), DiscoveryConfig::default());
//! let pool = WorkerPool::new(store, extractor, PoolConfig::default());
//! let ingestor = Ingestor::new(discovery, pool, CollectingSink::new());
//!
//! let report = ingestor.crawl_site("https://example.org/blog", "team-1", 20).await;
//! ```
//!
//! # Modules
//!
//! - [`discovery`] - Prober, escalation layers, and the orchestrator
//! - [`pool`] - Worker pool with retry scheduling
//! - [`stores`] - Job store implementations (memory, SQLite)
//! - [`fetchers`], [`extractors`], [`renderers`] - HTTP and Browserless adapters
//! - [`ingest`] - Crawl and import operations
//! - [`testing`] - Mock implementations for testing

pub mod config;
pub mod discovery;
pub mod error;
pub mod extractors;
pub mod fetchers;
pub mod ingest;
pub mod pool;
pub mod renderers;
pub mod stores;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use config::{BrowserConfig, DiscoveryConfig, IngestConfig, PoolConfig, StoreConfig};
pub use discovery::{criterion_met, Discovery, Prober, UrlFilter};
pub use error::{
    ConfigError, DiscoveryError, ExtractionError, FetchError, PoolError, RenderError, StoreError,
};
pub use extractors::HttpExtractor;
pub use fetchers::HttpFetcher;
pub use ingest::Ingestor;
pub use pool::{JobHandle, JobOutcome, PoolStats, RetryPolicy, WorkerPool};
pub use renderers::BrowserlessRenderer;
pub use stores::MemoryJobStore;
#[cfg(feature = "sqlite")]
pub use stores::SqliteJobStore;
pub use traits::{DocumentSink, Extractor, FetchedPage, JobStore, PageFetcher, RenderSession, Renderer};
pub use types::discovery::{DiscoveryResult, Interaction, Layer, ProbeOutcome, ProbeReport};
pub use types::document::{Document, DocumentMetadata, IngestReport, IngestStats};
pub use types::job::{CrawlJob, JobCounts, JobStatus, JobUpdate};
