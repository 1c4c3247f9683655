//! Crawl and import operations: discovery, job creation, extraction through
//! the worker pool, and hand-off of finished documents to a sink.
//!
//! ```text
//! crawl_site:  seed ─► Discovery ─► enqueue (depth 1) ─┐
//! import_urls: urls ──────────────► enqueue (depth 0) ─┴─► WorkerPool ─► DocumentSink ─► IngestReport
//! ```

use futures::future::join_all;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::discovery::Discovery;
use crate::pool::{JobHandle, WorkerPool};
use crate::traits::DocumentSink;
use crate::types::document::{IngestReport, IngestStats};
use crate::types::job::{CrawlJob, JobStatus};

pub struct Ingestor<S: DocumentSink> {
    discovery: Discovery,
    pool: WorkerPool,
    sink: S,
}

impl<S: DocumentSink> Ingestor<S> {
    /// Jobs are written through `pool` into the store it runs over.
    pub fn new(discovery: Discovery, pool: WorkerPool, sink: S) -> Self {
        Self {
            discovery,
            pool,
            sink,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Discover content pages under `seed` and extract each of them.
    pub async fn crawl_site(&self, seed: &str, team_id: &str, desired: usize) -> IngestReport {
        let started = Instant::now();

        let discovered = match self.discovery.discover(seed, desired).await {
            Ok(result) => result,
            Err(e) => {
                warn!(seed = %seed, error = %e, "Crawl rejected");
                return failure(team_id, started, e.to_string());
            }
        };

        if discovered.urls.is_empty() {
            return failure(team_id, started, format!("no content pages discovered at {seed}"));
        }

        info!(
            seed = %seed,
            team_id = %team_id,
            urls = discovered.urls.len(),
            layer = discovered.layer,
            "Crawl discovered pages"
        );

        let jobs = discovered
            .urls
            .iter()
            .map(|url| CrawlJob::discovered(url.as_str(), team_id, seed, 1))
            .collect();
        self.run(jobs, team_id, started).await
    }

    /// Extract a known list of URLs; no discovery.
    pub async fn import_urls(&self, urls: &[String], team_id: &str) -> IngestReport {
        let started = Instant::now();
        if urls.is_empty() {
            return failure(team_id, started, "no URLs to import".to_string());
        }

        let jobs = urls
            .iter()
            .map(|url| {
                CrawlJob::builder()
                    .url(url.as_str())
                    .team_id(team_id)
                    .depth(0u32)
                    .build()
            })
            .collect();
        self.run(jobs, team_id, started).await
    }

    async fn run(&self, jobs: Vec<CrawlJob>, team_id: &str, started: Instant) -> IngestReport {
        let mut stats = IngestStats {
            total_pages: jobs.len(),
            ..Default::default()
        };

        let mut handles: Vec<JobHandle> = Vec::with_capacity(jobs.len());
        for job in jobs {
            let (id, url) = (job.id, job.url.clone());
            match self.pool.enqueue_and_submit(job).await {
                Ok(handle) => handles.push(handle),
                Err(e) => {
                    warn!(job_id = %id, url = %url, error = %e, "Job not admitted");
                    stats.failed_extractions += 1;
                }
            }
        }

        let mut documents = Vec::new();
        for outcome in join_all(handles.into_iter().map(JobHandle::outcome)).await {
            let outcome = match outcome {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(error = %e, "Job outcome lost");
                    stats.failed_extractions += 1;
                    continue;
                }
            };

            match outcome.document {
                Some(document) if outcome.status == JobStatus::Completed => {
                    stats.successful_extractions += 1;
                    match self.sink.accept(&document).await {
                        Ok(chunks) => stats.total_chunks += chunks,
                        Err(e) => warn!(url = %document.url, error = %e, "Sink rejected document"),
                    }
                    documents.push(document);
                }
                _ => {
                    warn!(
                        url = %outcome.url,
                        status = %outcome.status,
                        attempts = outcome.attempts,
                        error = outcome.error.as_deref().unwrap_or(""),
                        "Extraction did not complete"
                    );
                    stats.failed_extractions += 1;
                }
            }
        }

        stats.processing_time_ms = started.elapsed().as_millis() as u64;
        let success = stats.successful_extractions > 0;
        let error = (!success).then(|| format!("all {} extractions failed", stats.total_pages));

        info!(
            team_id = %team_id,
            pages = stats.total_pages,
            succeeded = stats.successful_extractions,
            failed = stats.failed_extractions,
            chunks = stats.total_chunks,
            duration_ms = stats.processing_time_ms,
            "Ingest finished"
        );

        IngestReport {
            success,
            team_id: team_id.to_string(),
            stats,
            error,
            documents,
        }
    }
}

fn failure(team_id: &str, started: Instant, error: String) -> IngestReport {
    IngestReport {
        success: false,
        team_id: team_id.to_string(),
        stats: IngestStats {
            processing_time_ms: started.elapsed().as_millis() as u64,
            ..Default::default()
        },
        error: Some(error),
        documents: Vec::new(),
    }
}
