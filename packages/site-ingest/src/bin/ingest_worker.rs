//! Ingest Worker
//!
//! Long-running service that drains the durable job ledger: every pending
//! extraction job is picked up by the worker pool, extracted over HTTP, and
//! written as JSON under the output directory. Ctrl-C drains in-flight work
//! and exits; anything still pending is resumed by the next run.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use site_ingest::{
    Document, DocumentSink, HttpExtractor, HttpFetcher, IngestConfig, JobOutcome, JobStore,
    SqliteJobStore, WorkerPool,
};
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Writes each document to `<dir>/<team_id>/<url-slug>.json`.
struct JsonDirSink {
    dir: PathBuf,
}

impl JsonDirSink {
    fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, document: &Document) -> PathBuf {
        let slug: String = document
            .url
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .take(150)
            .collect();
        self.dir
            .join(sanitize(&document.team_id))
            .join(format!("{slug}.json"))
    }
}

fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

#[async_trait]
impl DocumentSink for JsonDirSink {
    type Error = std::io::Error;

    async fn accept(&self, document: &Document) -> Result<usize, Self::Error> {
        let path = self.path_for(document);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_vec_pretty(document)?;
        tokio::fs::write(&path, json).await?;
        tracing::debug!(url = %document.url, path = %path.display(), "Document written");
        Ok(1)
    }
}

async fn write_outcomes(mut outcomes: mpsc::Receiver<JobOutcome>, sink: JsonDirSink) {
    while let Some(outcome) = outcomes.recv().await {
        match &outcome.document {
            Some(document) => {
                if let Err(e) = sink.accept(document).await {
                    tracing::error!(job_id = %outcome.job_id, error = %e, "Failed to write document");
                }
            }
            None => tracing::warn!(
                job_id = %outcome.job_id,
                url = %outcome.url,
                attempts = outcome.attempts,
                error = outcome.error.as_deref().unwrap_or(""),
                "Job failed"
            ),
        }
    }
}

fn output_dir(config: &IngestConfig) -> PathBuf {
    config
        .output_dir
        .clone()
        .unwrap_or_else(|| config.store.data_dir.join("documents"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,site_ingest=debug,sqlx=warn".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    tracing::info!("Starting ingest worker");

    let config = IngestConfig::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let store = SqliteJobStore::new(&config.store.database_url())
        .await
        .context("Failed to open job store")?;
    let store = Arc::new(store);

    let purged = store
        .purge_older_than(config.store.retention_days)
        .await
        .context("Failed to purge old jobs")?;
    let reset = store
        .reset_in_flight()
        .await
        .context("Failed to reset orphaned jobs")?;
    let counts = store.counts().await.context("Failed to count jobs")?;
    tracing::info!(purged, reset, ?counts, "Job store ready");

    let fetcher = Arc::new(HttpFetcher::new().context("Failed to create HTTP client")?);
    let extractor = Arc::new(HttpExtractor::new(fetcher));

    let (outcome_tx, outcome_rx) = mpsc::channel(64);
    let writer = tokio::spawn(write_outcomes(outcome_rx, JsonDirSink::new(output_dir(&config))));

    let pool = WorkerPool::new(store.clone(), extractor, config.pool.clone())
        .with_outcome_sender(outcome_tx);
    pool.start_polling();

    tracing::info!(
        max_concurrency = config.pool.max_concurrency,
        max_retries = config.pool.max_retries,
        "Worker pool running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown requested");
    pool.shutdown().await;
    drop(pool);

    writer.await.context("Document writer panicked")?;
    store.close().await;

    tracing::info!("Ingest worker stopped");
    Ok(())
}
