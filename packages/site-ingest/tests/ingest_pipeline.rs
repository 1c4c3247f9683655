//! Crawl and import operations from seed to sink.

use std::sync::Arc;
use std::time::Duration;

use site_ingest::testing::{CollectingSink, MockExtractor, MockFetcher, MockRenderer};
use site_ingest::{
    Discovery, DiscoveryConfig, Ingestor, JobStatus, JobStore, MemoryJobStore, PoolConfig,
    WorkerPool,
};

const SEED: &str = "https://example.org/blog";

fn listing(slugs: &[&str]) -> String {
    let mut html = String::from("<html><body><main>");
    for slug in slugs {
        html.push_str(&format!(
            "<article><a href=\"/blog/{slug}\">{slug}</a><p>Readable summary text for the \
             post so the listing page is mostly prose rather than markup.</p></article>"
        ));
    }
    html.push_str("</main></body></html>");
    html
}

fn ingestor(
    fetcher: MockFetcher,
    extractor: MockExtractor,
    sink: CollectingSink,
) -> (Ingestor<CollectingSink>, Arc<MemoryJobStore>) {
    let store = Arc::new(MemoryJobStore::new());
    let extractor = Arc::new(extractor);
    let discovery = Discovery::new(Arc::new(fetcher), extractor.clone(), DiscoveryConfig::default())
        .with_renderer(Arc::new(MockRenderer::new()));
    let pool = WorkerPool::new(store.clone(), extractor, PoolConfig::default());
    (Ingestor::new(discovery, pool, sink), store)
}

#[tokio::test(start_paused = true)]
async fn crawl_site_extracts_discovered_pages() {
    let fetcher = MockFetcher::new().with_page(SEED, listing(&["spring-gala", "new-board", "food-drive"]));
    let extractor = MockExtractor::new().fail_times("https://example.org/blog/new-board", 1);
    let sink = CollectingSink::new().with_chunks_per_document(3);
    let (ingestor, store) = ingestor(fetcher, extractor, sink.clone());

    let report = ingestor.crawl_site(SEED, "team-7", 10).await;

    assert!(report.success, "{:?}", report.error);
    assert!(report.error.is_none());
    assert_eq!(report.team_id, "team-7");
    assert_eq!(report.stats.total_pages, 3);
    assert_eq!(report.stats.successful_extractions, 3);
    assert_eq!(report.stats.failed_extractions, 0);
    assert_eq!(report.stats.total_chunks, 9);
    assert_eq!(sink.documents().len(), 3);
    assert!(sink.documents().iter().all(|d| d.team_id == "team-7"));

    let jobs = store.list_by_team("team-7").await.unwrap();
    assert_eq!(jobs.len(), 3);
    assert!(jobs.iter().all(|j| j.status == JobStatus::Completed));
    assert!(jobs.iter().all(|j| j.depth == Some(1)));
    assert!(jobs.iter().all(|j| j.parent_url.as_deref() == Some(SEED)));
}

#[tokio::test(start_paused = true)]
async fn crawl_site_reports_when_nothing_is_found() {
    let fetcher = MockFetcher::new().with_page(SEED, "<html><body><p>Nothing here yet, come back soon for more stories.</p></body></html>");
    let (ingestor, store) = ingestor(fetcher, MockExtractor::new(), CollectingSink::new());

    let report = ingestor.crawl_site(SEED, "team", 10).await;

    assert!(!report.success);
    assert!(report.error.is_some());
    assert_eq!(report.stats.total_pages, 0);
    assert!(store.is_empty());
}

#[tokio::test(start_paused = true)]
async fn import_urls_counts_failures() {
    let urls = vec![
        "https://example.org/news/works".to_string(),
        "https://example.org/news/broken".to_string(),
    ];
    let extractor = MockExtractor::new().fail_times("https://example.org/news/broken", 10);
    let sink = CollectingSink::new();
    let (ingestor, store) = ingestor(MockFetcher::new(), extractor, sink.clone());

    let report = ingestor.import_urls(&urls, "team").await;

    assert!(report.success);
    assert_eq!(report.stats.total_pages, 2);
    assert_eq!(report.stats.successful_extractions, 1);
    assert_eq!(report.stats.failed_extractions, 1);
    assert_eq!(report.stats.total_chunks, 1);
    assert_eq!(sink.documents()[0].url, "https://example.org/news/works");
    assert!(store
        .list_by_team("team")
        .await
        .unwrap()
        .iter()
        .all(|j| j.depth == Some(0)));
}

#[tokio::test(start_paused = true)]
async fn import_fails_when_every_extraction_fails() {
    let urls = vec!["https://example.org/news/broken".to_string()];
    let extractor = MockExtractor::new().fail_times("https://example.org/news/broken", 10);
    let (ingestor, _store) = ingestor(MockFetcher::new(), extractor, CollectingSink::new());

    let report = ingestor.import_urls(&urls, "team").await;

    assert!(!report.success);
    assert_eq!(report.stats.failed_extractions, 1);
    assert_eq!(report.error.as_deref(), Some("all 1 extractions failed"));
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn import_with_running_poller_reports_every_job() {
    use site_ingest::SqliteJobStore;

    let store = Arc::new(SqliteJobStore::in_memory().await.unwrap());
    let extractor = Arc::new(MockExtractor::new());
    let discovery = Discovery::new(Arc::new(MockFetcher::new()), extractor.clone(), DiscoveryConfig::default());
    let pool = WorkerPool::new(
        store.clone(),
        extractor,
        PoolConfig::default()
            .with_max_concurrency(4)
            .with_poll_interval(Duration::from_millis(1)),
    );
    pool.start_polling();
    let sink = CollectingSink::new();
    let ingestor = Ingestor::new(discovery, pool, sink.clone());

    let urls: Vec<String> = (0..40)
        .map(|i| format!("https://example.org/news/story-{i}"))
        .collect();
    let report = ingestor.import_urls(&urls, "team").await;

    assert!(report.success, "{:?}", report.error);
    assert_eq!(report.stats.total_pages, 40);
    assert_eq!(report.stats.successful_extractions, 40);
    assert_eq!(report.stats.failed_extractions, 0);
    assert_eq!(sink.documents().len(), 40);
    assert_eq!(store.counts().await.unwrap().completed, 40);

    ingestor.pool().shutdown().await;
}
