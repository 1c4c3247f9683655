//! Testing utilities: mock collaborators that record their calls.
//!
//! Useful for exercising discovery and the worker pool without network
//! access or a real browser.

use async_trait::async_trait;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::error::{
    ExtractionError, ExtractionResult, FetchError, FetchResult, RenderError, RenderResult,
};
use crate::traits::{
    DocumentSink, Extractor, FetchedPage, PageFetcher, RenderSession, Renderer,
};
use crate::types::document::Document;

/// Look `url` up with and without a trailing slash.
fn lookup<'a, T>(map: &'a HashMap<String, T>, url: &str) -> Option<&'a T> {
    map.get(url)
        .or_else(|| map.get(url.trim_end_matches('/')))
        .or_else(|| map.get(&format!("{url}/")))
}

// ============================================================================
// Fetcher
// ============================================================================

/// Mock page fetcher serving canned pages. Unknown URLs answer 404.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<RwLock<HashMap<String, FetchedPage>>>,
    delay: Duration,
    calls: Arc<RwLock<Vec<String>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `body` as HTML at `url`.
    pub fn with_page(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        self.with_fetched(FetchedPage::new(url, body))
    }

    /// Serve `body` as XML at `url`.
    pub fn with_xml(self, url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        self.with_fetched(FetchedPage::new(url, body).with_content_type("application/xml"))
    }

    pub fn with_fetched(self, page: FetchedPage) -> Self {
        self.pages.write().unwrap().insert(page.url.clone(), page);
        self
    }

    /// Delay every response (useful with a paused clock).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }
}

#[async_trait]
impl PageFetcher for MockFetcher {
    async fn fetch(&self, url: &str, _timeout: Duration) -> FetchResult<FetchedPage> {
        self.calls.write().unwrap().push(url.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let page = lookup(&*self.pages.read().unwrap(), url).cloned();
        match page {
            Some(page) if page.is_success() => Ok(page),
            Some(page) => Err(FetchError::Status {
                url: url.to_string(),
                status: page.status,
            }),
            None => Err(FetchError::Status {
                url: url.to_string(),
                status: 404,
            }),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Extractor
// ============================================================================

/// Mock extraction capability.
///
/// By default every URL succeeds with a generated document. Scripted
/// failures, known-only mode, and a delay make retry and concurrency
/// behavior observable. The highest number of overlapping `extract` calls
/// is tracked in [`MockExtractor::max_concurrent`].
#[derive(Clone, Default)]
pub struct MockExtractor {
    documents: Arc<RwLock<HashMap<String, String>>>,
    failures: Arc<RwLock<HashMap<String, usize>>>,
    attempts: Arc<RwLock<HashMap<String, usize>>>,
    calls: Arc<RwLock<Vec<String>>>,
    known_only: bool,
    delay: Duration,
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail URLs that were not registered with [`with_document`](Self::with_document).
    pub fn known_only(mut self) -> Self {
        self.known_only = true;
        self
    }

    pub fn with_document(self, url: impl Into<String>, content: impl Into<String>) -> Self {
        self.documents
            .write()
            .unwrap()
            .insert(url.into(), content.into());
        self
    }

    /// The first `times` calls for `url` fail with a transient error naming
    /// the attempt number.
    pub fn fail_times(self, url: impl Into<String>, times: usize) -> Self {
        self.failures.write().unwrap().insert(url.into(), times);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Error message of the `attempt`-th (1-based) scripted failure.
    pub fn failure_message(url: &str, attempt: usize) -> String {
        format!("transient failure {attempt} for {url}")
    }

    pub fn attempts(&self, url: &str) -> usize {
        self.attempts.read().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.read().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.read().unwrap().len()
    }

    /// Highest number of `extract` calls observed running at once.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn generated_content(url: &str) -> String {
        let mut content = format!("# Content for {url}\n\n");
        for i in 0..120 {
            content.push_str(&format!("word{i} "));
        }
        content
    }

    fn outcome(&self, url: &str, team_id: &str, attempt: usize) -> ExtractionResult<Document> {
        let scripted = self.failures.read().unwrap().get(url).copied().unwrap_or(0);
        if attempt <= scripted {
            return Err(ExtractionError::Other(Self::failure_message(url, attempt)));
        }

        let known = self.documents.read().unwrap().get(url).cloned();
        let content = match known {
            Some(content) => content,
            None if self.known_only => {
                return Err(ExtractionError::Fetch(FetchError::Status {
                    url: url.to_string(),
                    status: 404,
                }))
            }
            None => Self::generated_content(url),
        };

        if content.trim().is_empty() {
            return Err(ExtractionError::EmptyContent {
                url: url.to_string(),
            });
        }
        Ok(Document::new(url, team_id, format!("Title of {url}"), content))
    }
}

#[async_trait]
impl Extractor for MockExtractor {
    async fn extract(&self, url: &str, team_id: &str) -> ExtractionResult<Document> {
        self.calls.write().unwrap().push(url.to_string());
        let attempt = {
            let mut attempts = self.attempts.write().unwrap();
            let entry = attempts.entry(url.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = self.outcome(url, team_id, attempt);

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// Renderer
// ============================================================================

/// A scripted page for [`MockRenderer`].
#[derive(Clone, Debug, Default)]
pub struct MockPage {
    html: String,
    load_more: Vec<(String, String)>,
    scrolls: Vec<String>,
    requests: Vec<String>,
}

impl MockPage {
    pub fn new(html: impl Into<String>) -> Self {
        Self {
            html: html.into(),
            ..Default::default()
        }
    }

    /// A control labelled `label` that, when activated, appends `fragment`.
    /// Controls are consumed in order.
    pub fn with_load_more(mut self, label: impl Into<String>, fragment: impl Into<String>) -> Self {
        self.load_more.push((label.into(), fragment.into()));
        self
    }

    /// Content appended by successive scrolls to the bottom.
    pub fn with_scroll(mut self, fragment: impl Into<String>) -> Self {
        self.scrolls.push(fragment.into());
        self
    }

    /// A network request the page makes once loaded.
    pub fn with_request(mut self, url: impl Into<String>) -> Self {
        self.requests.push(url.into());
        self
    }
}

/// Mock rendering capability.
#[derive(Clone, Default)]
pub struct MockRenderer {
    pages: Arc<RwLock<HashMap<String, MockPage>>>,
    unavailable: bool,
    opened: Arc<AtomicUsize>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A renderer whose engine cannot be reached.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    pub fn with_page(self, url: impl Into<String>, page: MockPage) -> Self {
        self.pages.write().unwrap().insert(url.into(), page);
        self
    }

    /// Number of sessions opened so far.
    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Renderer for MockRenderer {
    async fn open(&self) -> RenderResult<Box<dyn RenderSession>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(RenderError::Unavailable("mock renderer offline".to_string()));
        }
        Ok(Box::new(MockSession {
            pages: self.pages.clone(),
            page: None,
            revealed: Vec::new(),
            clicks: 0,
            scrolls: 0,
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

pub struct MockSession {
    pages: Arc<RwLock<HashMap<String, MockPage>>>,
    page: Option<MockPage>,
    revealed: Vec<String>,
    clicks: usize,
    scrolls: usize,
}

impl MockSession {
    fn page(&self) -> RenderResult<&MockPage> {
        self.page
            .as_ref()
            .ok_or_else(|| RenderError::Script("no page loaded".to_string()))
    }
}

#[async_trait]
impl RenderSession for MockSession {
    async fn load(&mut self, url: &str) -> RenderResult<()> {
        let page = lookup(&*self.pages.read().unwrap(), url).cloned();
        self.page = Some(page.ok_or_else(|| RenderError::Api {
            status: 404,
            message: format!("no mock page for {url}"),
        })?);
        self.revealed.clear();
        self.clicks = 0;
        self.scrolls = 0;
        Ok(())
    }

    async fn activate(&mut self, labels: &[String]) -> RenderResult<Option<String>> {
        let next = self.page()?.load_more.get(self.clicks).cloned();
        let Some((label, fragment)) = next else {
            return Ok(None);
        };
        let wanted = label.to_lowercase();
        if !labels.iter().any(|l| wanted.contains(&l.to_lowercase())) {
            return Ok(None);
        }
        self.clicks += 1;
        self.revealed.push(fragment);
        Ok(Some(label))
    }

    async fn scroll_to_bottom(&mut self) -> RenderResult<bool> {
        let next = self.page()?.scrolls.get(self.scrolls).cloned();
        match next {
            Some(fragment) => {
                self.scrolls += 1;
                self.revealed.push(fragment);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn content(&mut self) -> RenderResult<String> {
        let mut html = self.page()?.html.clone();
        for fragment in &self.revealed {
            html.push_str(fragment);
        }
        Ok(html)
    }

    async fn network_requests(&mut self) -> RenderResult<Vec<String>> {
        Ok(self.page()?.requests.clone())
    }
}

// ============================================================================
// Sink
// ============================================================================

/// Collects documents in memory and reports a fixed chunk count per document.
#[derive(Clone)]
pub struct CollectingSink {
    documents: Arc<Mutex<Vec<Document>>>,
    chunks_per_document: usize,
}

impl Default for CollectingSink {
    fn default() -> Self {
        Self {
            documents: Arc::default(),
            chunks_per_document: 1,
        }
    }
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_chunks_per_document(mut self, chunks: usize) -> Self {
        self.chunks_per_document = chunks;
        self
    }

    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentSink for CollectingSink {
    type Error = Infallible;

    async fn accept(&self, document: &Document) -> Result<usize, Self::Error> {
        self.documents.lock().unwrap().push(document.clone());
        Ok(self.chunks_per_document)
    }
}
