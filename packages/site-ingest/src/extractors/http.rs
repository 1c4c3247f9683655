//! Extraction over plain HTTP: fetch, pick the main content, convert it to
//! markdown.
//!
//! No JavaScript rendering. Pages that only come alive in a browser usually
//! yield a near-empty shell here, which is reported as `EmptyContent` so the
//! worker pool retries it like any other transient failure.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use crate::error::{ExtractionError, ExtractionResult};
use crate::traits::extractor::Extractor;
use crate::traits::fetcher::PageFetcher;
use crate::types::document::{count_words, Document};

static STRIP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(script|style|noscript|template|svg)[^>]*>.*?</(script|style|noscript|template|svg)>")
        .expect("valid regex")
});

static BLANK_LINES_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

/// Content roots tried in order before falling back to `<body>`.
const MAIN_SELECTORS: &[&str] = &[
    "main",
    "article",
    "[role='main']",
    "#content",
    "#main",
    ".post-content",
    ".entry-content",
    ".content",
];

/// Text that marks a client-rendered shell rather than content.
const PLACEHOLDER_MARKERS: &[&str] = &[
    "enable javascript",
    "javascript is required",
    "javascript to run this app",
    "loading...",
];

/// Content types that are not pages.
const BINARY_TYPES: &[&str] = &[
    "application/pdf",
    "application/octet-stream",
    "application/zip",
    "image/",
    "video/",
    "audio/",
    "font/",
];

pub struct HttpExtractor {
    fetcher: Arc<dyn PageFetcher>,
    timeout: Duration,
    min_words: usize,
}

impl HttpExtractor {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            timeout: Duration::from_secs(30),
            min_words: 20,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Pages with fewer words than this fail with `EmptyContent`.
    pub fn with_min_words(mut self, min_words: usize) -> Self {
        self.min_words = min_words;
        self
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    async fn extract(&self, url: &str, team_id: &str) -> ExtractionResult<Document> {
        if url.to_ascii_lowercase().ends_with(".pdf") {
            return Err(ExtractionError::UnsupportedContent {
                url: url.to_string(),
                content_type: "application/pdf".to_string(),
            });
        }

        let page = self.fetcher.fetch(url, self.timeout).await?;

        let content_type = page
            .content_type
            .clone()
            .unwrap_or_else(|| "text/html".to_string());
        let lowered = content_type.to_ascii_lowercase();
        if BINARY_TYPES.iter().any(|t| lowered.starts_with(t)) {
            return Err(ExtractionError::UnsupportedContent {
                url: url.to_string(),
                content_type,
            });
        }

        let (title, markdown) = if lowered.contains("html") {
            convert_page(&page.body)
        } else {
            (None, page.body.trim().to_string())
        };

        let words = count_words(&markdown);
        if words < self.min_words || is_placeholder(&markdown) {
            debug!(url = %url, words = words, "Extraction produced no usable content");
            return Err(ExtractionError::EmptyContent {
                url: url.to_string(),
            });
        }

        debug!(url = %url, words = words, "Extracted document");

        let title = title.unwrap_or_else(|| url.to_string());
        Ok(Document::new(url, team_id, title, markdown)
            .with_content_type(content_type)
            .with_metadata("status", page.status.to_string())
            .with_metadata("final_url", page.final_url))
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Title and markdown body of an HTML page.
pub fn convert_page(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);
    let title = extract_title(&document);
    let main = main_content(&document);
    (title, html_to_markdown(&main))
}

fn extract_title(document: &Html) -> Option<String> {
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

fn main_content(document: &Html) -> String {
    for selector in MAIN_SELECTORS {
        if let Ok(selector) = Selector::parse(selector) {
            if let Some(main) = document.select(&selector).next() {
                return main.html();
            }
        }
    }

    if let Ok(body) = Selector::parse("body") {
        if let Some(body) = document.select(&body).next() {
            return body.html();
        }
    }
    document.html()
}

/// Convert HTML to markdown, falling back to plain text.
pub fn html_to_markdown(html: &str) -> String {
    let cleaned = STRIP_RE.replace_all(html, "");
    let markdown = htmd::convert(&cleaned).unwrap_or_else(|_| {
        let document = Html::parse_fragment(&cleaned);
        document.root_element().text().collect::<String>()
    });
    BLANK_LINES_RE
        .replace_all(markdown.trim(), "\n\n")
        .to_string()
}

fn is_placeholder(text: &str) -> bool {
    let lowered = text.to_lowercase();
    count_words(&lowered) < 60 && PLACEHOLDER_MARKERS.iter().any(|m| lowered.contains(m))
}
