//! Raw page fetching used by the prober and the cheap discovery layers.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::FetchResult;

/// A fetched page before any interpretation.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL that was requested
    pub url: String,
    /// URL after redirects
    pub final_url: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub latency: Duration,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, body: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            final_url: url.clone(),
            url,
            status: 200,
            content_type: Some("text/html".to_string()),
            body: body.into(),
            latency: Duration::ZERO,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_final_url(mut self, final_url: impl Into<String>) -> Self {
        self.final_url = final_url.into();
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_xml(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("xml"))
            .unwrap_or(false)
            || self.body.trim_start().starts_with("<?xml")
    }
}

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url` within `timeout`. Non-success statuses are errors.
    async fn fetch(&self, url: &str, timeout: Duration) -> FetchResult<FetchedPage>;

    fn name(&self) -> &str {
        "unknown"
    }
}
