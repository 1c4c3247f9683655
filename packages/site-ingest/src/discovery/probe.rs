//! The prober: one cheap, time-bounded look at the seed page.
//!
//! Scores how likely the site needs a real browser to reveal its content.
//! The score is a sum of structural signals, clamped to `[0, 1]`:
//!
//! | signal | weight |
//! |---|---|
//! | visible text is a small fraction of the markup | 0.30 |
//! | client-side framework markers present | 0.35 |
//! | no content links in the raw markup | 0.25 |
//! | slow response | 0.10 |

use std::sync::Arc;
use std::time::Duration;

use scraper::{Html, Node};
use tracing::{debug, warn};

use super::filter::UrlFilter;
use super::links;
use crate::config::DiscoveryConfig;
use crate::traits::fetcher::PageFetcher;
use crate::types::discovery::{ProbeOutcome, ProbeReport};

const LOW_TEXT_RATIO: f32 = 0.1;
const SLOW_RESPONSE: Duration = Duration::from_millis(800);

const WEIGHT_LOW_TEXT: f32 = 0.30;
const WEIGHT_FRAMEWORK: f32 = 0.35;
const WEIGHT_NO_LINKS: f32 = 0.25;
const WEIGHT_SLOW: f32 = 0.10;

const FRAMEWORK_MARKERS: &[&str] = &[
    "__NEXT_DATA__",
    "data-reactroot",
    "id=\"root\"",
    "id=\"app\"",
    "id=\"__next\"",
    "ng-version",
    "data-v-",
    "__NUXT__",
    "window.__INITIAL_STATE__",
    "___gatsby",
    "data-svelte",
    "data-server-rendered",
];

pub struct Prober {
    fetcher: Arc<dyn PageFetcher>,
    timeout: Duration,
    threshold: f32,
}

impl Prober {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: &DiscoveryConfig) -> Self {
        Self {
            fetcher,
            timeout: config.probe_timeout,
            threshold: config.js_heavy_threshold,
        }
    }

    /// Fetch the seed once and score it. Never fails: a fetch that does not
    /// complete within the budget yields a [`ProbeOutcome::NetworkFailure`].
    pub async fn probe(&self, filter: &UrlFilter) -> ProbeReport {
        let url = filter.seed().as_str();

        let fetched =
            match tokio::time::timeout(self.timeout, self.fetcher.fetch(url, self.timeout)).await {
                Ok(Ok(page)) => page,
                Ok(Err(e)) => {
                    warn!(url = %url, error = %e, "Probe fetch failed");
                    return ProbeReport::network_failure(e.to_string());
                }
                Err(_) => {
                    warn!(url = %url, timeout_ms = self.timeout.as_millis() as u64, "Probe timed out");
                    return ProbeReport::network_failure(format!(
                        "probe timed out after {}ms",
                        self.timeout.as_millis()
                    ));
                }
            };

        let (score, signals) = score_markup(filter, &fetched.body, fetched.latency);
        let js_heavy = score >= self.threshold;

        debug!(
            url = %url,
            score = score,
            js_heavy = js_heavy,
            signals = ?signals,
            latency_ms = fetched.latency.as_millis() as u64,
            "Probe complete"
        );

        ProbeReport {
            score,
            js_heavy,
            outcome: ProbeOutcome::Fetched {
                status: fetched.status,
                latency_ms: fetched.latency.as_millis() as u64,
            },
            signals,
            final_url: Some(fetched.final_url),
            markup: Some(fetched.body),
        }
    }
}

/// Score raw markup. Returns the clamped score and the names of the signals
/// that fired.
pub fn score_markup(filter: &UrlFilter, markup: &str, latency: Duration) -> (f32, Vec<String>) {
    let mut score = 0.0;
    let mut signals = Vec::new();

    let ratio = visible_text_ratio(markup);
    if ratio < LOW_TEXT_RATIO {
        score += WEIGHT_LOW_TEXT;
        signals.push(format!("low_text_ratio:{ratio:.3}"));
    }

    if let Some(marker) = FRAMEWORK_MARKERS.iter().find(|m| markup.contains(**m)) {
        score += WEIGHT_FRAMEWORK;
        signals.push(format!("framework_marker:{marker}"));
    }

    if links::extract_links(filter, markup).is_empty() {
        score += WEIGHT_NO_LINKS;
        signals.push("no_content_links".to_string());
    }

    if latency > SLOW_RESPONSE {
        score += WEIGHT_SLOW;
        signals.push(format!("slow_response:{}ms", latency.as_millis()));
    }

    (f32::min(score, 1.0), signals)
}

/// Share of the markup that is visible text (outside script/style/template).
pub fn visible_text_ratio(markup: &str) -> f32 {
    if markup.is_empty() {
        return 0.0;
    }

    let document = Html::parse_document(markup);
    let visible: usize = document
        .tree
        .nodes()
        .filter_map(|node| {
            let Node::Text(text) = node.value() else {
                return None;
            };
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element().map(|e| e.name()))
                .map(|name| matches!(name, "script" | "style" | "noscript" | "template"))
                .unwrap_or(false);
            (!hidden).then(|| text.trim().len())
        })
        .sum();

    visible as f32 / markup.len() as f32
}
