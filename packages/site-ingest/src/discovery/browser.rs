//! Browser simulation layer.
//!
//! Renders the seed, then alternates between activating load-more controls
//! and scrolling until nothing new appears, the iteration cap is hit, or the
//! time budget runs out. Network requests seen during the session are mined
//! for page URLs. If all of that finds nothing, headings of the rendered page
//! are turned into guessed URLs and each guess is verified by extracting it.

use std::future::Future;
use std::sync::LazyLock;

use futures::stream::{self, StreamExt};
use regex::Regex;
use scraper::{Html, Selector};
use tokio::time::Instant;
use tracing::{debug, info};
use url::Url;

use super::filter::{UrlFilter, UrlSet};
use super::{links, LayerOutput};
use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, LayerResult, RenderResult};
use crate::traits::extractor::Extractor;
use crate::traits::renderer::{RenderSession, Renderer};
use crate::types::discovery::Interaction;

const LAYER: u8 = 3;

/// Team id used when verifying guessed URLs; nothing is stored under it.
pub const VERIFICATION_TEAM: &str = "discovery";

/// Next.js client-side data routes: `/_next/data/<build>/<page>.json`.
static NEXT_DATA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^/_next/data/[^/]+/(.+)\.json$").expect("valid regex"));

/// Sections tried for guessed slugs besides the seed's own path.
const GUESS_SECTIONS: &[&str] = &["blog", "articles", "posts", "news"];

pub struct BrowserLayer<'a> {
    renderer: &'a dyn Renderer,
    extractor: &'a dyn Extractor,
    config: &'a DiscoveryConfig,
}

impl<'a> BrowserLayer<'a> {
    pub fn new(
        renderer: &'a dyn Renderer,
        extractor: &'a dyn Extractor,
        config: &'a DiscoveryConfig,
    ) -> Self {
        Self {
            renderer,
            extractor,
            config,
        }
    }

    pub async fn attempt(&self, filter: &UrlFilter, desired: usize) -> LayerResult<LayerOutput> {
        let deadline = Instant::now() + self.config.browser_timeout;
        let seed = filter.seed().as_str();
        let mut output = LayerOutput::default();
        let mut found = UrlSet::new();

        let mut session = within(deadline, self.renderer.open()).await?;
        within(deadline, session.load(seed)).await?;
        output.interactions.push(Interaction::Rendered {
            url: seed.to_string(),
        });

        let mut html = within(deadline, session.content()).await?;
        found.extend(links::extract_links(filter, &html));
        debug!(url = %seed, found = found.len(), "Initial render parsed");

        let mut idle = 0;
        for _ in 0..self.config.max_browser_iterations {
            if desired > 0 && found.len() >= desired {
                break;
            }

            let step = match self.interact(session.as_mut(), deadline).await {
                Ok(Some(action)) => action,
                Ok(None) => break,
                Err(DiscoveryError::Budget { .. }) => {
                    output.interactions.push(Interaction::BudgetExhausted { layer: LAYER });
                    break;
                }
                Err(e) => return Err(e),
            };
            output.interactions.push(step);

            html = match within(deadline, session.content()).await {
                Ok(html) => html,
                Err(DiscoveryError::Budget { .. }) => {
                    output.interactions.push(Interaction::BudgetExhausted { layer: LAYER });
                    break;
                }
                Err(e) => return Err(e),
            };

            if found.extend(links::extract_links(filter, &html)) == 0 {
                idle += 1;
                if idle >= self.config.max_idle_iterations {
                    break;
                }
            } else {
                idle = 0;
            }
        }

        if let Ok(requests) = within(deadline, session.network_requests()).await {
            for request in requests {
                if let Some(url) = page_url_for_request(filter, &request) {
                    if found.insert(url) {
                        output.interactions.push(Interaction::ObservedRequest { url: request });
                    }
                }
            }
        }

        if found.is_empty() {
            let verified = self.verify_guesses(filter, &html, deadline).await;
            for (url, words) in verified {
                if found.insert(url.clone()) {
                    output
                        .interactions
                        .push(Interaction::PatternVerified { url, words });
                }
            }
        }

        info!(
            url = %seed,
            found = found.len(),
            actions = output.interactions.iter().filter(|i| i.is_user_action()).count(),
            "Browser layer finished"
        );

        output.urls = found.into_vec();
        Ok(output)
    }

    /// One simulated user action: a load-more click, else a scroll.
    /// `None` when the page offers neither.
    async fn interact(
        &self,
        session: &mut dyn RenderSession,
        deadline: Instant,
    ) -> LayerResult<Option<Interaction>> {
        if let Some(label) = within(deadline, session.activate(&self.config.load_more_labels)).await? {
            return Ok(Some(Interaction::Clicked { label }));
        }
        if within(deadline, session.scroll_to_bottom()).await? {
            return Ok(Some(Interaction::Scrolled));
        }
        Ok(None)
    }

    /// Slugify headings into candidate URLs and keep the ones the extractor
    /// confirms carry real content.
    async fn verify_guesses(
        &self,
        filter: &UrlFilter,
        html: &str,
        deadline: Instant,
    ) -> Vec<(String, usize)> {
        let candidates = guess_candidates(filter, &headings(html), self.config.max_slug_candidates);
        if candidates.is_empty() {
            return Vec::new();
        }
        debug!(candidates = candidates.len(), "Verifying guessed URLs");

        let min_words = self.config.min_verified_words;
        stream::iter(candidates)
            .map(|url| async move {
                let result =
                    tokio::time::timeout_at(deadline, self.extractor.extract(&url, VERIFICATION_TEAM))
                        .await;
                match result {
                    Ok(Ok(doc)) if doc.word_count() >= min_words => Some((url, doc.word_count())),
                    _ => None,
                }
            })
            .buffered(self.config.sub_fetch_concurrency.max(1))
            .filter_map(|verified| async move { verified })
            .collect()
            .await
    }
}

/// Await a rendering call, bounded by the layer's deadline.
async fn within<T, F>(deadline: Instant, call: F) -> LayerResult<T>
where
    F: Future<Output = RenderResult<T>>,
{
    match tokio::time::timeout_at(deadline, call).await {
        Ok(result) => result.map_err(DiscoveryError::from),
        Err(_) => Err(DiscoveryError::Budget { layer: LAYER }),
    }
}

/// Map an observed request to a page URL: either the request is a page
/// itself, or it is a framework data route for one.
pub fn page_url_for_request(filter: &UrlFilter, request: &str) -> Option<String> {
    if let Some(url) = filter.accept(request) {
        return Some(url);
    }
    let parsed = Url::parse(request).ok()?;
    let caps = NEXT_DATA_RE.captures(parsed.path())?;
    let page = caps[1].trim_end_matches("/index");
    if page == "index" {
        return None;
    }
    filter.accept(&format!("/{page}"))
}

/// Text of the `h1`-`h3` headings in document order.
pub fn headings(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let Ok(selector) = Selector::parse("h1, h2, h3") else {
        return Vec::new();
    };
    document
        .select(&selector)
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// "Hello, World: Part 2!" -> "hello-world-part-2"
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// Candidate URLs for heading slugs: under the seed path, then under common
/// content sections. Filtered, deduplicated, capped at `max`.
pub fn guess_candidates(filter: &UrlFilter, headings: &[String], max: usize) -> Vec<String> {
    let base = filter.seed().path().trim_end_matches('/').to_string();
    let seed_section = base
        .trim_start_matches('/')
        .split('/')
        .next()
        .unwrap_or("")
        .to_string();

    let mut set = UrlSet::new();
    for heading in headings {
        let slug = slugify(heading);
        if !slug.contains('-') || slug.len() > 80 {
            continue;
        }

        let mut paths = vec![format!("{base}/{slug}")];
        paths.extend(
            GUESS_SECTIONS
                .iter()
                .filter(|s| **s != seed_section)
                .map(|s| format!("/{s}/{slug}")),
        );

        for path in paths {
            if let Some(url) = filter.accept(&path) {
                set.insert(url);
            }
            if set.len() >= max {
                return set.into_vec();
            }
        }
    }
    set.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filter() -> UrlFilter {
        UrlFilter::new("https://example.com/blog", &[]).unwrap()
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Hello, World: Part 2!"), "hello-world-part-2");
        assert_eq!(slugify("  Spaces   everywhere "), "spaces-everywhere");
        assert_eq!(slugify("Single"), "single");
    }

    #[test]
    fn test_next_data_routes_map_to_pages() {
        let f = filter();
        assert_eq!(
            page_url_for_request(&f, "https://example.com/_next/data/build-123/blog/new-feature.json")
                .as_deref(),
            Some("https://example.com/blog/new-feature")
        );
        assert_eq!(
            page_url_for_request(&f, "https://example.com/_next/data/build-123/index.json"),
            None
        );
        assert_eq!(page_url_for_request(&f, "https://cdn.example.net/app.js"), None);
    }

    #[test]
    fn test_headings_in_order() {
        let html = "<h1>Our Blog</h1><div><h2>First Big Idea</h2><h3> Second idea </h3></div><h4>No</h4>";
        assert_eq!(
            headings(html),
            vec!["Our Blog", "First Big Idea", "Second idea"]
        );
    }

    #[test]
    fn test_guess_candidates_are_filtered_and_capped() {
        let f = filter();
        let headings = vec![
            "First Big Idea".to_string(),
            "About".to_string(),
            "Second Idea".to_string(),
        ];
        let guesses = guess_candidates(&f, &headings, 3);
        assert_eq!(
            guesses,
            vec![
                "https://example.com/blog/first-big-idea",
                "https://example.com/articles/first-big-idea",
                "https://example.com/posts/first-big-idea",
            ]
        );
    }
}
