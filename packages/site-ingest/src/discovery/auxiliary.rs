//! Cheap dynamic layer: re-fetch auxiliary endpoints.
//!
//! Sitemaps, feeds and pagination variants of the seed often list content
//! that the seed markup does not. No browser involved; sub-fetches run with
//! a small fixed concurrency cap so the target is not hammered.

use std::sync::LazyLock;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use regex::Regex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::filter::{UrlFilter, UrlSet};
use super::{links, LayerOutput};
use crate::config::DiscoveryConfig;
use crate::error::{FetchError, FetchResult, LayerResult};
use crate::traits::fetcher::{FetchedPage, PageFetcher};
use crate::types::discovery::Interaction;

const LAYER: u8 = 2;

static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)<loc>\s*(?:<!\[CDATA\[)?\s*([^<\]\s]+)").expect("valid regex")
});

/// RSS `<link>https://..</link>`; Atom links carry `href` and are covered by
/// the static patterns.
static FEED_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<link>\s*([^<\s]+)\s*</link>").expect("valid regex"));

/// Endpoints worth a look for `seed`, in fetch order.
pub fn endpoints(seed: &Url) -> Vec<String> {
    let mut urls: Vec<String> = ["/sitemap.xml", "/sitemap_index.xml", "/feed", "/rss.xml", "/atom.xml"]
        .iter()
        .filter_map(|path| seed.join(path).ok())
        .map(|u| u.to_string())
        .collect();

    for page in [2, 3] {
        let mut variant = seed.clone();
        variant.set_fragment(None);
        variant.query_pairs_mut().append_pair("page", &page.to_string());
        urls.push(variant.to_string());
    }

    let mut paged = seed.clone();
    paged.set_query(None);
    paged.set_fragment(None);
    let base = paged.path().trim_end_matches('/').to_string();
    paged.set_path(&format!("{base}/page/2"));
    urls.push(paged.to_string());

    urls
}

pub struct AuxiliaryLayer<'a> {
    fetcher: &'a dyn PageFetcher,
    config: &'a DiscoveryConfig,
}

impl<'a> AuxiliaryLayer<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, config: &'a DiscoveryConfig) -> Self {
        Self { fetcher, config }
    }

    pub async fn attempt(&self, filter: &UrlFilter) -> LayerResult<LayerOutput> {
        let deadline = Instant::now() + self.config.auxiliary_timeout;
        let mut output = LayerOutput::default();
        let mut found = UrlSet::new();

        let first = self.fetch_all(endpoints(filter.seed()), deadline).await;

        let mut children = Vec::new();
        for (url, result) in first {
            let Ok(page) = result else {
                debug!(url = %url, "Auxiliary endpoint unavailable");
                continue;
            };
            if is_sitemap_index(&page.body) {
                children.extend(
                    sitemap_locs(&page.body)
                        .into_iter()
                        .take(self.config.max_child_sitemaps),
                );
            }
            self.collect(filter, &url, &page, &mut found, &mut output);
        }

        if !children.is_empty() && Instant::now() < deadline {
            for (url, result) in self.fetch_all(children, deadline).await {
                if let Ok(page) = result {
                    self.collect(filter, &url, &page, &mut found, &mut output);
                }
            }
        }

        // Whatever finished before the deadline is kept.
        if Instant::now() >= deadline {
            debug!(found = found.len(), "Auxiliary layer ran out of time");
            output
                .interactions
                .push(Interaction::BudgetExhausted { layer: LAYER });
        }

        output.urls = found.into_vec();
        Ok(output)
    }

    /// Fetch `urls` in order, each bounded by its own timeout and by `deadline`.
    async fn fetch_all(
        &self,
        urls: Vec<String>,
        deadline: Instant,
    ) -> Vec<(String, FetchResult<FetchedPage>)> {
        let timeout = self.per_fetch_timeout();
        stream::iter(urls)
            .map(|url| async move {
                let fetch = self.fetcher.fetch(&url, timeout);
                let result = tokio::time::timeout_at(deadline, fetch)
                    .await
                    .unwrap_or_else(|_| Err(FetchError::Timeout { url: url.clone() }));
                (url, result)
            })
            .buffered(self.config.sub_fetch_concurrency.max(1))
            .collect()
            .await
    }

    fn per_fetch_timeout(&self) -> Duration {
        self.config.static_timeout.min(self.config.auxiliary_timeout)
    }

    fn collect(
        &self,
        filter: &UrlFilter,
        url: &str,
        page: &FetchedPage,
        found: &mut UrlSet,
        output: &mut LayerOutput,
    ) {
        let accepted: Vec<String> = candidates(&page.body)
            .iter()
            .filter_map(|raw| filter.accept(raw))
            .collect();
        let new = found.extend(accepted);
        debug!(url = %url, found = new, "Auxiliary endpoint parsed");
        output.interactions.push(Interaction::FetchedAuxiliary {
            url: url.to_string(),
            found: new,
        });
    }
}

fn is_sitemap_index(body: &str) -> bool {
    body.contains("<sitemapindex")
}

pub fn sitemap_locs(body: &str) -> Vec<String> {
    LOC_RE
        .captures_iter(body)
        .map(|cap| cap[1].replace("&amp;", "&"))
        .collect()
}

/// Everything URL-like in a sitemap, feed or HTML body.
fn candidates(body: &str) -> Vec<String> {
    let mut raw = sitemap_locs(body);
    raw.extend(
        FEED_LINK_RE
            .captures_iter(body)
            .map(|cap| cap[1].to_string()),
    );
    raw.extend(links::raw_candidates(body));
    raw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFetcher;

    fn filter() -> UrlFilter {
        UrlFilter::new("https://example.com/blog", &[]).unwrap()
    }

    #[test]
    fn test_endpoints_cover_sitemaps_feeds_and_pagination() {
        let seed = Url::parse("https://example.com/blog/").unwrap();
        let urls = endpoints(&seed);
        assert!(urls.contains(&"https://example.com/sitemap.xml".to_string()));
        assert!(urls.contains(&"https://example.com/rss.xml".to_string()));
        assert!(urls.contains(&"https://example.com/blog/?page=2".to_string()));
        assert!(urls.contains(&"https://example.com/blog/page/2".to_string()));
    }

    #[test]
    fn test_sitemap_locs_handle_cdata() {
        let xml = r#"<urlset><url><loc>https://example.com/blog/a-post</loc></url>
            <url><loc><![CDATA[https://example.com/blog/b-post]]></loc></url></urlset>"#;
        assert_eq!(
            sitemap_locs(xml),
            vec!["https://example.com/blog/a-post", "https://example.com/blog/b-post"]
        );
    }

    #[tokio::test]
    async fn test_sitemap_and_feed_are_merged() {
        let fetcher = MockFetcher::new()
            .with_xml(
                "https://example.com/sitemap.xml",
                "<urlset><url><loc>https://example.com/blog/first-post</loc></url>\
                 <url><loc>https://example.com/about</loc></url></urlset>",
            )
            .with_xml(
                "https://example.com/rss.xml",
                "<rss><channel><item><link>https://example.com/blog/second-post</link></item>\
                 <item><link>https://example.com/blog/first-post</link></item></channel></rss>",
            );
        let config = DiscoveryConfig::default();

        let output = AuxiliaryLayer::new(&fetcher, &config)
            .attempt(&filter())
            .await
            .unwrap();

        assert_eq!(
            output.urls,
            vec![
                "https://example.com/blog/first-post",
                "https://example.com/blog/second-post",
            ]
        );
        assert_eq!(output.interactions.len(), 2);
    }

    #[tokio::test]
    async fn test_sitemap_index_follows_children() {
        let fetcher = MockFetcher::new()
            .with_xml(
                "https://example.com/sitemap_index.xml",
                "<sitemapindex><sitemap><loc>https://example.com/post-sitemap.xml</loc></sitemap></sitemapindex>",
            )
            .with_xml(
                "https://example.com/post-sitemap.xml",
                "<urlset><url><loc>https://example.com/2024/03/spring-news</loc></url></urlset>",
            );
        let config = DiscoveryConfig::default();

        let output = AuxiliaryLayer::new(&fetcher, &config)
            .attempt(&filter())
            .await
            .unwrap();

        assert_eq!(output.urls, vec!["https://example.com/2024/03/spring-news"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_site_keeps_pages_fetched_before_deadline() {
        let fetcher = MockFetcher::new()
            .with_delay(Duration::from_secs(8))
            .with_xml(
                "https://example.com/sitemap.xml",
                "<urlset><url><loc>https://example.com/news/spring-volunteer-day</loc></url></urlset>",
            );
        let config = DiscoveryConfig::default();

        let started = Instant::now();
        let output = AuxiliaryLayer::new(&fetcher, &config)
            .attempt(&filter())
            .await
            .unwrap();

        assert_eq!(output.urls, vec!["https://example.com/news/spring-volunteer-day"]);
        assert!(output
            .interactions
            .iter()
            .any(|i| matches!(i, Interaction::BudgetExhausted { layer: 2 })));
        assert!(started.elapsed() <= config.auxiliary_timeout + Duration::from_millis(1));
    }
}
