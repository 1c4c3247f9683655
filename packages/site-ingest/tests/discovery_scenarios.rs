//! End-to-end discovery runs against mock fetchers and renderers.

use std::sync::Arc;

use site_ingest::testing::{MockExtractor, MockFetcher, MockPage, MockRenderer};
use site_ingest::{Discovery, DiscoveryConfig, DiscoveryResult, Interaction, ProbeOutcome};

const APP_SEED: &str = "https://app.example.com/blog";
const BLOG_SEED: &str = "https://example.com/blog";

fn app_shell() -> String {
    r#"<html><head><script src="/_next/static/chunks/main.js"></script></head>
    <body><div id="__next"><button class="more">Load more</button></div>
    <script id="__NEXT_DATA__" type="application/json">{"props":{"pageProps":{}},"buildId":"b1"}</script>
    </body></html>"#
        .to_string()
}

fn revealed_posts(count: usize) -> String {
    (1..=count)
        .map(|i| format!("<article><a href=\"/blog/revealed-post-{i}\">Post {i}</a></article>"))
        .collect()
}

fn article_index(count: usize) -> String {
    let mut html = String::from("<html><head><title>Blog</title></head><body><main>");
    for i in 0..count {
        html.push_str(&format!(
            "<article><h2><a href=\"/blog/weekly-notes-{i}\">Weekly notes {i}</a></h2>\
             <p>Plain readable text about the notes of week {i}, long enough that the visible \
             text clearly outweighs the surrounding markup on this listing page.</p></article>"
        ));
    }
    html.push_str("</main></body></html>");
    html
}

fn discovery(fetcher: MockFetcher, renderer: MockRenderer) -> Discovery {
    Discovery::new(
        Arc::new(fetcher),
        Arc::new(MockExtractor::new()),
        DiscoveryConfig::default(),
    )
    .with_renderer(Arc::new(renderer))
}

fn assert_clean(result: &DiscoveryResult, seed: &str) {
    for url in &result.urls {
        assert_ne!(url, seed);
        assert!(!url.contains('#') && !url.contains('?'), "unclean url {url}");
    }
}

#[tokio::test]
async fn load_more_site_escalates_to_browser() {
    let fetcher = MockFetcher::new().with_page(APP_SEED, app_shell());
    let renderer = MockRenderer::new().with_page(
        APP_SEED,
        MockPage::new(app_shell()).with_load_more("Load more", revealed_posts(5)),
    );

    let result = discovery(fetcher, renderer.clone())
        .discover(APP_SEED, 10)
        .await
        .unwrap();

    assert!(result.probe.js_heavy, "probe: {:?}", result.probe);
    assert_eq!(result.layer, 3);
    assert!(result.success);
    assert_eq!(result.urls.len(), 5);
    assert_eq!(result.urls[0], "https://app.example.com/blog/revealed-post-1");
    assert!(result.user_actions() >= 1);
    assert!(result
        .interactions
        .iter()
        .any(|i| matches!(i, Interaction::Clicked { label } if label == "Load more")));
    assert_eq!(renderer.opened(), 1);
    assert_clean(&result, APP_SEED);
}

#[tokio::test]
async fn static_article_index_stops_at_layer_one() {
    let fetcher = MockFetcher::new().with_page(BLOG_SEED, article_index(10));
    let renderer = MockRenderer::new();

    let result = discovery(fetcher.clone(), renderer.clone())
        .discover(BLOG_SEED, 10)
        .await
        .unwrap();

    assert!(!result.probe.js_heavy);
    assert!(result.score < 0.5);
    assert_eq!(result.layer, 1);
    assert_eq!(result.urls.len(), 10);
    assert_eq!(renderer.opened(), 0);
    // Layer 1 reuses the probe's markup.
    assert_eq!(fetcher.call_count(), 1);
    assert!(matches!(
        result.interactions.as_slice(),
        [Interaction::ParsedMarkup { found: 10, .. }]
    ));
    assert_clean(&result, BLOG_SEED);
}

#[tokio::test]
async fn sparse_site_uses_sitemap_and_skips_browser() {
    let seed = "https://example.com/";
    let landing = "<html><body><h1>Welcome</h1><p>A small organization with a plain \
                   landing page and no links to any of its articles at all.</p></body></html>";
    let sitemap = r#"<?xml version="1.0" encoding="UTF-8"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
          <url><loc>https://example.com/news/spring-volunteer-day</loc></url>
          <url><loc>https://example.com/news/food-shelf-update</loc></url>
          <url><loc>https://example.com/about</loc></url>
        </urlset>"#;
    let fetcher = MockFetcher::new()
        .with_page(seed, landing)
        .with_xml("https://example.com/sitemap.xml", sitemap);
    let renderer = MockRenderer::new();

    let result = discovery(fetcher, renderer.clone())
        .discover(seed, 20)
        .await
        .unwrap();

    assert!(!result.probe.js_heavy);
    assert_eq!(result.layer, 2);
    assert_eq!(
        result.urls,
        vec![
            "https://example.com/news/spring-volunteer-day",
            "https://example.com/news/food-shelf-update",
        ]
    );
    assert_eq!(renderer.opened(), 0);
}

#[tokio::test]
async fn unavailable_renderer_counts_as_empty_layer() {
    let fetcher = MockFetcher::new().with_page(APP_SEED, app_shell());

    let result = discovery(fetcher, MockRenderer::unavailable())
        .discover(APP_SEED, 10)
        .await
        .unwrap();

    assert_eq!(result.layer, 3);
    assert!(!result.success);
    assert!(result.urls.is_empty());
    assert!(result
        .interactions
        .iter()
        .any(|i| matches!(i, Interaction::LayerFailed { layer: 3, .. })));
}

#[tokio::test]
async fn missing_renderer_is_recorded_as_layer_failure() {
    let fetcher = MockFetcher::new().with_page(APP_SEED, app_shell());
    let discovery = Discovery::new(
        Arc::new(fetcher),
        Arc::new(MockExtractor::new()),
        DiscoveryConfig::default(),
    );

    let result = discovery.discover(APP_SEED, 10).await.unwrap();

    assert_eq!(result.layer, 3);
    assert!(result
        .interactions
        .iter()
        .any(|i| matches!(i, Interaction::LayerFailed { layer: 3, .. })));
}

#[tokio::test]
async fn unreachable_seed_never_reaches_browser() {
    let renderer = MockRenderer::new();

    let result = discovery(MockFetcher::new(), renderer.clone())
        .discover("https://down.example.com/blog", 10)
        .await
        .unwrap();

    assert!(matches!(result.probe.outcome, ProbeOutcome::NetworkFailure { .. }));
    assert_eq!(result.layer, 2);
    assert!(!result.success);
    assert_eq!(renderer.opened(), 0);
    assert!(result
        .interactions
        .iter()
        .any(|i| matches!(i, Interaction::LayerFailed { layer: 1, .. })));
}

#[tokio::test]
async fn headings_are_verified_when_nothing_else_is_found() {
    let shell = r#"<html><body><div id="root">
        <h2>Community Garden Opens</h2><h2>Winter Coat Drive</h2>
        </div></body></html>"#;
    let fetcher = MockFetcher::new().with_page(APP_SEED, shell);
    let renderer = MockRenderer::new().with_page(APP_SEED, MockPage::new(shell));
    let extractor = MockExtractor::new()
        .known_only()
        .with_document(
            "https://app.example.com/blog/community-garden-opens",
            "word ".repeat(200),
        );

    let discovery = Discovery::new(
        Arc::new(fetcher),
        Arc::new(extractor),
        DiscoveryConfig::default(),
    )
    .with_renderer(Arc::new(renderer));

    let result = discovery.discover(APP_SEED, 10).await.unwrap();

    assert_eq!(result.layer, 3);
    assert_eq!(
        result.urls,
        vec!["https://app.example.com/blog/community-garden-opens"]
    );
    assert!(result.interactions.iter().any(|i| matches!(
        i,
        Interaction::PatternVerified { words: 200, .. }
    )));
}

#[tokio::test]
async fn invalid_seed_is_the_only_error() {
    let result = discovery(MockFetcher::new(), MockRenderer::new())
        .discover("ftp://example.com/files", 5)
        .await;
    assert!(result.is_err());
}
