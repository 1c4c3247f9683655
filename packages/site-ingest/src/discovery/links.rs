//! Static link extraction patterns.
//!
//! The static layer runs four fixed patterns over markup it already has:
//! `href` attributes, markdown links, URL-ish fields in embedded JSON, and
//! bare `http(s)://` text. Everything found goes through the [`UrlFilter`].

use std::sync::LazyLock;

use regex::Regex;

use super::filter::{UrlFilter, UrlSet};

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)href\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

static MARKDOWN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[[^\]]*\]\(([^)\s]+)\)").expect("valid regex"));

/// `"url": "..."`-style fields in inline JSON (hydration payloads, JSON-LD).
static JSON_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""(?:url|href|link|permalink|slug|path|canonical)"\s*:\s*"([^"]+)""#)
        .expect("valid regex")
});

static PLAIN_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"https?://[^\s"'<>()\\]+"#).expect("valid regex"));

/// Every raw candidate in `markup`, in pattern order then document order.
pub fn raw_candidates(markup: &str) -> Vec<String> {
    let mut candidates = Vec::new();

    for cap in HREF_RE.captures_iter(markup) {
        candidates.push(decode_entities(&cap[1]));
    }
    for cap in MARKDOWN_RE.captures_iter(markup) {
        candidates.push(cap[1].to_string());
    }
    for cap in JSON_FIELD_RE.captures_iter(markup) {
        candidates.push(cap[1].replace("\\/", "/"));
    }
    for m in PLAIN_URL_RE.find_iter(markup) {
        candidates.push(
            m.as_str()
                .trim_end_matches(['.', ',', ';', ':', '!', '?'])
                .to_string(),
        );
    }

    candidates
}

/// Filtered, normalized, deduplicated links from `markup`.
pub fn extract_links(filter: &UrlFilter, markup: &str) -> Vec<String> {
    let mut set = UrlSet::new();
    set.extend(
        raw_candidates(markup)
            .iter()
            .filter_map(|raw| filter.accept(raw)),
    );
    set.into_vec()
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&#x2F;", "/")
        .replace("&#47;", "/")
}
