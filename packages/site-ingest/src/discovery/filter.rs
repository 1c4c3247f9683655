//! The shared URL filter applied by every discovery layer.
//!
//! A candidate survives when it resolves to an http(s) URL on the seed's host
//! (or an allowed host), is not the seed itself, is not an asset, API, build
//! or navigation path, and has the shape of a content page. Survivors are
//! normalized: no fragment, no query, no trailing slash, lowercase host.

use std::collections::HashSet;

use url::Url;

use crate::error::{DiscoveryError, LayerResult};

const ASSET_EXTENSIONS: &[&str] = &[
    // images
    "png", "jpg", "jpeg", "gif", "webp", "svg", "ico", "bmp", "avif", "tif", "tiff",
    // styles and scripts
    "css", "js", "mjs", "cjs", "map", "ts",
    // fonts
    "woff", "woff2", "ttf", "otf", "eot",
    // archives
    "zip", "gz", "tgz", "tar", "rar", "7z", "bz2", "xz",
    // media
    "mp3", "mp4", "m4a", "m4v", "wav", "ogg", "oga", "webm", "mov", "avi", "mkv", "flac",
    // data and documents the page extractor does not handle
    "xml", "json", "rss", "atom", "txt", "csv", "pdf", "doc", "docx", "xls", "xlsx", "ppt",
    "pptx", "exe", "dmg", "apk",
];

/// Page-like extensions that are stripped before shape matching.
const PAGE_EXTENSIONS: &[&str] = &["html", "htm", "php", "asp", "aspx", "shtml"];

const INFRASTRUCTURE_PREFIXES: &[&str] = &[
    "/api/",
    "/_next/",
    "/_nuxt/",
    "/static/",
    "/assets/",
    "/wp-json/",
    "/wp-admin/",
    "/wp-content/",
    "/wp-includes/",
    "/cdn-cgi/",
    "/build/",
    "/dist/",
    "/node_modules/",
    "/graphql/",
    "/feed/",
];

const NAVIGATION_SEGMENTS: &[&str] = &[
    "about",
    "about-us",
    "contact",
    "contact-us",
    "login",
    "log-in",
    "signin",
    "sign-in",
    "signup",
    "sign-up",
    "register",
    "logout",
    "search",
    "cart",
    "checkout",
    "account",
    "my-account",
    "privacy",
    "privacy-policy",
    "terms",
    "terms-of-service",
    "terms-and-conditions",
    "cookie-policy",
    "tag",
    "tags",
    "author",
    "authors",
    "home",
    "index",
];

/// First path segments that mark a content section.
pub const CONTENT_SECTIONS: &[&str] = &[
    "blog",
    "article",
    "articles",
    "post",
    "posts",
    "guide",
    "guides",
    "news",
    "docs",
    "tutorial",
    "tutorials",
    "insights",
    "resources",
    "stories",
];

#[derive(Debug, Clone)]
pub struct UrlFilter {
    seed: Url,
    /// Normalized seed, never returned.
    seed_key: String,
    hosts: Vec<String>,
}

impl UrlFilter {
    pub fn new(seed: &str, allowed_hosts: &[String]) -> LayerResult<Self> {
        let seed_url = Url::parse(seed)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https") && u.host_str().is_some())
            .ok_or_else(|| DiscoveryError::InvalidSeed {
                url: seed.to_string(),
            })?;

        let mut hosts: Vec<String> = seed_url.host_str().map(bare_host).into_iter().collect();
        hosts.extend(allowed_hosts.iter().map(|h| bare_host(&h.to_lowercase())));

        Ok(Self {
            seed_key: normalize(&seed_url).to_string(),
            seed: seed_url,
            hosts,
        })
    }

    pub fn seed(&self) -> &Url {
        &self.seed
    }

    /// Also accept links on `host` (e.g. the host the seed redirected to).
    pub fn with_host(mut self, host: &str) -> Self {
        let host = bare_host(&host.to_lowercase());
        if !self.hosts.contains(&host) {
            self.hosts.push(host);
        }
        self
    }

    /// Resolve `raw` against the seed and return its normalized form if it
    /// passes every rule.
    pub fn accept(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') || has_ignored_scheme(raw) {
            return None;
        }
        let resolved = self.seed.join(raw).ok()?;
        self.accept_url(&resolved)
    }

    pub fn accept_url(&self, url: &Url) -> Option<String> {
        if !matches!(url.scheme(), "http" | "https") {
            return None;
        }
        if !self.is_allowed_host(url.host_str()?) {
            return None;
        }

        let normalized = normalize(url);
        let key = normalized.to_string();
        if key == self.seed_key {
            return None;
        }

        let path = normalized.path();
        if is_asset_path(path) || is_infrastructure_path(path) || is_navigation_path(path) {
            return None;
        }
        if !is_content_shape(path) {
            return None;
        }
        Some(key)
    }

    fn is_allowed_host(&self, host: &str) -> bool {
        let host = bare_host(&host.to_lowercase());
        self.hosts.iter().any(|h| *h == host)
    }
}

fn bare_host(host: &str) -> String {
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

fn has_ignored_scheme(raw: &str) -> bool {
    let lower = raw.to_ascii_lowercase();
    ["javascript:", "mailto:", "tel:", "data:", "sms:", "ftp:"]
        .iter()
        .any(|s| lower.starts_with(s))
}

/// Strip fragment and query, trim the trailing slash (except at the root).
/// Hosts are already lowercased by the `url` crate for http(s).
pub fn normalize(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_fragment(None);
    url.set_query(None);
    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
        if url.path().is_empty() {
            url.set_path("/");
        }
    }
    url
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or("")
}

fn extension(segment: &str) -> Option<String> {
    let (stem, ext) = segment.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

pub fn is_asset_path(path: &str) -> bool {
    extension(last_segment(path))
        .map(|ext| ASSET_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn is_infrastructure_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    INFRASTRUCTURE_PREFIXES.iter().any(|prefix| {
        lower.starts_with(prefix) || lower == prefix.trim_end_matches('/')
    })
}

pub fn is_navigation_path(path: &str) -> bool {
    let segments = segments(path);
    let Some(first) = segments.first() else {
        return false;
    };
    if NAVIGATION_SEGMENTS.contains(&strip_page_extension(first)) {
        return true;
    }
    // Archive listings: .../page/3
    segments
        .windows(2)
        .any(|w| w[0] == "page" && w[1].chars().all(|c| c.is_ascii_digit()))
}

fn segments(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase())
        .collect()
}

fn strip_page_extension(segment: &str) -> &str {
    match segment.rsplit_once('.') {
        Some((stem, ext)) if PAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) => stem,
        _ => segment,
    }
}

fn is_slug(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn is_year(segment: &str) -> bool {
    segment.len() == 4
        && segment.chars().all(|c| c.is_ascii_digit())
        && (segment.starts_with("19") || segment.starts_with("20"))
}

fn is_small_number(segment: &str) -> bool {
    (1..=2).contains(&segment.len()) && segment.chars().all(|c| c.is_ascii_digit())
}

/// Content-like paths: `/a-slug`, `/category/a-slug`, `/2024/05/a-slug`,
/// `/2024/a-slug`, or anything below a known content section.
pub fn is_content_shape(path: &str) -> bool {
    let mut segments = segments(path);
    if let Some(last) = segments.last_mut() {
        *last = strip_page_extension(last).to_string();
    }
    if segments.is_empty() || !segments.iter().all(|s| is_slug(s)) {
        return false;
    }

    let first = segments[0].as_str();
    if CONTENT_SECTIONS.contains(&first) {
        return segments.len() >= 2;
    }

    if is_year(first) {
        let rest = &segments[1..];
        let dated = rest
            .iter()
            .take_while(|s| is_small_number(s))
            .count();
        return dated <= 2 && rest.len() == dated + 1 && !is_small_number(&rest[dated]);
    }

    // Single slug or category/slug. Navigation words are dropped earlier.
    segments.len() <= 2
}

/// Ordered, deduplicated URL accumulator.
#[derive(Debug, Default, Clone)]
pub struct UrlSet {
    seen: HashSet<String>,
    urls: Vec<String>,
}

impl UrlSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether `url` was new.
    pub fn insert(&mut self, url: String) -> bool {
        if self.seen.insert(url.clone()) {
            self.urls.push(url);
            true
        } else {
            false
        }
    }

    /// Insert all, returning how many were new.
    pub fn extend<I: IntoIterator<Item = String>>(&mut self, urls: I) -> usize {
        urls.into_iter().filter(|u| self.insert(u.to_string())).count()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.seen.contains(url)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.urls
    }

    pub fn into_vec(self) -> Vec<String> {
        self.urls
    }
}
