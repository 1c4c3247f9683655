//! Configuration for discovery, the worker pool, and storage.
//!
//! Every component takes its configuration by value at construction; nothing
//! reads process-wide state after startup.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use dotenvy::dotenv;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Labels of controls that reveal more content.
pub const DEFAULT_LOAD_MORE_LABELS: &[&str] = &[
    "load more",
    "show more",
    "read more",
    "see more",
    "view more",
    "more posts",
    "more articles",
    "older posts",
    "next page",
];

// ============================================================================
// Discovery
// ============================================================================

/// Time budgets and caps for the discovery layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Hard budget for the prober's single fetch.
    pub probe_timeout: Duration,
    /// Score at or above which a site counts as JS-heavy.
    pub js_heavy_threshold: f32,
    /// Budget for the static layer when it has to fetch the seed itself.
    pub static_timeout: Duration,
    /// Overall budget for the auxiliary-endpoint layer.
    pub auxiliary_timeout: Duration,
    /// Overall budget for the browser layer.
    pub browser_timeout: Duration,
    /// Maximum load-more / scroll actions per browser session.
    pub max_browser_iterations: usize,
    /// Consecutive actions yielding nothing new before the browser layer stops.
    pub max_idle_iterations: usize,
    /// Concurrency cap for sub-fetches inside a layer.
    pub sub_fetch_concurrency: usize,
    /// Maximum child sitemaps followed from a sitemap index.
    pub max_child_sitemaps: usize,
    /// Hosts accepted besides the seed's own host.
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
    #[serde(default = "default_load_more_labels")]
    pub load_more_labels: Vec<String>,
    /// Minimum words for a guessed URL to count as verified.
    pub min_verified_words: usize,
    /// Maximum guessed URLs tested per discovery.
    pub max_slug_candidates: usize,
    /// Upper bound on URLs returned.
    pub max_urls: usize,
}

fn default_load_more_labels() -> Vec<String> {
    DEFAULT_LOAD_MORE_LABELS.iter().map(|s| s.to_string()).collect()
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout: Duration::from_millis(1500),
            js_heavy_threshold: 0.5,
            static_timeout: Duration::from_secs(10),
            auxiliary_timeout: Duration::from_secs(20),
            browser_timeout: Duration::from_secs(60),
            max_browser_iterations: 5,
            max_idle_iterations: 2,
            sub_fetch_concurrency: 3,
            max_child_sitemaps: 5,
            allowed_hosts: Vec::new(),
            load_more_labels: default_load_more_labels(),
            min_verified_words: 50,
            max_slug_candidates: 20,
            max_urls: 500,
        }
    }
}

impl DiscoveryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn with_browser_timeout(mut self, timeout: Duration) -> Self {
        self.browser_timeout = timeout;
        self
    }

    pub fn with_max_browser_iterations(mut self, iterations: usize) -> Self {
        self.max_browser_iterations = iterations;
        self
    }

    pub fn with_js_heavy_threshold(mut self, threshold: f32) -> Self {
        self.js_heavy_threshold = threshold;
        self
    }

    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into());
        self
    }

    pub fn with_max_urls(mut self, max: usize) -> Self {
        self.max_urls = max;
        self
    }

    pub fn with_min_verified_words(mut self, words: usize) -> Self {
        self.min_verified_words = words;
        self
    }
}

// ============================================================================
// Worker pool
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrent extraction calls (`N`).
    pub max_concurrency: usize,
    /// Retries allowed before a job becomes terminally failed.
    pub max_retries: u32,
    /// Backoff base; attempt `k` waits `base * 2^k`.
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Sleep between poll cycles.
    pub poll_interval: Duration,
    /// Sleep after a poll cycle that hit an internal error.
    pub poll_error_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            max_retries: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
            poll_interval: Duration::from_secs(5),
            poll_error_interval: Duration::from_secs(30),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base = base;
        self.backoff_max = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_poll_error_interval(mut self, interval: Duration) -> Self {
        self.poll_error_interval = interval;
        self
    }

    /// How many pending jobs one poll cycle fetches.
    pub fn poll_batch(&self) -> usize {
        self.max_concurrency * 2
    }
}

// ============================================================================
// Storage + top level
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    pub data_dir: PathBuf,
    /// Overrides the default `sqlite://<data_dir>/jobs.db`.
    pub database_url: Option<String>,
    /// Terminal jobs older than this are purged at worker start.
    pub retention_days: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database_url: None,
            retention_days: 30,
        }
    }
}

impl StoreConfig {
    pub fn database_url(&self) -> String {
        self.database_url.clone().unwrap_or_else(|| {
            format!("sqlite://{}?mode=rwc", self.data_dir.join("jobs.db").display())
        })
    }
}

/// Browserless endpoint for the browser layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    pub base_url: String,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IngestConfig {
    pub discovery: DiscoveryConfig,
    pub pool: PoolConfig,
    pub store: StoreConfig,
    /// Browser layer disabled when absent.
    pub browser: Option<BrowserConfig>,
    /// Where the worker binary writes completed documents.
    pub output_dir: Option<PathBuf>,
}

impl IngestConfig {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv();

        let mut config = Self::default();

        if let Some(dir) = optional("INGEST_DATA_DIR") {
            config.store.data_dir = PathBuf::from(dir);
        }
        config.store.database_url = optional("INGEST_DATABASE_URL");
        if let Some(days) = parsed::<u32>("INGEST_RETENTION_DAYS")? {
            config.store.retention_days = days;
        }

        if let Some(n) = parsed::<usize>("INGEST_MAX_CONCURRENCY")? {
            config.pool.max_concurrency = n;
        }
        if let Some(n) = parsed::<u32>("INGEST_MAX_RETRIES")? {
            config.pool.max_retries = n;
        }
        if let Some(ms) = parsed::<u64>("INGEST_POLL_INTERVAL_MS")? {
            config.pool.poll_interval = Duration::from_millis(ms);
        }

        if let Some(ms) = parsed::<u64>("INGEST_PROBE_TIMEOUT_MS")? {
            config.discovery.probe_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed::<u64>("INGEST_BROWSER_TIMEOUT_MS")? {
            config.discovery.browser_timeout = Duration::from_millis(ms);
        }

        config.browser = optional("BROWSERLESS_URL").map(|base_url| BrowserConfig {
            base_url,
            token: optional("BROWSERLESS_TOKEN"),
        });
        config.output_dir = optional("INGEST_OUTPUT_DIR").map(PathBuf::from);

        Ok(config)
    }

    /// Reject configurations that cannot work. Run before any processing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool.max_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "INGEST_MAX_CONCURRENCY".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.discovery.sub_fetch_concurrency == 0 {
            return Err(ConfigError::Invalid {
                key: "sub_fetch_concurrency".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        ensure_writable(&self.store.data_dir)?;
        if let Some(dir) = &self.output_dir {
            ensure_writable(dir)?;
        }
        Ok(())
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                value,
                reason: e.to_string(),
            }),
    }
}

/// Create `dir` if needed and prove we can write into it.
fn ensure_writable(dir: &Path) -> Result<(), ConfigError> {
    let unwritable = |source| ConfigError::StorageUnwritable {
        path: dir.to_path_buf(),
        source,
    };

    fs::create_dir_all(dir).map_err(unwritable)?;
    let marker = dir.join(".write-check");
    fs::write(&marker, b"ok").map_err(unwritable)?;
    fs::remove_file(&marker).map_err(unwritable)?;
    Ok(())
}
