//! Adaptive link discovery.
//!
//! [`Discovery`] probes the seed, then runs the layers in cost order
//! (static, cheap dynamic, browser) until one of them satisfies the success
//! criterion or the probe's ceiling is reached:
//!
//! ```text
//! probe ──► static ──(nothing found)──► cheap dynamic ──(short + JS-heavy)──► browser
//! ```
//!
//! Every layer shares one contract (seed + desired count in, URLs +
//! interactions out) and one filter. The stop decision lives in
//! [`criterion_met`], not in the layers, so it can be tested on its own.
//! A layer that errors counts as a layer that found nothing.

pub mod auxiliary;
pub mod browser;
pub mod filter;
pub mod links;
pub mod probe;

use std::sync::Arc;

use tokio::time::Instant;
use tracing::{info, warn};
use url::Url;

use crate::config::DiscoveryConfig;
use crate::error::{DiscoveryError, LayerResult, RenderError};
use crate::traits::{Extractor, PageFetcher, Renderer};
use crate::types::discovery::{DiscoveryResult, Interaction, Layer, ProbeReport};

pub use auxiliary::AuxiliaryLayer;
pub use browser::BrowserLayer;
pub use filter::{UrlFilter, UrlSet};
pub use probe::Prober;

/// What a single layer produced.
#[derive(Debug, Default, Clone)]
pub struct LayerOutput {
    pub urls: Vec<String>,
    pub interactions: Vec<Interaction>,
}

/// Whether discovery may stop after `layer` with `found` URLs in hand.
///
/// - static: anything at all was found, or the target was reached.
/// - cheap dynamic: the target was reached, or the site is not JS-heavy
///   (sparse sites do not earn a browser).
/// - browser: always final.
///
/// A `desired` of zero means "no target": it is reached by any URL.
pub fn criterion_met(layer: Layer, found: usize, desired: usize, js_heavy: bool) -> bool {
    let target_reached = if desired == 0 {
        found > 0
    } else {
        found >= desired
    };

    match layer {
        Layer::Static => found > 0 || target_reached,
        Layer::CheapDynamic => target_reached || !js_heavy,
        Layer::Browser => true,
    }
}

pub struct Discovery {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<dyn Extractor>,
    renderer: Option<Arc<dyn Renderer>>,
    prober: Prober,
    config: DiscoveryConfig,
}

impl Discovery {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<dyn Extractor>,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            prober: Prober::new(fetcher.clone(), &config),
            fetcher,
            extractor,
            renderer: None,
            config,
        }
    }

    /// Enable the browser layer.
    pub fn with_renderer(mut self, renderer: Arc<dyn Renderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    /// Discover content URLs reachable from `seed`.
    ///
    /// Only an unusable seed is an error; every other failure is folded into
    /// the result (see [`Interaction::LayerFailed`]).
    pub async fn discover(&self, seed: &str, desired: usize) -> LayerResult<DiscoveryResult> {
        let started = Instant::now();
        let mut filter = UrlFilter::new(seed, &self.config.allowed_hosts)?;

        info!(seed = %seed, desired = desired, "Discovery starting");

        let probe = self.prober.probe(&filter).await;
        if let Some(host) = probe
            .final_url
            .as_deref()
            .and_then(|u| Url::parse(u).ok())
            .and_then(|u| u.host_str().map(str::to_string))
        {
            filter = filter.with_host(&host);
        }

        let ceiling = probe.max_layer();
        let mut urls = UrlSet::new();
        let mut interactions = Vec::new();
        let mut stopped_at = Layer::Static;

        for layer in Layer::ORDERED {
            stopped_at = layer;

            match self.attempt(layer, &filter, &probe, desired).await {
                Ok(output) => {
                    let new = urls.extend(output.urls);
                    interactions.extend(output.interactions);
                    info!(
                        seed = %seed,
                        layer = layer.number(),
                        new_urls = new,
                        total = urls.len(),
                        "Layer finished"
                    );
                }
                Err(e) => {
                    warn!(seed = %seed, layer = layer.number(), error = %e, "Layer failed");
                    interactions.push(Interaction::LayerFailed {
                        layer: layer.number(),
                        error: e.to_string(),
                    });
                }
            }

            if criterion_met(layer, urls.len(), desired, probe.js_heavy) || layer >= ceiling {
                break;
            }
        }

        let mut urls = urls.into_vec();
        urls.truncate(self.config.max_urls);
        let duration_ms = started.elapsed().as_millis() as u64;

        info!(
            seed = %seed,
            layer = stopped_at.number(),
            urls = urls.len(),
            score = probe.score,
            duration_ms = duration_ms,
            "Discovery complete"
        );

        Ok(DiscoveryResult {
            success: !urls.is_empty(),
            urls,
            interactions,
            score: probe.score,
            layer: stopped_at.number(),
            duration_ms,
            probe,
        })
    }

    async fn attempt(
        &self,
        layer: Layer,
        filter: &UrlFilter,
        probe: &ProbeReport,
        desired: usize,
    ) -> LayerResult<LayerOutput> {
        match layer {
            Layer::Static => self.attempt_static(filter, probe).await,
            Layer::CheapDynamic => {
                AuxiliaryLayer::new(self.fetcher.as_ref(), &self.config)
                    .attempt(filter)
                    .await
            }
            Layer::Browser => {
                let renderer = self.renderer.as_deref().ok_or_else(|| {
                    DiscoveryError::Render(RenderError::Unavailable(
                        "no renderer configured".to_string(),
                    ))
                })?;
                BrowserLayer::new(renderer, self.extractor.as_ref(), &self.config)
                    .attempt(filter, desired)
                    .await
            }
        }
    }

    /// Parse the probe's markup, fetching the seed only if the probe could not.
    async fn attempt_static(
        &self,
        filter: &UrlFilter,
        probe: &ProbeReport,
    ) -> LayerResult<LayerOutput> {
        let seed = filter.seed().as_str();
        let markup = match &probe.markup {
            Some(markup) => markup.clone(),
            None => {
                let timeout = self.config.static_timeout;
                tokio::time::timeout(timeout, self.fetcher.fetch(seed, timeout))
                    .await
                    .map_err(|_| DiscoveryError::Budget { layer: 1 })??
                    .body
            }
        };

        let urls = links::extract_links(filter, &markup);
        Ok(LayerOutput {
            interactions: vec![Interaction::ParsedMarkup {
                url: seed.to_string(),
                found: urls.len(),
            }],
            urls,
        })
    }
}
