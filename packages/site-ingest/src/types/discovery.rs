//! Discovery data types: layers, interaction log, probe report, result.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Escalation layers, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Parse the already-fetched markup.
    Static,
    /// Re-fetch auxiliary endpoints (sitemaps, feeds, pagination).
    CheapDynamic,
    /// Drive a full rendering session.
    Browser,
}

impl Layer {
    pub const ORDERED: [Layer; 3] = [Layer::Static, Layer::CheapDynamic, Layer::Browser];

    pub fn number(&self) -> u8 {
        match self {
            Layer::Static => 1,
            Layer::CheapDynamic => 2,
            Layer::Browser => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Layer::Static => "static",
            Layer::CheapDynamic => "cheap_dynamic",
            Layer::Browser => "browser",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.name())
    }
}

/// One diagnostic entry in the interaction log.
///
/// The log explains how URLs were obtained; it is never used to decide
/// anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Interaction {
    /// Parsed markup with the static patterns.
    ParsedMarkup { url: String, found: usize },
    /// Fetched an auxiliary endpoint.
    FetchedAuxiliary { url: String, found: usize },
    /// Loaded the page in a rendering session.
    Rendered { url: String },
    /// Activated a load-more style control.
    Clicked { label: String },
    /// Scrolled to the bottom to trigger infinite scroll.
    Scrolled,
    /// Saw a network request during the session.
    ObservedRequest { url: String },
    /// A guessed URL confirmed by fetching real content.
    PatternVerified { url: String, words: usize },
    /// A layer failed internally and counted as zero URLs.
    LayerFailed { layer: u8, error: String },
    /// A layer stopped at its time budget or iteration cap.
    BudgetExhausted { layer: u8 },
}

impl Interaction {
    /// Whether this entry represents a simulated user action.
    pub fn is_user_action(&self) -> bool {
        matches!(self, Interaction::Clicked { .. } | Interaction::Scrolled)
    }
}

/// How the probe fetch went.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Page fetched and scored.
    Fetched { status: u16, latency_ms: u64 },
    /// The seed could not be fetched at all. Distinct from "not JS-heavy".
    NetworkFailure { error: String },
}

/// The prober's verdict on a seed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    /// JS-heaviness estimate in `[0, 1]`.
    pub score: f32,
    pub js_heavy: bool,
    pub outcome: ProbeOutcome,
    /// Signals that contributed to the score, for logs.
    #[serde(default)]
    pub signals: Vec<String>,
    /// Final URL after redirects, when fetched.
    #[serde(skip)]
    pub final_url: Option<String>,
    /// Raw markup, reused by the static layer instead of fetching twice.
    #[serde(skip)]
    pub markup: Option<String>,
}

impl ProbeReport {
    pub fn network_failure(error: impl Into<String>) -> Self {
        Self {
            score: 0.0,
            js_heavy: false,
            outcome: ProbeOutcome::NetworkFailure {
                error: error.into(),
            },
            signals: Vec::new(),
            final_url: None,
            markup: None,
        }
    }

    pub fn is_network_failure(&self) -> bool {
        matches!(self.outcome, ProbeOutcome::NetworkFailure { .. })
    }

    /// The most expensive layer this site may escalate to.
    ///
    /// Sites that are merely sparse stop after the cheap dynamic layer;
    /// browser simulation is reserved for interaction-heavy sites.
    pub fn max_layer(&self) -> Layer {
        if self.js_heavy {
            Layer::Browser
        } else {
            Layer::CheapDynamic
        }
    }
}

/// Output of one discovery call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// Deduplicated, normalized candidate URLs in discovery order.
    pub urls: Vec<String>,
    pub interactions: Vec<Interaction>,
    pub score: f32,
    /// The layer whose success criterion stopped the chain (1..=3).
    pub layer: u8,
    pub success: bool,
    pub duration_ms: u64,
    pub probe: ProbeReport,
}

impl DiscoveryResult {
    pub fn user_actions(&self) -> usize {
        self.interactions.iter().filter(|i| i.is_user_action()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layers_are_ordered_by_cost() {
        assert!(Layer::Static < Layer::CheapDynamic);
        assert!(Layer::CheapDynamic < Layer::Browser);
        let numbers: Vec<u8> = Layer::ORDERED.iter().map(Layer::number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_network_failure_caps_at_cheap_dynamic() {
        let report = ProbeReport::network_failure("connection refused");
        assert!(report.is_network_failure());
        assert!(!report.js_heavy);
        assert_eq!(report.max_layer(), Layer::CheapDynamic);
    }

    #[test]
    fn test_interaction_serializes_with_kind_tag() {
        let json = serde_json::to_value(Interaction::Clicked {
            label: "Load more".to_string(),
        })
        .unwrap();
        assert_eq!(json["kind"], "clicked");
        assert_eq!(json["label"], "Load more");
    }
}
