//! Rendering through a Browserless instance's `/function` endpoint.
//!
//! Browserless function calls are stateless: every call starts a fresh page.
//! A [`BrowserlessSession`] therefore records the actions taken so far and,
//! whenever it needs to observe the page, replays all of them in one script
//! run. Each run returns the final HTML, the result of every step, and every
//! request URL the page made.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use crate::config::BrowserConfig;
use crate::error::{RenderError, RenderResult};
use crate::traits::renderer::{RenderSession, Renderer};

const REPLAY_SCRIPT: &str = r#"
export default async function ({ page, context }) {
  const requests = [];
  page.on('request', (req) => requests.push(req.url()));
  await page.goto(context.url, { waitUntil: 'networkidle2', timeout: context.timeoutMs });

  const pause = () => new Promise((resolve) => setTimeout(resolve, context.settleMs));
  const steps = [];
  for (const action of context.actions) {
    if (action.kind === 'click') {
      const matched = await page.evaluate((labels) => {
        const wanted = labels.map((l) => l.toLowerCase());
        const controls = document.querySelectorAll('button, a, [role="button"], input[type="button"]');
        for (const el of controls) {
          const text = (el.innerText || el.value || '').trim();
          if (text && wanted.some((w) => text.toLowerCase().includes(w))) {
            el.click();
            return text;
          }
        }
        return null;
      }, action.labels);
      if (matched) await pause();
      steps.push({ matched, grew: false });
    } else {
      const before = await page.evaluate(() => document.body.scrollHeight);
      await page.evaluate(() => window.scrollTo(0, document.body.scrollHeight));
      await pause();
      const after = await page.evaluate(() => document.body.scrollHeight);
      steps.push({ matched: null, grew: after > before });
    }
  }

  const html = await page.content();
  return { data: { html, steps, requests }, type: 'application/json' };
}
"#;

/// One recorded user action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Action {
    Click { labels: Vec<String> },
    Scroll,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StepResult {
    matched: Option<String>,
    #[serde(default)]
    grew: bool,
}

/// Page state after a replay.
#[derive(Debug, Clone, Default, Deserialize)]
struct Snapshot {
    html: String,
    #[serde(default)]
    steps: Vec<StepResult>,
    #[serde(default)]
    requests: Vec<String>,
}

struct BrowserlessApi {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    settle: Duration,
    navigation_timeout: Duration,
}

impl BrowserlessApi {
    fn endpoint(&self) -> String {
        let mut endpoint = format!("{}/function", self.base_url);
        if let Some(token) = &self.token {
            endpoint.push_str(&format!("?token={token}"));
        }
        endpoint
    }

    fn payload(&self, url: &str, actions: &[Action]) -> serde_json::Value {
        json!({
            "code": REPLAY_SCRIPT,
            "context": {
                "url": url,
                "actions": actions,
                "settleMs": self.settle.as_millis() as u64,
                "timeoutMs": self.navigation_timeout.as_millis() as u64,
            }
        })
    }

    async fn replay(&self, url: &str, actions: &[Action]) -> RenderResult<Snapshot> {
        debug!(url = %url, actions = actions.len(), "Browserless replay");

        let resp = self
            .client
            .post(self.endpoint())
            .json(&self.payload(url, actions))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(RenderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let body = resp.text().await?;
        parse_snapshot(&body)
    }
}

/// Accepts both the bare object and the `{ data, type }` envelope.
fn parse_snapshot(body: &str) -> RenderResult<Snapshot> {
    let value: serde_json::Value =
        serde_json::from_str(body).map_err(|e| RenderError::Script(e.to_string()))?;
    let data = match value.get("data") {
        Some(data) if data.is_object() => data.clone(),
        _ => value,
    };
    serde_json::from_value(data).map_err(|e| RenderError::Script(e.to_string()))
}

pub struct BrowserlessRenderer {
    api: Arc<BrowserlessApi>,
}

impl BrowserlessRenderer {
    pub fn new(config: &BrowserConfig) -> RenderResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| RenderError::Unavailable(e.to_string()))?;

        Ok(Self {
            api: Arc::new(BrowserlessApi {
                client,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                token: config.token.clone(),
                settle: Duration::from_millis(1500),
                navigation_timeout: Duration::from_secs(30),
            }),
        })
    }

    /// How long the page is given to settle after each action.
    pub fn with_settle(mut self, settle: Duration) -> Self {
        if let Some(api) = Arc::get_mut(&mut self.api) {
            api.settle = settle;
        }
        self
    }
}

#[async_trait]
impl Renderer for BrowserlessRenderer {
    async fn open(&self) -> RenderResult<Box<dyn RenderSession>> {
        Ok(Box::new(BrowserlessSession {
            api: Arc::clone(&self.api),
            url: None,
            actions: Vec::new(),
            snapshot: None,
        }))
    }

    fn name(&self) -> &str {
        "browserless"
    }
}

pub struct BrowserlessSession {
    api: Arc<BrowserlessApi>,
    url: Option<String>,
    actions: Vec<Action>,
    snapshot: Option<Snapshot>,
}

impl BrowserlessSession {
    fn url(&self) -> RenderResult<&str> {
        self.url
            .as_deref()
            .ok_or_else(|| RenderError::Script("no page loaded".to_string()))
    }

    /// Replay the recorded actions plus `next`. Keeps `next` and the new
    /// snapshot only when `accept` says the step did something.
    async fn try_step(
        &mut self,
        next: Action,
        accept: impl Fn(&StepResult) -> bool,
    ) -> RenderResult<Option<StepResult>> {
        let url = self.url()?.to_string();
        let mut actions = self.actions.clone();
        actions.push(next);

        let snapshot = self.api.replay(&url, &actions).await?;
        let Some(step) = snapshot.steps.last().cloned() else {
            return Err(RenderError::Script("replay returned no step results".to_string()));
        };
        if !accept(&step) {
            return Ok(None);
        }

        self.actions = actions;
        self.snapshot = Some(snapshot);
        Ok(Some(step))
    }
}

#[async_trait]
impl RenderSession for BrowserlessSession {
    async fn load(&mut self, url: &str) -> RenderResult<()> {
        let snapshot = self.api.replay(url, &[]).await?;
        self.url = Some(url.to_string());
        self.actions.clear();
        self.snapshot = Some(snapshot);
        Ok(())
    }

    async fn activate(&mut self, labels: &[String]) -> RenderResult<Option<String>> {
        let action = Action::Click {
            labels: labels.to_vec(),
        };
        let step = self.try_step(action, |s| s.matched.is_some()).await?;
        Ok(step.and_then(|s| s.matched))
    }

    async fn scroll_to_bottom(&mut self) -> RenderResult<bool> {
        let step = self.try_step(Action::Scroll, |s| s.grew).await?;
        Ok(step.is_some())
    }

    async fn content(&mut self) -> RenderResult<String> {
        self.url()?;
        Ok(self
            .snapshot
            .as_ref()
            .map(|s| s.html.clone())
            .unwrap_or_default())
    }

    async fn network_requests(&mut self) -> RenderResult<Vec<String>> {
        self.url()?;
        Ok(self
            .snapshot
            .as_ref()
            .map(|s| s.requests.clone())
            .unwrap_or_default())
    }
}
