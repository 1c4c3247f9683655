//! Browser rendering capability, used only by the browser discovery layer.
//!
//! A [`Renderer`] opens sessions; a [`RenderSession`] exposes the handful of
//! primitives the layer needs. Any error from either is treated by the
//! orchestrator as "this layer produced zero URLs".

use async_trait::async_trait;

use crate::error::RenderResult;

#[async_trait]
pub trait Renderer: Send + Sync {
    async fn open(&self) -> RenderResult<Box<dyn RenderSession>>;

    fn name(&self) -> &str {
        "unknown"
    }
}

#[async_trait]
pub trait RenderSession: Send {
    /// Load `url` and wait for the initial render.
    async fn load(&mut self, url: &str) -> RenderResult<()>;

    /// Find a clickable control whose text matches one of `labels`
    /// (case-insensitive) and activate it. Returns the matched text, or
    /// `None` when no control matched.
    async fn activate(&mut self, labels: &[String]) -> RenderResult<Option<String>>;

    /// Scroll to the bottom of the page. Returns whether the document grew.
    async fn scroll_to_bottom(&mut self) -> RenderResult<bool>;

    /// Current rendered HTML.
    async fn content(&mut self) -> RenderResult<String>;

    /// URLs of all network requests observed so far in this session.
    async fn network_requests(&mut self) -> RenderResult<Vec<String>>;
}
