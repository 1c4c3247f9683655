//! The external extraction capability: URL (or file) in, document out.
//!
//! Converting HTML or PDF into a clean document is out of scope for this
//! crate; [`Extractor`] is the seam. The worker pool calls it per job and the
//! browser layer calls it to verify guessed URLs.

use async_trait::async_trait;

use crate::error::ExtractionResult;
use crate::types::document::Document;

#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract one URL for one team.
    ///
    /// Any error is treated as transient by the worker pool.
    async fn extract(&self, url: &str, team_id: &str) -> ExtractionResult<Document>;

    fn name(&self) -> &str {
        "unknown"
    }
}
