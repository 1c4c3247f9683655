//! Downstream boundary: where completed documents go.
//!
//! Chunking and serialization live outside this crate. A sink receives each
//! completed document tagged with its team and reports how many chunks it
//! produced so the ingest report can total them.

use async_trait::async_trait;

use crate::types::document::Document;

#[async_trait]
pub trait DocumentSink: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn accept(&self, document: &Document) -> Result<usize, Self::Error>;
}
