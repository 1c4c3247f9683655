//! Extracted documents and ingest statistics.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A document produced by the extraction capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub url: String,
    pub team_id: String,
    pub title: String,
    /// Body, usually markdown.
    pub content: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    pub fn new(
        url: impl Into<String>,
        team_id: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let content = content.into();
        let metadata = DocumentMetadata::for_content(&content);
        Self {
            url: url.into(),
            team_id: team_id.into(),
            title: title.into(),
            content,
            metadata,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.metadata.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.extra.insert(key.into(), value.into());
        self
    }

    pub fn word_count(&self) -> usize {
        self.metadata.word_count
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub word_count: usize,
    pub content_type: Option<String>,
    pub extracted_at: DateTime<Utc>,
    /// Source-specific metadata (e.g., HTTP status)
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl DocumentMetadata {
    pub fn for_content(content: &str) -> Self {
        Self {
            word_count: count_words(content),
            content_type: None,
            extracted_at: Utc::now(),
            extra: HashMap::new(),
        }
    }
}

pub fn count_words(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Completion statistics for one crawl or import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub total_pages: usize,
    pub successful_extractions: usize,
    pub failed_extractions: usize,
    pub total_chunks: usize,
    pub processing_time_ms: u64,
}

/// What a crawl or import reports to its caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub success: bool,
    pub team_id: String,
    pub stats: IngestStats,
    /// Single top-level error when `success` is false.
    pub error: Option<String>,
    #[serde(skip)]
    pub documents: Vec<Document>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_counts_words() {
        let doc = Document::new("https://example.com/a", "team", "A", "one two\nthree   four");
        assert_eq!(doc.word_count(), 4);
    }

    #[test]
    fn test_stats_serialize_with_snake_case_names() {
        let json = serde_json::to_value(IngestStats {
            total_pages: 3,
            successful_extractions: 2,
            failed_extractions: 1,
            total_chunks: 7,
            processing_time_ms: 1200,
        })
        .unwrap();
        assert_eq!(json["total_pages"], 3);
        assert_eq!(json["successful_extractions"], 2);
        assert_eq!(json["failed_extractions"], 1);
        assert_eq!(json["total_chunks"], 7);
        assert_eq!(json["processing_time_ms"], 1200);
    }
}
