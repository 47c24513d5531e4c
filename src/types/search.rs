use serde::{Deserialize, Serialize};

use super::node::BookmarkRecord;

/// Result ordering for a search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    #[default]
    Relevance,
    Title,
    DateAdded,
    Url,
}

/// Caller-supplied search options. Serialized as part of the cache key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub limit: usize,
    pub min_score: f64,
    pub sort_by: SortBy,
    pub include_folders: bool,
    pub use_metadata: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            limit: 50,
            min_score: 0.0,
            sort_by: SortBy::Relevance,
            include_folders: false,
            use_metadata: true,
        }
    }
}

/// A record field that can contribute to a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchField {
    Title,
    Url,
    Domain,
    Keywords,
    Tags,
    MetaTitle,
    MetaDescription,
    MetaKeywords,
}

/// A matched span inside a field value. Offsets are byte offsets into the original value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Highlight {
    pub field: MatchField,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

/// One ranked search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub record: BookmarkRecord,
    pub score: f64,
    pub matched_fields: Vec<MatchField>,
    pub highlights: Vec<Highlight>,
}

/// Outcome of the last metadata crawl of a bookmark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlStatus {
    Success,
    Failed,
}

impl CrawlStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlStatus::Success => "success",
            CrawlStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Self {
        if value == "failed" {
            CrawlStatus::Failed
        } else {
            CrawlStatus::Success
        }
    }
}

/// Page metadata collected for a bookmark, keyed by bookmark id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlMetadata {
    pub bookmark_id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
    pub status: CrawlStatus,
    /// Milliseconds since the UNIX epoch.
    pub crawled_at: i64,
}

/// A past query kept in the `search_history` collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHistoryEntry {
    pub id: i64,
    pub query: String,
    pub result_count: usize,
    pub timestamp: i64,
}

/// A cached favicon for a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaviconEntry {
    pub domain: String,
    pub data: Vec<u8>,
    pub mime_type: String,
    pub updated_at: i64,
}
