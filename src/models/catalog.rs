//! Transient catalog data produced by an adapter's detail phase.

use serde::{Deserialize, Serialize};

/// One chapter as listed on the source title page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChapterStub {
    pub title: String,
    pub source_url: String,
}

impl ChapterStub {
    pub fn new(title: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            source_url: source_url.into(),
        }
    }
}

/// Title metadata and chapter list, consumed immediately by the sync
/// pipeline and then discarded.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub title: String,
    pub cover_url: Option<String>,
    /// Description markup as found on the source page.
    pub description: Option<String>,
    pub author: Option<String>,
    pub categories: Vec<String>,
    /// Chapters in reading order (oldest first).
    pub chapters: Vec<ChapterStub>,
}
