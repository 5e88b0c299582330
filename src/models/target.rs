//! Crawl target model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a crawl target.
///
/// `Crawling` is the only in-flight state. Every run enters it through the
/// start edge and leaves it through exactly one of `Done` or `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Pending,
    Crawling,
    Done,
    Error,
}

impl TargetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Crawling => "crawling",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "crawling" => Some(Self::Crawling),
            "done" => Some(Self::Done),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Whether the engine may move a target from `self` to `next`.
    pub fn can_transition_to(&self, next: TargetStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending | Self::Done | Self::Error, Self::Crawling)
                | (Self::Crawling, Self::Done)
                | (Self::Crawling, Self::Error)
        )
    }

    /// Statuses from which a run may start.
    pub fn startable() -> [TargetStatus; 3] {
        [Self::Pending, Self::Done, Self::Error]
    }
}

impl std::fmt::Display for TargetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A third-party catalog item registered for crawling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlTarget {
    pub id: i64,
    /// Normalized hostname the adapter registry resolved for this target.
    pub source_domain: String,
    /// Unique source URL of the title page.
    pub source_url: String,
    /// Discovered on the first detail fetch.
    pub title: Option<String>,
    pub slug: Option<String>,
    pub cover_url: Option<String>,
    /// Production-side title id, set once the title has been synced.
    pub production_id: Option<i64>,
    pub status: TargetStatus,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CrawlTarget {
    /// Whether the target is linked to a production record.
    pub fn is_linked(&self) -> bool {
        self.production_id.is_some()
    }

    /// Display label: discovered title, falling back to the URL.
    pub fn label(&self) -> &str {
        self.title.as_deref().unwrap_or(&self.source_url)
    }
}
