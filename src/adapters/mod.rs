//! Per-site adapters.
//!
//! Every source site is reached through one [`SiteAdapter`] implementation.
//! The [`AdapterRegistry`] maps a normalized hostname to its adapter and is
//! built once at startup, then passed to whatever needs it.

mod images;
mod navigation;
mod pacing;
mod registry;
mod selector;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{CatalogSummary, ChapterStub};

pub use images::{is_noise_image, order_images, ImageCandidate};
pub use navigation::{fetch_markup, NavigationPolicy};
pub use pacing::{PacingConfig, RequestPacer};
pub use registry::{normalize_domain, AdapterRegistry};
pub use selector::{SelectorAdapter, SiteSelectors};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("unsupported domain: {0}")]
    Unsupported(String),
    #[error("domain {0} is configured more than once")]
    DuplicateDomain(String),
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("markup mismatch at {url}: {what}")]
    MarkupMismatch { url: String, what: String },
    #[error("navigation to {url} failed after {attempts} attempt(s): {message}")]
    Navigation {
        url: String,
        attempts: u32,
        message: String,
    },
    #[error("browser error: {0}")]
    Browser(String),
}

impl AdapterError {
    pub fn mismatch(url: &str, what: impl Into<String>) -> Self {
        Self::MarkupMismatch {
            url: url.to_string(),
            what: what.into(),
        }
    }
}

/// Observer for detail-phase progress. Calls are fire-and-forget and never
/// influence the crawl.
pub trait ProgressHooks: Send + Sync {
    fn on_start(&self, _url: &str) {}
    fn on_chapters_found(&self, _url: &str, _count: usize) {}
    fn on_success(&self, _url: &str, _summary: &CatalogSummary) {}
    fn on_error(&self, _url: &str, _error: &AdapterError) {}
}

/// Hooks that only log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingHooks;

impl ProgressHooks for TracingHooks {
    fn on_start(&self, url: &str) {
        debug!("Fetching catalog detail: {}", url);
    }

    fn on_chapters_found(&self, url: &str, count: usize) {
        debug!("Found {} chapter(s) at {}", count, url);
    }

    fn on_success(&self, url: &str, summary: &CatalogSummary) {
        info!("Fetched '{}' ({} chapters) from {}", summary.title, summary.chapters.len(), url);
    }

    fn on_error(&self, url: &str, error: &AdapterError) {
        warn!("Detail fetch failed for {}: {}", url, error);
    }
}

/// Two-phase crawl capability for one source site.
#[async_trait]
pub trait SiteAdapter: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Detail phase: title metadata plus the chapter list in reading order.
    async fn fetch_catalog_detail(
        &self,
        url: &str,
        hooks: Option<&dyn ProgressHooks>,
    ) -> Result<CatalogSummary, AdapterError>;

    /// Image phase: ordered, deduplicated absolute image URLs of a chapter.
    async fn fetch_page_images(&self, chapter_url: &str) -> Result<Vec<String>, AdapterError>;

    /// Current chapter list only. Adapters with a cheaper listing endpoint
    /// override this.
    async fn fetch_chapter_list(&self, url: &str) -> Result<Vec<ChapterStub>, AdapterError> {
        Ok(self.fetch_catalog_detail(url, None).await?.chapters)
    }
}
