//! Sync pipeline: merges crawled catalog data into the production store.
//!
//! Titles and chapters are written in separate transactions so a failed
//! chapter never undoes a committed title. Every image is migrated into the
//! asset store first; only the stored path is ever persisted.

mod assets;
mod download;
mod slug;
mod transcode;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::{CatalogSummary, ChapterStub};
use crate::repository::{CatalogRepository, TitleUpsert};

pub use assets::{AssetStore, LocalAssetStore};
pub use download::{sniff_image, AssetFetcher, FetchedAsset, HttpAssetFetcher, ImageKind};
pub use slug::{chapter_slug, title_slug};
pub use transcode::{CoverTranscoder, Transcoded, Transcoder};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Owner recorded on newly created titles.
    #[serde(default = "default_owner_id")]
    pub owner_id: i64,
    /// Content server the migrated page paths are registered under.
    #[serde(default = "default_server_id")]
    pub server_id: i64,
    #[serde(default = "default_cover_max_width")]
    pub cover_max_width: u32,
    #[serde(default = "default_cover_quality")]
    pub cover_quality: u8,
    #[serde(default = "default_title_status")]
    pub title_status: String,
    /// Timeout for each asset download, in seconds.
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_owner_id() -> i64 {
    1
}

fn default_server_id() -> i64 {
    1
}

fn default_cover_max_width() -> u32 {
    800
}

fn default_cover_quality() -> u8 {
    85
}

fn default_title_status() -> String {
    "ongoing".to_string()
}

fn default_download_timeout_secs() -> u64 {
    30
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            owner_id: default_owner_id(),
            server_id: default_server_id(),
            cover_max_width: default_cover_max_width(),
            cover_quality: default_cover_quality(),
            title_status: default_title_status(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

pub struct SyncPipeline {
    catalog: CatalogRepository,
    fetcher: Arc<dyn AssetFetcher>,
    store: Arc<dyn AssetStore>,
    transcoder: Arc<dyn Transcoder>,
    config: SyncConfig,
}

impl SyncPipeline {
    pub fn new(
        catalog: CatalogRepository,
        fetcher: Arc<dyn AssetFetcher>,
        store: Arc<dyn AssetStore>,
        transcoder: Arc<dyn Transcoder>,
        config: SyncConfig,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            store,
            transcoder,
            config,
        }
    }

    pub fn catalog(&self) -> &CatalogRepository {
        &self.catalog
    }

    /// Create or update the title for a crawled summary and return its id.
    /// A cover that cannot be migrated fails the sync.
    pub async fn sync_title(&self, summary: &CatalogSummary, source_url: &str) -> Result<i64> {
        let name = summary.title.trim();
        let slug = title_slug(name, source_url);
        if slug.is_empty() {
            bail!("title {:?} has no usable slug", summary.title);
        }

        let cover_path = match summary.cover_url.as_deref() {
            Some(cover_url) => Some(
                self.migrate_cover(cover_url, source_url)
                    .await
                    .with_context(|| format!("Cover migration failed for {}", cover_url))?,
            ),
            None => None,
        };

        let written = self
            .catalog
            .upsert_title(&TitleUpsert {
                name: name.to_string(),
                slug: slug.clone(),
                description: summary.description.clone(),
                cover_path,
                status: self.config.title_status.clone(),
                owner_id: self.config.owner_id,
                author: summary.author.clone(),
                categories: summary.categories.clone(),
            })
            .with_context(|| format!("Title sync failed for {}", slug))?;
        self.discard(&written.superseded).await;

        info!(title_id = written.id, slug = %slug, "Synced title");
        Ok(written.id)
    }

    /// Migrate a chapter's images and create or update the chapter. Single
    /// image failures are skipped; a chapter with no migrated image fails.
    pub async fn sync_chapter(
        &self,
        title_id: i64,
        stub: &ChapterStub,
        images: &[String],
        order: Option<i64>,
    ) -> Result<i64> {
        let slug = chapter_slug(&stub.title, &stub.source_url);
        let name = match stub.title.trim() {
            "" => slug.as_str(),
            name => name,
        };

        let mut paths = Vec::with_capacity(images.len());
        for (index, url) in images.iter().enumerate() {
            match self.migrate_page(title_id, &slug, url, &stub.source_url).await {
                Ok(path) => paths.push(path),
                Err(e) => warn!(
                    title_id,
                    chapter = %slug,
                    page = index,
                    "Skipping image {}: {:#}",
                    url,
                    e
                ),
            }
        }
        if paths.is_empty() {
            bail!(
                "no page images could be migrated for chapter {} ({} found)",
                slug,
                images.len()
            );
        }

        let written = self
            .catalog
            .upsert_chapter(
                title_id,
                &slug,
                name,
                order,
                self.config.server_id,
                &paths,
            )
            .with_context(|| format!("Chapter sync failed for {}", slug))?;
        self.discard(&written.superseded).await;

        debug!(
            title_id,
            chapter_id = written.id,
            "Synced chapter {} ({}/{} images)",
            slug,
            paths.len(),
            images.len()
        );
        Ok(written.id)
    }

    /// Remove assets the catalog no longer references. Runs after the
    /// write commits; a failed removal only leaves an orphan behind.
    async fn discard(&self, paths: &[String]) {
        for path in paths {
            if let Err(e) = self.store.delete(path).await {
                warn!("Failed to remove superseded asset {}: {:#}", path, e);
            }
        }
    }

    async fn migrate_cover(&self, url: &str, referer: &str) -> Result<String> {
        let fetched = self.fetcher.fetch(url, Some(referer)).await?;
        sniff_image(url, &fetched)?;

        let transcoder = self.transcoder.clone();
        let bytes = fetched.bytes;
        let transcoded = tokio::task::spawn_blocking(move || transcoder.transform(&bytes))
            .await
            .context("Transcoder task failed")??;

        let path = self
            .store
            .generate_unique_filename("covers", transcoded.extension);
        self.store
            .upload(&transcoded.bytes, &path, transcoded.content_type)
            .await
    }

    async fn migrate_page(
        &self,
        title_id: i64,
        chapter_slug: &str,
        url: &str,
        referer: &str,
    ) -> Result<String> {
        let fetched = self.fetcher.fetch(url, Some(referer)).await?;
        let kind = sniff_image(url, &fetched)?;
        let path = self.store.generate_unique_filename(
            &format!("titles/{}/{}", title_id, chapter_slug),
            kind.extension,
        );
        self.store.upload(&fetched.bytes, &path, kind.content_type).await
    }
}
