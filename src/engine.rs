//! Per-target crawl orchestration.
//!
//! A run enters `Crawling` with a compare-and-swap and always leaves it for
//! `Done` or `Error`, whatever happens inside.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use futures::FutureExt;
use tracing::{error, info, warn};

use crate::adapters::{AdapterRegistry, ProgressHooks, SiteAdapter};
use crate::models::{CrawlJob, CrawlTarget, JobKind, TargetStatus};
use crate::queue::JobHandler;
use crate::repository::{TargetRepository, TargetUpdate};
use crate::sync::{chapter_slug, title_slug, SyncPipeline};

/// Summary of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlOutcome {
    pub production_id: i64,
    pub chapters_synced: usize,
    /// Chapters already present in the catalog and left alone.
    pub chapters_skipped: usize,
}

pub struct CrawlEngine {
    targets: TargetRepository,
    registry: Arc<AdapterRegistry>,
    sync: Arc<SyncPipeline>,
    hooks: Arc<dyn ProgressHooks>,
}

impl CrawlEngine {
    pub fn new(
        targets: TargetRepository,
        registry: Arc<AdapterRegistry>,
        sync: Arc<SyncPipeline>,
        hooks: Arc<dyn ProgressHooks>,
    ) -> Self {
        Self {
            targets,
            registry,
            sync,
            hooks,
        }
    }

    /// Crawl one target. Fails without touching the target when it is
    /// already crawling.
    pub async fn run(&self, target_id: i64, kind: JobKind) -> Result<CrawlOutcome> {
        let target = self
            .targets
            .get(target_id)?
            .ok_or_else(|| anyhow!("target {} not found", target_id))?;

        if !self.targets.try_start(target_id)? {
            bail!("target {} is already crawling", target_id);
        }
        info!(target_id, kind = %kind, url = %target.source_url, "Crawl started");

        let result = AssertUnwindSafe(self.execute(&target, kind))
            .catch_unwind()
            .await;

        match result {
            Ok(Ok(outcome)) => {
                self.targets.finish(target_id, TargetStatus::Done)?;
                info!(
                    target_id,
                    production_id = outcome.production_id,
                    "Crawl finished: {} chapter(s) synced, {} skipped",
                    outcome.chapters_synced,
                    outcome.chapters_skipped
                );
                Ok(outcome)
            }
            Ok(Err(e)) => {
                self.mark_error(target_id);
                warn!(target_id, "Crawl failed: {:#}", e);
                Err(e)
            }
            Err(panic) => {
                self.mark_error(target_id);
                std::panic::resume_unwind(panic)
            }
        }
    }

    fn mark_error(&self, target_id: i64) {
        if let Err(e) = self.targets.finish(target_id, TargetStatus::Error) {
            error!(target_id, "Failed to mark target as errored: {}", e);
        }
    }

    async fn execute(&self, target: &CrawlTarget, kind: JobKind) -> Result<CrawlOutcome> {
        let adapter = self.registry.resolve(&target.source_url)?;
        match (kind, target.production_id) {
            (JobKind::Update, Some(title_id)) => {
                self.run_update(target, adapter.as_ref(), title_id).await
            }
            (JobKind::Update, None) => {
                info!(target_id = target.id, "Target not linked yet; running a full crawl");
                self.run_full(target, adapter.as_ref()).await
            }
            (JobKind::Full, _) => self.run_full(target, adapter.as_ref()).await,
        }
    }

    /// Detail phase, then the images of every chapter not yet in the
    /// catalog, in order, then sync. Chapters already synced keep their
    /// stored pages.
    async fn run_full(&self, target: &CrawlTarget, adapter: &dyn SiteAdapter) -> Result<CrawlOutcome> {
        let url = &target.source_url;
        let summary = adapter
            .fetch_catalog_detail(url, Some(self.hooks.as_ref()))
            .await?;
        let slug = title_slug(&summary.title, url);

        self.targets.update(
            target.id,
            &TargetUpdate {
                title: Some(summary.title.clone()),
                slug: Some(slug.clone()),
                cover_url: summary.cover_url.clone(),
                ..Default::default()
            },
        )?;

        let catalog = self.sync.catalog();
        let existing = match target.production_id {
            Some(id) => Some(id),
            None => catalog.find_title_by_slug(&slug)?.map(|t| t.id),
        };
        let mut known = match existing {
            Some(id) => catalog.chapter_slugs(id)?,
            None => HashSet::new(),
        };
        let fresh: Vec<_> = summary
            .chapters
            .iter()
            .filter(|stub| known.insert(chapter_slug(&stub.title, &stub.source_url)))
            .collect();

        let mut pages = Vec::with_capacity(fresh.len());
        for stub in &fresh {
            let images = adapter
                .fetch_page_images(&stub.source_url)
                .await
                .with_context(|| format!("Image phase failed for {}", stub.source_url))?;
            pages.push(images);
        }

        let title_id = self.sync.sync_title(&summary, url).await?;
        self.targets.set_production_id(target.id, title_id)?;

        for (stub, images) in fresh.iter().zip(&pages) {
            self.sync.sync_chapter(title_id, stub, images, None).await?;
        }

        Ok(CrawlOutcome {
            production_id: title_id,
            chapters_synced: fresh.len(),
            chapters_skipped: summary.chapters.len() - fresh.len(),
        })
    }

    /// Chapter-list diff against the catalog; only new chapters are fetched.
    async fn run_update(
        &self,
        target: &CrawlTarget,
        adapter: &dyn SiteAdapter,
        title_id: i64,
    ) -> Result<CrawlOutcome> {
        let chapters = adapter.fetch_chapter_list(&target.source_url).await?;
        let mut known: HashSet<String> = self.sync.catalog().chapter_slugs(title_id)?;

        let fresh: Vec<_> = chapters
            .iter()
            .filter(|stub| known.insert(chapter_slug(&stub.title, &stub.source_url)))
            .collect();
        info!(
            target_id = target.id,
            "{} new chapter(s) of {} listed",
            fresh.len(),
            chapters.len()
        );

        for stub in &fresh {
            let images = adapter
                .fetch_page_images(&stub.source_url)
                .await
                .with_context(|| format!("Image phase failed for {}", stub.source_url))?;
            self.sync.sync_chapter(title_id, stub, &images, None).await?;
        }

        Ok(CrawlOutcome {
            production_id: title_id,
            chapters_synced: fresh.len(),
            chapters_skipped: chapters.len() - fresh.len(),
        })
    }
}

#[async_trait]
impl JobHandler for CrawlEngine {
    async fn handle(&self, job: &CrawlJob) -> Result<()> {
        self.run(job.target_id, job.kind).await.map(|_| ())
    }
}
