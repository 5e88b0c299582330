//! Wiring: builds every component once from settings and config.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{info, warn};

use crate::adapters::{AdapterRegistry, RequestPacer, SelectorAdapter, TracingHooks};
use crate::admin::Admin;
use crate::browser::{BrowserPool, ChromiumLauncher};
use crate::config::{Config, Settings};
use crate::engine::CrawlEngine;
use crate::queue::{JobQueue, WorkerPool};
use crate::repository::{CatalogRepository, JobRepository, TargetRepository};
use crate::scheduler::Scheduler;
use crate::sync::{CoverTranscoder, HttpAssetFetcher, LocalAssetStore, SyncPipeline};

pub struct Runtime {
    pub settings: Settings,
    pub config: Config,
    pub targets: TargetRepository,
    pub queue: Arc<JobQueue>,
    pub registry: Arc<AdapterRegistry>,
    pub pool: Arc<BrowserPool>,
    pub engine: Arc<CrawlEngine>,
    pub scheduler: Arc<Scheduler>,
}

impl Runtime {
    pub fn build(settings: Settings, config: Config) -> Result<Self> {
        std::fs::create_dir_all(&settings.data_dir).with_context(|| {
            format!("Failed to create data dir {}", settings.data_dir.display())
        })?;

        let targets = TargetRepository::new(&settings.database_path)?;
        let jobs = JobRepository::new(&settings.database_path)?;
        let catalog = CatalogRepository::new(&settings.catalog_path)?;
        let queue = Arc::new(JobQueue::new(jobs, config.worker.retry_policy()));

        let launcher = Arc::new(ChromiumLauncher::new(config.browser.clone()));
        let pool = Arc::new(BrowserPool::new(launcher, config.pool.clone()));
        let registry = Arc::new(build_registry(&config, pool.clone())?);

        let fetcher = HttpAssetFetcher::new(
            std::time::Duration::from_secs(config.sync.download_timeout_secs.max(1)),
            config.browser.proxy.as_deref(),
        )?;
        let sync = SyncPipeline::new(
            catalog,
            Arc::new(fetcher),
            Arc::new(LocalAssetStore::new(settings.asset_dir.clone())),
            Arc::new(CoverTranscoder::new(
                config.sync.cover_max_width,
                config.sync.cover_quality,
            )),
            config.sync.clone(),
        );

        let engine = Arc::new(CrawlEngine::new(
            targets.clone(),
            registry.clone(),
            Arc::new(sync),
            Arc::new(TracingHooks),
        ));
        let scheduler = Arc::new(Scheduler::new(
            targets.clone(),
            queue.clone(),
            config.schedule.clone(),
        ));

        Ok(Self {
            settings,
            config,
            targets,
            queue,
            registry,
            pool,
            engine,
            scheduler,
        })
    }

    pub fn admin(&self) -> Admin {
        Admin::new(
            self.targets.clone(),
            self.queue.clone(),
            self.registry.clone(),
            self.engine.clone(),
            self.scheduler.clone(),
        )
    }

    /// Requeue jobs and release targets left behind by a dead process.
    pub fn recover_stale(&self) -> Result<()> {
        self.queue.recover_stale()?;
        let targets = self.targets.recover_interrupted()?;
        if targets > 0 {
            warn!("Marked {} interrupted target(s) as errored", targets);
        }
        Ok(())
    }

    /// Run the scheduler and worker pool until `shutdown` flips.
    pub async fn run_daemon(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        self.recover_stale()?;

        let mut cron = self.scheduler.clone().start().await?;
        let workers = WorkerPool::start(
            self.queue.clone(),
            self.engine.clone(),
            &self.config.worker,
        );
        info!(
            "Daemon running: {} worker(s), browser pool max {}",
            workers.len(),
            self.pool.max_size()
        );

        while !*shutdown.borrow() {
            if shutdown.changed().await.is_err() {
                break;
            }
        }

        info!("Shutting down");
        if let Err(e) = cron.shutdown().await {
            warn!("Scheduler shutdown failed: {}", e);
        }
        workers.shutdown().await;
        self.close().await;
        Ok(())
    }

    pub async fn close(&self) {
        if let Err(e) = self.pool.close_all().await {
            warn!("Failed to close browsers: {:#}", e);
        }
    }
}

/// One selector adapter per configured site, sharing the pool and pacer.
pub fn build_registry(config: &Config, pool: Arc<BrowserPool>) -> Result<AdapterRegistry> {
    let pacer = RequestPacer::new(config.pacing.clone());
    let mut registry = AdapterRegistry::new();
    for (domain, rules) in &config.sites {
        let adapter = SelectorAdapter::new(
            domain.clone(),
            rules.clone(),
            pool.clone(),
            pacer.clone(),
            config.navigation.clone(),
        )
        .with_context(|| format!("Invalid selectors for {}", domain))?;
        registry.register(domain, Arc::new(adapter))?;
    }
    if registry.is_empty() {
        warn!("No sites configured; every target URL will be rejected");
    }
    Ok(registry)
}
