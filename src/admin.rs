//! Administrative operations on targets and jobs.

use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use tracing::info;

use crate::adapters::{normalize_domain, AdapterRegistry};
use crate::engine::{CrawlEngine, CrawlOutcome};
use crate::models::{CrawlJob, CrawlTarget, JobKind, JobStatus, TargetStatus};
use crate::queue::{settle, JobOutcome, JobQueue};
use crate::repository::{NewTarget, TargetRepository, TargetUpdate};
use crate::scheduler::{Scheduler, Sweep, SweepReport};

/// Result of a manual run request.
#[derive(Debug)]
pub enum RunRequest {
    Enqueued(CrawlJob),
    /// A job for the target is already queued or running.
    AlreadyQueued,
    /// The job was claimed and executed inline.
    Completed { job_id: i64, outcome: CrawlOutcome },
}

pub struct Admin {
    targets: TargetRepository,
    queue: Arc<JobQueue>,
    registry: Arc<AdapterRegistry>,
    engine: Arc<CrawlEngine>,
    scheduler: Arc<Scheduler>,
}

impl Admin {
    pub fn new(
        targets: TargetRepository,
        queue: Arc<JobQueue>,
        registry: Arc<AdapterRegistry>,
        engine: Arc<CrawlEngine>,
        scheduler: Arc<Scheduler>,
    ) -> Self {
        Self {
            targets,
            queue,
            registry,
            engine,
            scheduler,
        }
    }

    pub fn supported_domains(&self) -> Vec<String> {
        self.registry.supported_domains()
    }

    /// Register a target. The URL must belong to a supported domain.
    pub fn add_target(&self, url: &str, title: Option<&str>) -> Result<CrawlTarget> {
        let url = url.trim();
        self.registry.resolve(url)?;
        if let Some(existing) = self.targets.get_by_url(url)? {
            bail!("{} is already registered as target {}", url, existing.id);
        }
        let target = self.targets.insert(&NewTarget {
            source_domain: normalize_domain(url)?,
            source_url: url.to_string(),
            title: title.map(str::to_string),
        })?;
        info!(target_id = target.id, "Registered target {}", target.source_url);
        Ok(target)
    }

    pub fn list_targets(&self, status: Option<TargetStatus>, limit: u32) -> Result<Vec<CrawlTarget>> {
        Ok(self.targets.list(status, limit)?)
    }

    pub fn get_target(&self, id: i64) -> Result<CrawlTarget> {
        self.targets
            .get(id)?
            .ok_or_else(|| anyhow!("target {} not found", id))
    }

    /// Change a target's URL or title. A new URL is validated like on add.
    pub fn update_target(
        &self,
        id: i64,
        url: Option<&str>,
        title: Option<&str>,
    ) -> Result<CrawlTarget> {
        let mut update = TargetUpdate {
            title: title.map(str::to_string),
            ..Default::default()
        };
        if let Some(url) = url.map(str::trim) {
            self.registry.resolve(url)?;
            update.source_domain = Some(normalize_domain(url)?);
            update.source_url = Some(url.to_string());
        }
        Ok(self.targets.update(id, &update)?)
    }

    /// Delete a target and its job history. Refused while it is crawling.
    pub fn remove_target(&self, id: i64) -> Result<()> {
        let target = self.get_target(id)?;
        if target.status == TargetStatus::Crawling {
            bail!("target {} is crawling; try again once it finishes", id);
        }
        self.targets.delete(id)?;
        info!(target_id = id, "Removed target");
        Ok(())
    }

    /// Queue a crawl, or run it right away with `now`.
    pub async fn run(&self, id: i64, kind: JobKind, now: bool) -> Result<RunRequest> {
        self.get_target(id)?;
        let Some(job) = self.queue.enqueue(id, kind)? else {
            return Ok(RunRequest::AlreadyQueued);
        };
        if !now {
            return Ok(RunRequest::Enqueued(job));
        }
        // A running worker may claim it first; it then runs there instead.
        let Some(job) = self.queue.claim(job.id)? else {
            return Ok(RunRequest::Enqueued(job));
        };

        info!(job_id = job.id, target_id = id, kind = %kind, "Running job inline");
        let (outcome, result) = settle(&self.queue, &job, self.engine.run(id, kind)).await?;
        match (result, outcome) {
            (Ok(crawl), _) => Ok(RunRequest::Completed {
                job_id: job.id,
                outcome: crawl,
            }),
            (Err(message), JobOutcome::Retrying { next_run_at }) => bail!(
                "job {} failed, retry queued for {}: {}",
                job.id,
                next_run_at.format("%Y-%m-%d %H:%M:%S"),
                message
            ),
            (Err(message), _) => bail!("job {} failed: {}", job.id, message),
        }
    }

    /// Queue every target that is not crawling: a full crawl for unlinked
    /// targets, an update for linked ones.
    pub fn run_all(&self) -> Result<Vec<CrawlJob>> {
        let jobs: Vec<(i64, JobKind)> = self
            .targets
            .list_startable()?
            .iter()
            .map(|t| {
                let kind = if t.is_linked() {
                    JobKind::Update
                } else {
                    JobKind::Full
                };
                (t.id, kind)
            })
            .collect();
        Ok(self.queue.enqueue_batch(&jobs)?)
    }

    pub fn list_jobs(
        &self,
        target_id: Option<i64>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<CrawlJob>> {
        Ok(self.queue.list(target_id, status, limit)?)
    }

    pub fn sweep(&self, sweep: Sweep) -> Result<SweepReport> {
        self.scheduler.run_sweep(sweep)
    }

    pub fn status_counts(&self) -> Result<Vec<(TargetStatus, u64)>> {
        Ok(self.targets.count_by_status()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{AdapterError, ProgressHooks, SiteAdapter, TracingHooks};
    use crate::models::CatalogSummary;
    use crate::queue::RetryPolicy;
    use crate::repository::JobRepository;
    use crate::scheduler::ScheduleConfig;
    use crate::sync::tests::pipeline;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::tempdir;

    struct NoopAdapter;

    #[async_trait]
    impl SiteAdapter for NoopAdapter {
        fn name(&self) -> &str {
            "noop"
        }

        async fn fetch_catalog_detail(
            &self,
            url: &str,
            _hooks: Option<&dyn ProgressHooks>,
        ) -> Result<CatalogSummary, AdapterError> {
            Err(AdapterError::mismatch(url, "title"))
        }

        async fn fetch_page_images(&self, chapter_url: &str) -> Result<Vec<String>, AdapterError> {
            Err(AdapterError::mismatch(chapter_url, "images"))
        }
    }

    fn admin(dir: &Path) -> Admin {
        let db = dir.join("crawl.db");
        let targets = TargetRepository::new(&db).unwrap();
        let queue = Arc::new(JobQueue::new(
            JobRepository::new(&db).unwrap(),
            RetryPolicy::default(),
        ));
        let mut registry = AdapterRegistry::new();
        registry.register("example.com", Arc::new(NoopAdapter)).unwrap();
        let registry = Arc::new(registry);
        let engine = Arc::new(CrawlEngine::new(
            targets.clone(),
            registry.clone(),
            Arc::new(pipeline(dir)),
            Arc::new(TracingHooks),
        ));
        let scheduler = Arc::new(Scheduler::new(
            targets.clone(),
            queue.clone(),
            ScheduleConfig::default(),
        ));
        Admin::new(targets, queue, registry, engine, scheduler)
    }

    #[test]
    fn add_target_validates_domain() {
        let dir = tempdir().unwrap();
        let admin = admin(dir.path());

        let target = admin
            .add_target(" https://www.example.com/title-x ", Some("Title X"))
            .unwrap();
        assert_eq!(target.source_domain, "example.com");
        assert_eq!(target.source_url, "https://www.example.com/title-x");
        assert_eq!(target.status, TargetStatus::Pending);

        let err = admin.add_target("https://other.org/t", None).unwrap_err();
        assert!(err.to_string().contains("unsupported domain"));
        let err = admin
            .add_target("https://www.example.com/title-x", None)
            .unwrap_err();
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn update_and_remove_target() {
        let dir = tempdir().unwrap();
        let admin = admin(dir.path());
        let target = admin.add_target("https://example.com/a", None).unwrap();

        let updated = admin
            .update_target(target.id, Some("https://example.com/b"), Some("B"))
            .unwrap();
        assert_eq!(updated.source_url, "https://example.com/b");
        assert_eq!(updated.title.as_deref(), Some("B"));
        assert!(admin
            .update_target(target.id, Some("https://other.org/b"), None)
            .is_err());

        admin.remove_target(target.id).unwrap();
        assert!(admin.get_target(target.id).is_err());
    }

    #[tokio::test]
    async fn run_enqueues_once() {
        let dir = tempdir().unwrap();
        let admin = admin(dir.path());
        let target = admin.add_target("https://example.com/a", None).unwrap();

        let first = admin.run(target.id, JobKind::Full, false).await.unwrap();
        assert!(matches!(first, RunRequest::Enqueued(_)));
        let second = admin.run(target.id, JobKind::Full, false).await.unwrap();
        assert!(matches!(second, RunRequest::AlreadyQueued));
        assert_eq!(admin.list_jobs(Some(target.id), None, 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_now_executes_inline() {
        let dir = tempdir().unwrap();
        let admin = admin(dir.path());
        let target = admin.add_target("https://example.com/a", None).unwrap();

        let err = admin.run(target.id, JobKind::Full, true).await.unwrap_err();
        assert!(err.to_string().contains("retry queued"), "{:#}", err);
        assert_eq!(
            admin.get_target(target.id).unwrap().status,
            TargetStatus::Error
        );

        // The attempt is recorded on a job row like any worker run.
        let jobs = admin.list_jobs(Some(target.id), None, 10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].attempts, 1);
        assert_eq!(jobs[0].status, JobStatus::Queued);
        assert!(jobs[0].error_message.is_some());

        // The queued retry blocks another inline run.
        let again = admin.run(target.id, JobKind::Full, true).await.unwrap();
        assert!(matches!(again, RunRequest::AlreadyQueued));
        assert_eq!(admin.list_jobs(Some(target.id), None, 10).unwrap()[0].attempts, 1);
    }

    #[test]
    fn run_all_skips_targets_with_jobs_in_flight() {
        let dir = tempdir().unwrap();
        let admin = admin(dir.path());
        let a = admin.add_target("https://example.com/a", None).unwrap();
        admin.add_target("https://example.com/b", None).unwrap();
        admin.queue.enqueue(a.id, JobKind::Full).unwrap();

        let jobs = admin.run_all().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].kind, JobKind::Full);
        assert_eq!(admin.list_jobs(None, Some(JobStatus::Queued), 10).unwrap().len(), 2);
    }
}
