//! Cron-driven sweeps that decide what to crawl and when.
//!
//! ```text
//! Discovery     (hourly)   Pending + Error targets -> Full, or Update if linked
//! Refresh       (6 hours)  Done targets            -> Update
//! Chapter check (3 hours)  Done + linked targets   -> Update
//! ```
//!
//! Sweeps only enqueue. The worker pool does the crawling.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::models::{JobKind, TargetStatus};
use crate::queue::JobQueue;
use crate::repository::TargetRepository;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Sweep {
    Discovery,
    Refresh,
    ChapterCheck,
}

impl Sweep {
    pub const ALL: [Sweep; 3] = [Sweep::Discovery, Sweep::Refresh, Sweep::ChapterCheck];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Refresh => "refresh",
            Self::ChapterCheck => "chapter-check",
        }
    }
}

impl fmt::Display for Sweep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cron expressions use the six-field form (seconds first).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleConfig {
    #[serde(default = "default_discovery_cron")]
    pub discovery_cron: String,
    #[serde(default = "default_refresh_cron")]
    pub refresh_cron: String,
    #[serde(default = "default_chapter_check_cron")]
    pub chapter_check_cron: String,
    #[serde(default = "default_discovery_batch")]
    pub discovery_batch: u32,
    #[serde(default = "default_refresh_batch")]
    pub refresh_batch: u32,
    #[serde(default = "default_chapter_check_batch")]
    pub chapter_check_batch: u32,
}

fn default_discovery_cron() -> String {
    "0 0 * * * *".to_string()
}

fn default_refresh_cron() -> String {
    "0 0 */6 * * *".to_string()
}

fn default_chapter_check_cron() -> String {
    "0 30 */3 * * *".to_string()
}

fn default_discovery_batch() -> u32 {
    10
}

fn default_refresh_batch() -> u32 {
    20
}

fn default_chapter_check_batch() -> u32 {
    50
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            discovery_cron: default_discovery_cron(),
            refresh_cron: default_refresh_cron(),
            chapter_check_cron: default_chapter_check_cron(),
            discovery_batch: default_discovery_batch(),
            refresh_batch: default_refresh_batch(),
            chapter_check_batch: default_chapter_check_batch(),
        }
    }
}

impl ScheduleConfig {
    pub fn cron(&self, sweep: Sweep) -> &str {
        match sweep {
            Sweep::Discovery => &self.discovery_cron,
            Sweep::Refresh => &self.refresh_cron,
            Sweep::ChapterCheck => &self.chapter_check_cron,
        }
    }

    pub fn batch(&self, sweep: Sweep) -> u32 {
        match sweep {
            Sweep::Discovery => self.discovery_batch,
            Sweep::Refresh => self.refresh_batch,
            Sweep::ChapterCheck => self.chapter_check_batch,
        }
    }
}

/// Result of one sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub sweep: Sweep,
    pub selected: usize,
    pub enqueued: usize,
}

impl SweepReport {
    /// Targets selected but skipped because a job was already in flight.
    pub fn skipped(&self) -> usize {
        self.selected - self.enqueued
    }
}

pub struct Scheduler {
    targets: TargetRepository,
    queue: Arc<JobQueue>,
    config: ScheduleConfig,
}

impl Scheduler {
    pub fn new(targets: TargetRepository, queue: Arc<JobQueue>, config: ScheduleConfig) -> Self {
        Self {
            targets,
            queue,
            config,
        }
    }

    /// Select one batch and enqueue it. Crawling targets never match a
    /// sweep's status filter, and targets with a job in flight are skipped
    /// by the queue.
    pub fn run_sweep(&self, sweep: Sweep) -> Result<SweepReport> {
        let batch = self.config.batch(sweep);
        let (statuses, linked_only): (&[TargetStatus], bool) = match sweep {
            Sweep::Discovery => (&[TargetStatus::Pending, TargetStatus::Error], false),
            Sweep::Refresh => (&[TargetStatus::Done], false),
            Sweep::ChapterCheck => (&[TargetStatus::Done], true),
        };

        let targets = self.targets.list_for_sweep(statuses, linked_only, batch)?;
        let jobs: Vec<(i64, JobKind)> = targets
            .iter()
            .map(|t| {
                let kind = match sweep {
                    Sweep::Discovery if !t.is_linked() => JobKind::Full,
                    _ => JobKind::Update,
                };
                (t.id, kind)
            })
            .collect();

        let enqueued = self.queue.enqueue_batch(&jobs)?;
        let report = SweepReport {
            sweep,
            selected: targets.len(),
            enqueued: enqueued.len(),
        };
        info!(
            sweep = %sweep,
            "Sweep selected {} target(s), enqueued {}, skipped {}",
            report.selected,
            report.enqueued,
            report.skipped()
        );
        Ok(report)
    }

    /// Register every sweep with a cron scheduler and start it.
    pub async fn start(self: Arc<Self>) -> Result<JobScheduler> {
        let scheduler = JobScheduler::new().await?;

        for sweep in Sweep::ALL {
            let this = self.clone();
            let job = Job::new_async(self.config.cron(sweep), move |_uuid, _lock| {
                let this = this.clone();
                Box::pin(async move {
                    if let Err(e) = this.run_sweep(sweep) {
                        error!(sweep = %sweep, "Sweep failed: {:#}", e);
                    }
                })
            })?;
            scheduler.add(job).await?;
        }

        scheduler.start().await?;
        info!(
            "Scheduler started (discovery '{}', refresh '{}', chapter check '{}')",
            self.config.discovery_cron, self.config.refresh_cron, self.config.chapter_check_cron
        );
        Ok(scheduler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CrawlTarget, JobStatus};
    use crate::queue::RetryPolicy;
    use crate::repository::{JobRepository, NewTarget};
    use std::path::Path;
    use tempfile::tempdir;

    fn setup(dir: &Path, config: ScheduleConfig) -> (Scheduler, TargetRepository, Arc<JobQueue>) {
        let db = dir.join("crawl.db");
        let targets = TargetRepository::new(&db).unwrap();
        let queue = Arc::new(JobQueue::new(
            JobRepository::new(&db).unwrap(),
            RetryPolicy::default(),
        ));
        let scheduler = Scheduler::new(targets.clone(), queue.clone(), config);
        (scheduler, targets, queue)
    }

    fn add(targets: &TargetRepository, path: &str) -> CrawlTarget {
        targets
            .insert(&NewTarget {
                source_domain: "example.com".into(),
                source_url: format!("https://example.com/{}", path),
                title: None,
            })
            .unwrap()
    }

    fn mark_done(targets: &TargetRepository, id: i64) {
        assert!(targets.try_start(id).unwrap());
        targets.finish(id, TargetStatus::Done).unwrap();
    }

    #[test]
    fn discovery_enqueues_full_for_unlinked_and_update_for_linked() {
        let dir = tempdir().unwrap();
        let (scheduler, targets, queue) = setup(dir.path(), ScheduleConfig::default());

        let fresh = add(&targets, "fresh");
        let linked = add(&targets, "linked");
        targets.set_production_id(linked.id, 42).unwrap();
        let done = add(&targets, "done");
        mark_done(&targets, done.id);

        let report = scheduler.run_sweep(Sweep::Discovery).unwrap();
        assert_eq!(report.selected, 2);
        assert_eq!(report.enqueued, 2);

        let jobs = queue.list(None, Some(JobStatus::Queued), 10).unwrap();
        let kind_of = |id: i64| jobs.iter().find(|j| j.target_id == id).map(|j| j.kind);
        assert_eq!(kind_of(fresh.id), Some(JobKind::Full));
        assert_eq!(kind_of(linked.id), Some(JobKind::Update));
        assert_eq!(kind_of(done.id), None);
    }

    #[test]
    fn discovery_retries_errored_targets() {
        let dir = tempdir().unwrap();
        let (scheduler, targets, queue) = setup(dir.path(), ScheduleConfig::default());

        let linked = add(&targets, "linked");
        targets.set_production_id(linked.id, 7).unwrap();
        assert!(targets.try_start(linked.id).unwrap());
        targets.finish(linked.id, TargetStatus::Error).unwrap();
        let unlinked = add(&targets, "unlinked");
        assert!(targets.try_start(unlinked.id).unwrap());
        assert_eq!(targets.recover_interrupted().unwrap(), 1);

        assert_eq!(scheduler.run_sweep(Sweep::Refresh).unwrap().selected, 0);
        assert_eq!(scheduler.run_sweep(Sweep::ChapterCheck).unwrap().selected, 0);

        let report = scheduler.run_sweep(Sweep::Discovery).unwrap();
        assert_eq!((report.selected, report.enqueued), (2, 2));
        let jobs = queue.list(None, Some(JobStatus::Queued), 10).unwrap();
        let kind_of = |id: i64| jobs.iter().find(|j| j.target_id == id).map(|j| j.kind);
        assert_eq!(kind_of(linked.id), Some(JobKind::Update));
        assert_eq!(kind_of(unlinked.id), Some(JobKind::Full));
    }

    #[test]
    fn sweeps_respect_batch_size_and_in_flight_jobs() {
        let dir = tempdir().unwrap();
        let config = ScheduleConfig {
            discovery_batch: 2,
            ..Default::default()
        };
        let (scheduler, targets, _queue) = setup(dir.path(), config);
        for i in 0..5 {
            add(&targets, &format!("t{}", i));
        }

        let first = scheduler.run_sweep(Sweep::Discovery).unwrap();
        assert_eq!((first.selected, first.enqueued), (2, 2));

        // Same two targets are still pending and least recently crawled,
        // but their jobs are queued.
        let second = scheduler.run_sweep(Sweep::Discovery).unwrap();
        assert_eq!((second.selected, second.enqueued), (2, 0));
        assert_eq!(second.skipped(), 2);
    }

    #[test]
    fn chapter_check_only_picks_linked_done_targets() {
        let dir = tempdir().unwrap();
        let (scheduler, targets, queue) = setup(dir.path(), ScheduleConfig::default());

        let linked = add(&targets, "linked");
        targets.set_production_id(linked.id, 7).unwrap();
        mark_done(&targets, linked.id);
        let unlinked = add(&targets, "unlinked");
        mark_done(&targets, unlinked.id);
        let crawling = add(&targets, "crawling");
        targets.set_production_id(crawling.id, 8).unwrap();
        assert!(targets.try_start(crawling.id).unwrap());

        let report = scheduler.run_sweep(Sweep::ChapterCheck).unwrap();
        assert_eq!(report.enqueued, 1);
        let jobs = queue.list(None, None, 10).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].target_id, linked.id);
        assert_eq!(jobs[0].kind, JobKind::Update);

        let refresh = scheduler.run_sweep(Sweep::Refresh).unwrap();
        assert_eq!(refresh.selected, 2);
        assert_eq!(refresh.enqueued, 1);
    }

    #[test]
    fn default_crons_and_batches() {
        let config = ScheduleConfig::default();
        assert_eq!(config.cron(Sweep::Discovery), "0 0 * * * *");
        assert_eq!(config.batch(Sweep::Discovery), 10);
        assert_eq!(config.batch(Sweep::Refresh), 20);
        assert_eq!(config.batch(Sweep::ChapterCheck), 50);
        assert_eq!(Sweep::ChapterCheck.to_string(), "chapter-check");
    }
}
