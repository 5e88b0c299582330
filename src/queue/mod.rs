//! Durable crawl job queue.
//!
//! At-least-once delivery on top of the `crawl_jobs` table: jobs are
//! claimed one at a time, retried with exponential backoff, and end in a
//! terminal `succeeded` or `failed` state that is kept for auditing.

mod retry;
mod worker;

use chrono::Utc;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{CrawlJob, JobKind, JobStatus};
use crate::repository::{JobRepository, RepositoryError};

pub use retry::RetryPolicy;
pub use worker::{settle, JobHandler, JobOutcome, Worker, WorkerConfig, WorkerPool};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Repository(#[from] RepositoryError),
    #[error("job {0} not found")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, QueueError>;

pub struct JobQueue {
    repo: JobRepository,
    policy: RetryPolicy,
}

impl JobQueue {
    pub fn new(repo: JobRepository, policy: RetryPolicy) -> Self {
        Self { repo, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Enqueue a job unless one is already queued or running for the target.
    pub fn enqueue(&self, target_id: i64, kind: JobKind) -> Result<Option<CrawlJob>> {
        let job = self.repo.enqueue(target_id, kind, self.policy.max_attempts)?;
        match &job {
            Some(job) => info!(job_id = job.id, target_id, kind = %kind, "Enqueued job"),
            None => info!(target_id, "Job already in flight; not enqueued"),
        }
        Ok(job)
    }

    /// Enqueue several jobs atomically, skipping targets with work in flight.
    pub fn enqueue_batch(&self, jobs: &[(i64, JobKind)]) -> Result<Vec<CrawlJob>> {
        let enqueued = self.repo.enqueue_batch(jobs, self.policy.max_attempts)?;
        if !jobs.is_empty() {
            info!("Enqueued {}/{} job(s)", enqueued.len(), jobs.len());
        }
        Ok(enqueued)
    }

    pub fn claim_next(&self) -> Result<Option<CrawlJob>> {
        Ok(self.repo.claim_next()?)
    }

    /// Claim a specific queued job so it can be run outside the workers.
    pub fn claim(&self, id: i64) -> Result<Option<CrawlJob>> {
        Ok(self.repo.claim(id)?)
    }

    pub fn complete(&self, job: &CrawlJob) -> Result<()> {
        self.repo.mark_succeeded(job.id)?;
        Ok(())
    }

    /// Record a failed attempt. The job goes back to the queue with backoff
    /// while attempts remain, and is failed terminally otherwise.
    pub fn fail(&self, job: &CrawlJob, message: &str) -> Result<JobOutcome> {
        // Neither the policy nor the cap stored on the job may be exceeded.
        if self.policy.should_retry(job.attempts) && job.attempts < job.max_attempts {
            let delay = self.policy.delay_for(job.attempts);
            let next_run_at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            self.repo.requeue(job.id, message, next_run_at)?;
            warn!(
                job_id = job.id,
                target_id = job.target_id,
                attempt = job.attempts,
                "Job attempt failed, retrying in {:?}: {}",
                delay,
                message
            );
            Ok(JobOutcome::Retrying { next_run_at })
        } else {
            self.repo.mark_failed(job.id, message)?;
            warn!(
                job_id = job.id,
                target_id = job.target_id,
                attempts = job.attempts,
                "Job failed permanently: {}",
                message
            );
            Ok(JobOutcome::Failed)
        }
    }

    /// Requeue jobs left running by a previous process.
    pub fn recover_stale(&self) -> Result<usize> {
        let recovered = self.repo.recover_running()?;
        if recovered > 0 {
            info!("Recovered {} interrupted job(s)", recovered);
        }
        Ok(recovered)
    }

    pub fn get(&self, id: i64) -> Result<CrawlJob> {
        self.repo.get(id)?.ok_or(QueueError::NotFound(id))
    }

    pub fn list(
        &self,
        target_id: Option<i64>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<CrawlJob>> {
        Ok(self.repo.list(target_id, status, limit)?)
    }
}
