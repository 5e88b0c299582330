//! Worker loops that drain the job queue.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::{JobQueue, RetryPolicy};
use crate::models::CrawlJob;

/// Executes the work a job describes. The worker only records the outcome.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &CrawlJob) -> anyhow::Result<()>;
}

/// What happened to a claimed job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Retrying { next_run_at: DateTime<Utc> },
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Number of worker loops. The browser pool is the real bound on
    /// concurrent crawls; extra workers just wait on it.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
}

fn default_concurrency() -> usize {
    3
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_secs() -> u64 {
    5
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval_ms(),
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base_secs(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_secs(self.backoff_base_secs),
        )
    }
}

/// Await the work for a claimed job and record how it ended. An error or a
/// panic counts as a failed attempt; the message is returned alongside the
/// outcome.
pub async fn settle<T, F>(
    queue: &JobQueue,
    job: &CrawlJob,
    work: F,
) -> anyhow::Result<(JobOutcome, std::result::Result<T, String>)>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let result = AssertUnwindSafe(work).catch_unwind().await;
    let message = match result {
        Ok(Ok(value)) => {
            queue.complete(job)?;
            info!(job_id = job.id, target_id = job.target_id, "Job succeeded");
            return Ok((JobOutcome::Succeeded, Ok(value)));
        }
        Ok(Err(e)) => format!("{:#}", e),
        Err(_) => "job handler panicked".to_string(),
    };
    let outcome = queue.fail(job, &message)?;
    Ok((outcome, Err(message)))
}

pub struct Worker {
    id: usize,
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        id: usize,
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            handler,
            poll_interval,
        }
    }

    /// Claim and process one due job. Returns `None` when nothing is due.
    pub async fn run_once(&self) -> anyhow::Result<Option<(CrawlJob, JobOutcome)>> {
        let Some(job) = self.queue.claim_next()? else {
            return Ok(None);
        };

        info!(
            worker = self.id,
            job_id = job.id,
            target_id = job.target_id,
            kind = %job.kind,
            attempt = job.attempts,
            "Running job"
        );

        let (outcome, _) = settle(&self.queue, &job, self.handler.handle(&job)).await?;
        Ok(Some((job, outcome)))
    }

    /// Poll until the shutdown flag flips. A job in progress finishes first.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = self.id, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }

            match self.run_once().await {
                Ok(Some(_)) => continue,
                Ok(None) => {}
                Err(e) => error!(worker = self.id, "Queue error: {:#}", e),
            }

            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
        debug!(worker = self.id, "Worker stopped");
    }
}

/// A set of worker loops sharing one queue and one shutdown signal.
pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: &WorkerConfig,
    ) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let count = config.concurrency.max(1);
        let handles = (0..count)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    queue.clone(),
                    handler.clone(),
                    config.poll_interval(),
                );
                tokio::spawn(worker.run(rx.clone()))
            })
            .collect();
        info!("Started {} worker(s)", count);
        Self { shutdown, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Signal every loop to stop and wait for in-progress jobs to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        info!("Workers stopped");
    }
}
