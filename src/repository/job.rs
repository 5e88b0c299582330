//! Durable crawl job queue storage.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{parse_datetime, parse_datetime_opt, timestamp, with_immediate, RepositoryError, Result};
use crate::models::{CrawlJob, JobKind, JobStatus};

/// SQLite-backed storage for crawl jobs.
#[derive(Debug, Clone)]
pub struct JobRepository {
    db_path: PathBuf,
}

impl JobRepository {
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    pub(crate) fn connect(&self) -> Result<Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS crawl_jobs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target_id INTEGER NOT NULL REFERENCES crawl_targets(id) ON DELETE CASCADE,
                kind TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',

                -- Retry tracking
                attempts INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL DEFAULT 3,
                next_run_at TEXT NOT NULL,
                error_message TEXT,

                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_jobs_due
                ON crawl_jobs(status, next_run_at);
            CREATE INDEX IF NOT EXISTS idx_crawl_jobs_target
                ON crawl_jobs(target_id, status);
        "#,
        )?;
        Ok(())
    }

    /// Insert a job unless the target already has one queued or running.
    pub fn enqueue(
        &self,
        target_id: i64,
        kind: JobKind,
        max_attempts: u32,
    ) -> Result<Option<CrawlJob>> {
        let conn = self.connect()?;
        with_immediate(&conn, |conn| {
            insert_if_idle(conn, target_id, kind, max_attempts)
        })
    }

    /// Enqueue several jobs in one transaction. Targets with work in flight
    /// are skipped.
    pub fn enqueue_batch(
        &self,
        jobs: &[(i64, JobKind)],
        max_attempts: u32,
    ) -> Result<Vec<CrawlJob>> {
        let conn = self.connect()?;
        with_immediate(&conn, |conn| {
            let mut enqueued = Vec::with_capacity(jobs.len());
            for (target_id, kind) in jobs {
                if let Some(job) = insert_if_idle(conn, *target_id, *kind, max_attempts)? {
                    enqueued.push(job);
                }
            }
            Ok(enqueued)
        })
    }

    pub fn get(&self, id: i64) -> Result<Option<CrawlJob>> {
        let conn = self.connect()?;
        get_with(&conn, id)
    }

    /// Atomically claim the oldest due queued job, moving it to running and
    /// counting the attempt.
    pub fn claim_next(&self) -> Result<Option<CrawlJob>> {
        let conn = self.connect()?;
        let now = Utc::now();
        with_immediate(&conn, |conn| {
            let job = conn
                .query_row(
                    r#"
                    SELECT * FROM crawl_jobs
                    WHERE status = 'queued' AND next_run_at <= ?
                    ORDER BY next_run_at ASC, id ASC
                    LIMIT 1
                    "#,
                    params![timestamp(now)],
                    row_to_job,
                )
                .optional()?;

            match job {
                Some(job) => mark_running(conn, job, now).map(Some),
                None => Ok(None),
            }
        })
    }

    /// Claim one specific queued job, whether or not it is due.
    pub fn claim(&self, id: i64) -> Result<Option<CrawlJob>> {
        let conn = self.connect()?;
        let now = Utc::now();
        with_immediate(&conn, |conn| {
            let job = conn
                .query_row(
                    "SELECT * FROM crawl_jobs WHERE id = ? AND status = 'queued'",
                    params![id],
                    row_to_job,
                )
                .optional()?;
            match job {
                Some(job) => mark_running(conn, job, now).map(Some),
                None => Ok(None),
            }
        })
    }

    pub fn mark_succeeded(&self, id: i64) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE crawl_jobs SET status = 'succeeded', error_message = NULL, finished_at = ?
            WHERE id = ? AND status = 'running'
            "#,
            params![timestamp(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::Conflict(format!("job {} is not running", id)));
        }
        Ok(())
    }

    /// Put a failed attempt back in the queue to run no earlier than
    /// `next_run_at`.
    pub fn requeue(&self, id: i64, message: &str, next_run_at: DateTime<Utc>) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE crawl_jobs SET status = 'queued', error_message = ?, next_run_at = ?
            WHERE id = ? AND status = 'running'
            "#,
            params![message, timestamp(next_run_at), id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::Conflict(format!("job {} is not running", id)));
        }
        Ok(())
    }

    /// Terminal failure.
    pub fn mark_failed(&self, id: i64, message: &str) -> Result<()> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE crawl_jobs SET status = 'failed', error_message = ?, finished_at = ?
            WHERE id = ? AND status = 'running'
            "#,
            params![message, timestamp(Utc::now()), id],
        )?;
        if changed == 0 {
            return Err(RepositoryError::Conflict(format!("job {} is not running", id)));
        }
        Ok(())
    }

    /// Return jobs orphaned in `running` by a dead process to the queue.
    pub fn recover_running(&self) -> Result<usize> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE crawl_jobs SET status = 'queued', next_run_at = ?,
                error_message = COALESCE(error_message, 'interrupted')
            WHERE status = 'running'
            "#,
            params![timestamp(Utc::now())],
        )?;
        Ok(changed)
    }

    /// List jobs, newest first.
    pub fn list(
        &self,
        target_id: Option<i64>,
        status: Option<JobStatus>,
        limit: u32,
    ) -> Result<Vec<CrawlJob>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM crawl_jobs
            WHERE (?1 IS NULL OR target_id = ?1)
            AND (?2 IS NULL OR status = ?2)
            ORDER BY id DESC
            LIMIT ?3
            "#,
        )?;
        let jobs = stmt
            .query_map(
                params![target_id, status.map(|s| s.as_str()), limit],
                row_to_job,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(jobs)
    }
}

fn mark_running(conn: &Connection, mut job: CrawlJob, now: DateTime<Utc>) -> Result<CrawlJob> {
    conn.execute(
        r#"
        UPDATE crawl_jobs
        SET status = 'running', attempts = attempts + 1, started_at = ?, finished_at = NULL
        WHERE id = ?
        "#,
        params![timestamp(now), job.id],
    )?;
    job.status = JobStatus::Running;
    job.attempts += 1;
    job.started_at = Some(now);
    job.finished_at = None;
    Ok(job)
}

fn insert_if_idle(
    conn: &Connection,
    target_id: i64,
    kind: JobKind,
    max_attempts: u32,
) -> Result<Option<CrawlJob>> {
    let now = timestamp(Utc::now());
    let inserted = conn.execute(
        r#"
        INSERT INTO crawl_jobs (target_id, kind, status, attempts, max_attempts, next_run_at, created_at)
        SELECT ?1, ?2, 'queued', 0, ?3, ?4, ?4
        WHERE NOT EXISTS (
            SELECT 1 FROM crawl_jobs
            WHERE target_id = ?1 AND status IN ('queued', 'running')
        )
        "#,
        params![target_id, kind.as_str(), max_attempts, now],
    )?;
    if inserted == 0 {
        return Ok(None);
    }
    get_with(conn, conn.last_insert_rowid())
}

fn get_with(conn: &Connection, id: i64) -> Result<Option<CrawlJob>> {
    let job = conn
        .query_row(
            "SELECT * FROM crawl_jobs WHERE id = ?",
            params![id],
            row_to_job,
        )
        .optional()?;
    Ok(job)
}

fn row_to_job(row: &rusqlite::Row) -> rusqlite::Result<CrawlJob> {
    Ok(CrawlJob {
        id: row.get("id")?,
        target_id: row.get("target_id")?,
        kind: JobKind::from_str(&row.get::<_, String>("kind")?).unwrap_or(JobKind::Full),
        status: JobStatus::from_str(&row.get::<_, String>("status")?)
            .unwrap_or(JobStatus::Queued),
        attempts: row.get::<_, i64>("attempts")? as u32,
        max_attempts: row.get::<_, i64>("max_attempts")? as u32,
        next_run_at: parse_datetime(&row.get::<_, String>("next_run_at")?),
        error_message: row.get("error_message")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        started_at: parse_datetime_opt(row.get("started_at")?),
        finished_at: parse_datetime_opt(row.get("finished_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{NewTarget, TargetRepository};
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, TargetRepository, JobRepository) {
        let dir = tempdir().unwrap();
        let db = dir.path().join("crawl.db");
        let targets = TargetRepository::new(&db).unwrap();
        let jobs = JobRepository::new(&db).unwrap();
        (dir, targets, jobs)
    }

    fn add_target(targets: &TargetRepository, url: &str) -> i64 {
        targets
            .insert(&NewTarget {
                source_domain: "example.com".to_string(),
                source_url: url.to_string(),
                title: None,
            })
            .unwrap()
            .id
    }

    #[test]
    fn enqueue_skips_targets_with_work_in_flight() {
        let (_dir, targets, jobs) = setup();
        let id = add_target(&targets, "https://example.com/a");

        assert!(jobs.enqueue(id, JobKind::Full, 3).unwrap().is_some());
        assert!(jobs.enqueue(id, JobKind::Update, 3).unwrap().is_none());

        let claimed = jobs.claim_next().unwrap().unwrap();
        assert_eq!(claimed.status, JobStatus::Running);
        assert_eq!(claimed.attempts, 1);
        assert!(jobs.enqueue(id, JobKind::Update, 3).unwrap().is_none());

        jobs.mark_succeeded(claimed.id).unwrap();
        assert!(jobs.enqueue(id, JobKind::Update, 3).unwrap().is_some());
    }

    #[test]
    fn claim_respects_next_run_at() {
        let (_dir, targets, jobs) = setup();
        let id = add_target(&targets, "https://example.com/a");
        jobs.enqueue(id, JobKind::Full, 3).unwrap();

        let claimed = jobs.claim_next().unwrap().unwrap();
        jobs.requeue(
            claimed.id,
            "timeout",
            Utc::now() + chrono::Duration::seconds(60),
        )
        .unwrap();
        assert!(jobs.claim_next().unwrap().is_none());

        let job = jobs.get(claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.error_message.as_deref(), Some("timeout"));
    }

    #[test]
    fn batch_enqueue_and_filtered_listing() {
        let (_dir, targets, jobs) = setup();
        let a = add_target(&targets, "https://example.com/a");
        let b = add_target(&targets, "https://example.com/b");
        jobs.enqueue(a, JobKind::Full, 3).unwrap();

        let enqueued = jobs
            .enqueue_batch(&[(a, JobKind::Update), (b, JobKind::Update)], 3)
            .unwrap();
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].target_id, b);

        assert_eq!(jobs.list(Some(a), None, 10).unwrap().len(), 1);
        assert_eq!(jobs.list(None, Some(JobStatus::Queued), 10).unwrap().len(), 2);
        assert_eq!(jobs.list(None, Some(JobStatus::Failed), 10).unwrap().len(), 0);
    }

    #[test]
    fn deleting_target_removes_its_jobs() {
        let (_dir, targets, jobs) = setup();
        let a = add_target(&targets, "https://example.com/a");
        jobs.enqueue(a, JobKind::Full, 3).unwrap();

        assert!(targets.delete(a).unwrap());
        assert!(jobs.list(Some(a), None, 10).unwrap().is_empty());
    }

    #[test]
    fn recover_running_requeues() {
        let (_dir, targets, jobs) = setup();
        let a = add_target(&targets, "https://example.com/a");
        jobs.enqueue(a, JobKind::Full, 3).unwrap();
        let claimed = jobs.claim_next().unwrap().unwrap();

        assert_eq!(jobs.recover_running().unwrap(), 1);
        let job = jobs.get(claimed.id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.attempts, 1);
    }
}
