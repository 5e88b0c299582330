//! Crawl target repository.

use std::path::{Path, PathBuf};

use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{parse_datetime, parse_datetime_opt, timestamp, RepositoryError, Result};
use crate::models::{CrawlTarget, TargetStatus};

/// Fields needed to register a target.
#[derive(Debug, Clone)]
pub struct NewTarget {
    pub source_domain: String,
    pub source_url: String,
    pub title: Option<String>,
}

/// Fields discovered by the detail phase or edited by an operator.
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default)]
pub struct TargetUpdate {
    pub source_domain: Option<String>,
    pub source_url: Option<String>,
    pub title: Option<String>,
    pub slug: Option<String>,
    pub cover_url: Option<String>,
}

/// SQLite-backed repository for crawl targets.
#[derive(Debug, Clone)]
pub struct TargetRepository {
    db_path: PathBuf,
}

impl TargetRepository {
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
            CREATE TABLE IF NOT EXISTS crawl_targets (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_domain TEXT NOT NULL,
                source_url TEXT NOT NULL UNIQUE,

                -- Discovered on first detail fetch
                title TEXT,
                slug TEXT,
                cover_url TEXT,

                -- Link to the production title once synced
                production_id INTEGER,

                status TEXT NOT NULL DEFAULT 'pending',
                last_crawled_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_crawl_targets_status
                ON crawl_targets(status, last_crawled_at);
            CREATE INDEX IF NOT EXISTS idx_crawl_targets_domain
                ON crawl_targets(source_domain);
        "#,
        )?;
        Ok(())
    }

    /// Register a new target in `Pending`.
    pub fn insert(&self, target: &NewTarget) -> Result<CrawlTarget> {
        let conn = self.connect()?;
        let now = timestamp(Utc::now());
        let inserted = conn.execute(
            r#"
            INSERT INTO crawl_targets (source_domain, source_url, title, status, created_at, updated_at)
            VALUES (?, ?, ?, 'pending', ?, ?)
            ON CONFLICT(source_url) DO NOTHING
            "#,
            params![target.source_domain, target.source_url, target.title, now, now],
        )?;
        if inserted == 0 {
            return Err(RepositoryError::Conflict(format!(
                "target already registered: {}",
                target.source_url
            )));
        }
        let id = conn.last_insert_rowid();
        self.get_with(&conn, id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("target {}", id)))
    }

    pub fn get(&self, id: i64) -> Result<Option<CrawlTarget>> {
        let conn = self.connect()?;
        self.get_with(&conn, id)
    }

    fn get_with(&self, conn: &Connection, id: i64) -> Result<Option<CrawlTarget>> {
        let target = conn
            .query_row(
                "SELECT * FROM crawl_targets WHERE id = ?",
                params![id],
                row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    pub fn get_by_url(&self, source_url: &str) -> Result<Option<CrawlTarget>> {
        let conn = self.connect()?;
        let target = conn
            .query_row(
                "SELECT * FROM crawl_targets WHERE source_url = ?",
                params![source_url],
                row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    /// List targets, optionally filtered by status, newest first.
    pub fn list(&self, status: Option<TargetStatus>, limit: u32) -> Result<Vec<CrawlTarget>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM crawl_targets
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY id DESC
            LIMIT ?2
            "#,
        )?;
        let targets = stmt
            .query_map(params![status.map(|s| s.as_str()), limit], row_to_target)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(targets)
    }

    /// Select a sweep batch: targets in any of `statuses`, least recently
    /// crawled first (never-crawled targets lead).
    pub fn list_for_sweep(
        &self,
        statuses: &[TargetStatus],
        linked_only: bool,
        limit: u32,
    ) -> Result<Vec<CrawlTarget>> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.connect()?;
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let mut stmt = conn.prepare(&format!(
            r#"
            SELECT * FROM crawl_targets
            WHERE status IN ({})
            AND (? = 0 OR production_id IS NOT NULL)
            ORDER BY COALESCE(last_crawled_at, '') ASC, id ASC
            LIMIT ?
            "#,
            placeholders
        ))?;

        let mut values: Vec<Value> = statuses
            .iter()
            .map(|s| Value::Text(s.as_str().to_string()))
            .collect();
        values.push(Value::Integer(linked_only as i64));
        values.push(Value::Integer(i64::from(limit)));

        let targets = stmt
            .query_map(params_from_iter(values), row_to_target)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(targets)
    }

    /// All targets that may start a run, used by run-all.
    pub fn list_startable(&self) -> Result<Vec<CrawlTarget>> {
        self.list_for_sweep(&TargetStatus::startable(), false, u32::MAX)
    }

    pub fn update(&self, id: i64, update: &TargetUpdate) -> Result<CrawlTarget> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE crawl_targets SET
                source_domain = COALESCE(?, source_domain),
                source_url = COALESCE(?, source_url),
                title = COALESCE(?, title),
                slug = COALESCE(?, slug),
                cover_url = COALESCE(?, cover_url),
                updated_at = ?
            WHERE id = ?
            "#,
            params![
                update.source_domain,
                update.source_url,
                update.title,
                update.slug,
                update.cover_url,
                timestamp(Utc::now()),
                id
            ],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound(format!("target {}", id)));
        }
        self.get_with(&conn, id)?
            .ok_or_else(|| RepositoryError::NotFound(format!("target {}", id)))
    }

    pub fn set_production_id(&self, id: i64, production_id: i64) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "UPDATE crawl_targets SET production_id = ?, updated_at = ? WHERE id = ?",
            params![production_id, timestamp(Utc::now()), id],
        )?;
        Ok(())
    }

    /// Atomically enter `Crawling`. Returns false when the target is already
    /// crawling or missing.
    pub fn try_start(&self, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute(
            r#"
            UPDATE crawl_targets SET status = 'crawling', updated_at = ?
            WHERE id = ? AND status != 'crawling'
            "#,
            params![timestamp(Utc::now()), id],
        )?;
        Ok(changed == 1)
    }

    /// Leave `Crawling` for `Done` or `Error`.
    pub fn finish(&self, id: i64, status: TargetStatus) -> Result<()> {
        if !TargetStatus::Crawling.can_transition_to(status) {
            return Err(RepositoryError::Conflict(format!(
                "invalid transition crawling -> {}",
                status
            )));
        }
        let conn = self.connect()?;
        let now = timestamp(Utc::now());
        let changed = match status {
            TargetStatus::Done => conn.execute(
                r#"
                UPDATE crawl_targets SET status = 'done', last_crawled_at = ?1, updated_at = ?1
                WHERE id = ?2 AND status = 'crawling'
                "#,
                params![now, id],
            )?,
            _ => conn.execute(
                r#"
                UPDATE crawl_targets SET status = ?1, updated_at = ?2
                WHERE id = ?3 AND status = 'crawling'
                "#,
                params![status.as_str(), now, id],
            )?,
        };
        if changed == 0 {
            return Err(RepositoryError::Conflict(format!(
                "target {} is not crawling",
                id
            )));
        }
        Ok(())
    }

    /// Move targets left in `Crawling` by a dead process to `Error`.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let conn = self.connect()?;
        let changed = conn.execute(
            "UPDATE crawl_targets SET status = 'error', updated_at = ? WHERE status = 'crawling'",
            params![timestamp(Utc::now())],
        )?;
        Ok(changed)
    }

    /// Remove a target and its job history.
    pub fn delete(&self, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let deleted = conn.execute("DELETE FROM crawl_targets WHERE id = ?", params![id])?;
        Ok(deleted > 0)
    }

    pub fn count_by_status(&self) -> Result<Vec<(TargetStatus, u64)>> {
        let conn = self.connect()?;
        let mut stmt =
            conn.prepare("SELECT status, COUNT(*) FROM crawl_targets GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(s, n)| TargetStatus::from_str(&s).map(|s| (s, n as u64)))
            .collect())
    }
}

fn row_to_target(row: &rusqlite::Row) -> rusqlite::Result<CrawlTarget> {
    Ok(CrawlTarget {
        id: row.get("id")?,
        source_domain: row.get("source_domain")?,
        source_url: row.get("source_url")?,
        title: row.get("title")?,
        slug: row.get("slug")?,
        cover_url: row.get("cover_url")?,
        production_id: row.get("production_id")?,
        status: TargetStatus::from_str(&row.get::<_, String>("status")?)
            .unwrap_or(TargetStatus::Pending),
        last_crawled_at: parse_datetime_opt(row.get("last_crawled_at")?),
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_target(url: &str) -> NewTarget {
        NewTarget {
            source_domain: "example.com".to_string(),
            source_url: url.to_string(),
            title: None,
        }
    }

    #[test]
    fn insert_rejects_duplicate_url() {
        let dir = tempdir().unwrap();
        let repo = TargetRepository::new(&dir.path().join("crawl.db")).unwrap();

        let target = repo.insert(&new_target("https://example.com/a")).unwrap();
        assert_eq!(target.status, TargetStatus::Pending);
        assert!(!target.is_linked());

        let err = repo.insert(&new_target("https://example.com/a")).unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[test]
    fn start_is_compare_and_swap() {
        let dir = tempdir().unwrap();
        let repo = TargetRepository::new(&dir.path().join("crawl.db")).unwrap();
        let target = repo.insert(&new_target("https://example.com/a")).unwrap();

        assert!(repo.try_start(target.id).unwrap());
        assert!(!repo.try_start(target.id).unwrap());

        repo.finish(target.id, TargetStatus::Done).unwrap();
        let done = repo.get(target.id).unwrap().unwrap();
        assert_eq!(done.status, TargetStatus::Done);
        assert!(done.last_crawled_at.is_some());

        // Finishing twice is not a legal transition.
        assert!(repo.finish(target.id, TargetStatus::Error).is_err());
        assert!(repo.finish(target.id, TargetStatus::Pending).is_err());
    }

    #[test]
    fn sweep_selection_filters_linked_targets() {
        let dir = tempdir().unwrap();
        let repo = TargetRepository::new(&dir.path().join("crawl.db")).unwrap();
        let a = repo.insert(&new_target("https://example.com/a")).unwrap();
        let b = repo.insert(&new_target("https://example.com/b")).unwrap();
        repo.set_production_id(b.id, 42).unwrap();

        let pending = repo.list_for_sweep(&[TargetStatus::Pending], false, 10).unwrap();
        assert_eq!(pending.len(), 2);

        let linked = repo.list_for_sweep(&[TargetStatus::Pending], true, 10).unwrap();
        assert_eq!(linked.len(), 1);
        assert_eq!(linked[0].id, b.id);

        repo.try_start(a.id).unwrap();
        let pending = repo.list_for_sweep(&[TargetStatus::Pending], false, 10).unwrap();
        assert_eq!(pending.len(), 1);

        repo.finish(a.id, TargetStatus::Error).unwrap();
        let retryable = repo
            .list_for_sweep(&[TargetStatus::Pending, TargetStatus::Error], false, 10)
            .unwrap();
        let ids: Vec<i64> = retryable.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![a.id, b.id]);
        assert!(repo.list_for_sweep(&[], false, 10).unwrap().is_empty());
    }

    #[test]
    fn recover_interrupted_marks_crawling_as_error() {
        let dir = tempdir().unwrap();
        let repo = TargetRepository::new(&dir.path().join("crawl.db")).unwrap();
        let a = repo.insert(&new_target("https://example.com/a")).unwrap();
        repo.try_start(a.id).unwrap();

        assert_eq!(repo.recover_interrupted().unwrap(), 1);
        assert_eq!(
            repo.get(a.id).unwrap().unwrap().status,
            TargetStatus::Error
        );
    }
}
