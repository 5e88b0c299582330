//! Production catalog storage: titles, chapters and chapter content.
//!
//! Writes are create-or-update by natural key. Titles resolve by slug and
//! then by case-insensitive trimmed name; chapters resolve by
//! `(title_id, slug)`; content resolves by `(chapter_id, server_id)`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::Serialize;
use tracing::{debug, warn};

use super::{parse_datetime, timestamp, RepositoryError, Result};

/// Title fields written by a sync.
#[derive(Debug, Clone)]
pub struct TitleUpsert {
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    /// Migrated cover path. `None` keeps the stored cover.
    pub cover_path: Option<String>,
    pub status: String,
    pub owner_id: i64,
    pub author: Option<String>,
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TitleRecord {
    pub id: i64,
    pub name: String,
    pub slug: String,
    pub description: Option<String>,
    pub cover_path: Option<String>,
    pub status: String,
    pub owner_id: i64,
    pub author_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterRecord {
    pub id: i64,
    pub title_id: i64,
    pub slug: String,
    pub name: String,
    pub order: i64,
    pub created_at: DateTime<Utc>,
}

/// Outcome of a create-or-update: the row id and stored asset paths the
/// write stopped referencing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upserted {
    pub id: i64,
    pub superseded: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChapterContentRecord {
    pub chapter_id: i64,
    pub server_id: i64,
    pub urls: Vec<String>,
}

/// SQLite-backed production catalog.
#[derive(Debug, Clone)]
pub struct CatalogRepository {
    db_path: PathBuf,
}

impl CatalogRepository {
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
            CREATE TABLE IF NOT EXISTS authors (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            CREATE TABLE IF NOT EXISTS titles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                description TEXT,
                cover_path TEXT,
                status TEXT NOT NULL,
                owner_id INTEGER NOT NULL,
                author_id INTEGER REFERENCES authors(id) ON DELETE SET NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS title_categories (
                title_id INTEGER NOT NULL REFERENCES titles(id) ON DELETE CASCADE,
                category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
                PRIMARY KEY (title_id, category_id)
            );

            CREATE TABLE IF NOT EXISTS chapters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                title_id INTEGER NOT NULL REFERENCES titles(id) ON DELETE CASCADE,
                slug TEXT NOT NULL,
                name TEXT NOT NULL,
                chapter_order INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(title_id, slug)
            );

            CREATE TABLE IF NOT EXISTS chapter_contents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                chapter_id INTEGER NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
                server_id INTEGER NOT NULL,
                urls TEXT NOT NULL DEFAULT '[]',
                updated_at TEXT NOT NULL,
                UNIQUE(chapter_id, server_id)
            );

            CREATE INDEX IF NOT EXISTS idx_titles_name
                ON titles(lower(trim(name)));
            CREATE INDEX IF NOT EXISTS idx_chapters_order
                ON chapters(title_id, chapter_order);
        "#,
        )?;
        Ok(())
    }

    /// Create or update a title in one transaction. Author and category
    /// linking is best-effort and cannot abort the title write.
    pub fn upsert_title(&self, title: &TitleUpsert) -> Result<Upserted> {
        let mut conn = self.connect()?;
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = timestamp(Utc::now());

        let by_slug: Option<i64> = tx
            .query_row(
                "SELECT id FROM titles WHERE slug = ?",
                params![title.slug],
                |row| row.get(0),
            )
            .optional()?;

        let existing = match by_slug {
            Some(id) => Some(id),
            None => {
                let by_name: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM titles WHERE lower(trim(name)) = lower(trim(?)) ORDER BY id LIMIT 1",
                        params![title.name],
                        |row| row.get(0),
                    )
                    .optional()?;
                if let Some(id) = by_name {
                    debug!(title_id = id, slug = %title.slug, "Resolved title by name");
                }
                by_name
            }
        };

        let mut superseded = Vec::new();
        if let (Some(id), Some(new_cover)) = (existing, title.cover_path.as_deref()) {
            let old_cover: Option<String> = tx.query_row(
                "SELECT cover_path FROM titles WHERE id = ?",
                params![id],
                |row| row.get(0),
            )?;
            superseded.extend(old_cover.filter(|old| old != new_cover));
        }

        let title_id = match (existing, by_slug) {
            (Some(id), Some(_)) => {
                tx.execute(
                    r#"
                    UPDATE titles SET name = ?, description = COALESCE(?, description),
                        cover_path = COALESCE(?, cover_path), updated_at = ?
                    WHERE id = ?
                    "#,
                    params![title.name, title.description, title.cover_path, now, id],
                )?;
                id
            }
            (Some(id), None) => {
                tx.execute(
                    r#"
                    UPDATE titles SET description = COALESCE(?, description),
                        cover_path = COALESCE(?, cover_path), updated_at = ?
                    WHERE id = ?
                    "#,
                    params![title.description, title.cover_path, now, id],
                )?;
                id
            }
            (None, _) => {
                tx.execute(
                    r#"
                    INSERT INTO titles (name, slug, description, cover_path, status, owner_id, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                    params![
                        title.name,
                        title.slug,
                        title.description,
                        title.cover_path,
                        title.status,
                        title.owner_id,
                        now,
                        now
                    ],
                )?;
                tx.last_insert_rowid()
            }
        };

        {
            let sp = tx.savepoint()?;
            match link_metadata(&sp, title_id, title) {
                Ok(()) => sp.commit()?,
                // Dropping the savepoint rolls back only the linking writes.
                Err(e) => warn!(title_id, "Skipping author/category linking: {}", e),
            }
        }

        tx.commit()?;
        Ok(Upserted {
            id: title_id,
            superseded,
        })
    }

    /// Create or update a chapter and its content for `server_id` in one
    /// transaction. An existing chapter keeps its order unless `order` is
    /// given; a new one is appended after the current last chapter.
    /// Previously stored paths missing from `urls` are reported superseded.
    pub fn upsert_chapter(
        &self,
        title_id: i64,
        slug: &str,
        name: &str,
        order: Option<i64>,
        server_id: i64,
        urls: &[String],
    ) -> Result<Upserted> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let now = timestamp(Utc::now());

        let exists: Option<i64> = tx
            .query_row(
                "SELECT id FROM titles WHERE id = ?",
                params![title_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(RepositoryError::NotFound(format!("title {}", title_id)));
        }

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM chapters WHERE title_id = ? AND slug = ?",
                params![title_id, slug],
                |row| row.get(0),
            )
            .optional()?;

        let chapter_id = match existing {
            Some(id) => {
                tx.execute(
                    r#"
                    UPDATE chapters SET name = ?, chapter_order = COALESCE(?, chapter_order), updated_at = ?
                    WHERE id = ?
                    "#,
                    params![name, order, now, id],
                )?;
                id
            }
            None => {
                let order = match order {
                    Some(order) => order,
                    None => tx.query_row(
                        "SELECT COALESCE(MAX(chapter_order) + 1, 0) FROM chapters WHERE title_id = ?",
                        params![title_id],
                        |row| row.get(0),
                    )?,
                };
                tx.execute(
                    r#"
                    INSERT INTO chapters (title_id, slug, name, chapter_order, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                    params![title_id, slug, name, order, now, now],
                )?;
                tx.last_insert_rowid()
            }
        };

        let previous: Option<String> = tx
            .query_row(
                "SELECT urls FROM chapter_contents WHERE chapter_id = ? AND server_id = ?",
                params![chapter_id, server_id],
                |row| row.get(0),
            )
            .optional()?;
        let superseded = match previous {
            Some(json) => serde_json::from_str::<Vec<String>>(&json)?
                .into_iter()
                .filter(|old| !urls.contains(old))
                .collect(),
            None => Vec::new(),
        };

        let urls_json = serde_json::to_string(urls)?;
        tx.execute(
            r#"
            INSERT INTO chapter_contents (chapter_id, server_id, urls, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(chapter_id, server_id) DO UPDATE SET urls = ?3, updated_at = ?4
            "#,
            params![chapter_id, server_id, urls_json, now],
        )?;
        tx.execute(
            "UPDATE titles SET updated_at = ? WHERE id = ?",
            params![now, title_id],
        )?;

        tx.commit()?;
        Ok(Upserted {
            id: chapter_id,
            superseded,
        })
    }

    pub fn get_title(&self, id: i64) -> Result<Option<TitleRecord>> {
        let conn = self.connect()?;
        let title = conn
            .query_row(
                "SELECT * FROM titles WHERE id = ?",
                params![id],
                row_to_title,
            )
            .optional()?;
        Ok(title)
    }

    pub fn find_title_by_slug(&self, slug: &str) -> Result<Option<TitleRecord>> {
        let conn = self.connect()?;
        let title = conn
            .query_row(
                "SELECT * FROM titles WHERE slug = ?",
                params![slug],
                row_to_title,
            )
            .optional()?;
        Ok(title)
    }

    pub fn count_titles(&self) -> Result<u64> {
        let conn = self.connect()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM titles", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Chapters of a title in reading order.
    pub fn list_chapters(&self, title_id: i64) -> Result<Vec<ChapterRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM chapters WHERE title_id = ? ORDER BY chapter_order ASC, id ASC",
        )?;
        let chapters = stmt
            .query_map(params![title_id], |row| {
                Ok(ChapterRecord {
                    id: row.get("id")?,
                    title_id: row.get("title_id")?,
                    slug: row.get("slug")?,
                    name: row.get("name")?,
                    order: row.get("chapter_order")?,
                    created_at: parse_datetime(&row.get::<_, String>("created_at")?),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(chapters)
    }

    /// Slugs of chapters already synced for a title.
    pub fn chapter_slugs(&self, title_id: i64) -> Result<HashSet<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT slug FROM chapters WHERE title_id = ?")?;
        let slugs = stmt
            .query_map(params![title_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(slugs)
    }

    pub fn chapter_content(
        &self,
        chapter_id: i64,
        server_id: i64,
    ) -> Result<Option<ChapterContentRecord>> {
        let conn = self.connect()?;
        let urls: Option<String> = conn
            .query_row(
                "SELECT urls FROM chapter_contents WHERE chapter_id = ? AND server_id = ?",
                params![chapter_id, server_id],
                |row| row.get(0),
            )
            .optional()?;
        match urls {
            Some(json) => Ok(Some(ChapterContentRecord {
                chapter_id,
                server_id,
                urls: serde_json::from_str(&json)?,
            })),
            None => Ok(None),
        }
    }

    /// Category names linked to a title, alphabetically.
    pub fn title_categories(&self, title_id: i64) -> Result<Vec<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.name FROM categories c
            JOIN title_categories tc ON tc.category_id = c.id
            WHERE tc.title_id = ?
            ORDER BY c.name COLLATE NOCASE
            "#,
        )?;
        let names = stmt
            .query_map(params![title_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn author_name(&self, author_id: i64) -> Result<Option<String>> {
        let conn = self.connect()?;
        let name = conn
            .query_row(
                "SELECT name FROM authors WHERE id = ?",
                params![author_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name)
    }
}

/// Link author and categories, skipping blank names.
fn link_metadata(conn: &Connection, title_id: i64, title: &TitleUpsert) -> Result<()> {
    if let Some(author) = title.author.as_deref().map(str::trim).filter(|a| !a.is_empty()) {
        conn.execute(
            "INSERT INTO authors (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
            params![author],
        )?;
        let author_id: i64 = conn.query_row(
            "SELECT id FROM authors WHERE name = ?",
            params![author],
            |row| row.get(0),
        )?;
        conn.execute(
            "UPDATE titles SET author_id = ? WHERE id = ?",
            params![author_id, title_id],
        )?;
    }

    for category in title
        .categories
        .iter()
        .map(|c| c.trim())
        .filter(|c| !c.is_empty())
    {
        conn.execute(
            "INSERT INTO categories (name) VALUES (?) ON CONFLICT(name) DO NOTHING",
            params![category],
        )?;
        let category_id: i64 = conn.query_row(
            "SELECT id FROM categories WHERE name = ?",
            params![category],
            |row| row.get(0),
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO title_categories (title_id, category_id) VALUES (?, ?)",
            params![title_id, category_id],
        )?;
    }
    Ok(())
}

fn row_to_title(row: &rusqlite::Row) -> rusqlite::Result<TitleRecord> {
    Ok(TitleRecord {
        id: row.get("id")?,
        name: row.get("name")?,
        slug: row.get("slug")?,
        description: row.get("description")?,
        cover_path: row.get("cover_path")?,
        status: row.get("status")?,
        owner_id: row.get("owner_id")?,
        author_id: row.get("author_id")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        updated_at: parse_datetime(&row.get::<_, String>("updated_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn title(name: &str, slug: &str) -> TitleUpsert {
        TitleUpsert {
            name: name.to_string(),
            slug: slug.to_string(),
            description: Some("<p>desc</p>".to_string()),
            cover_path: Some("covers/20260101-a.jpg".to_string()),
            status: "ongoing".to_string(),
            owner_id: 1,
            author: Some("Jane Doe".to_string()),
            categories: vec!["Action".to_string(), " ".to_string(), "Drama".to_string()],
        }
    }

    #[test]
    fn title_upsert_is_idempotent() {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.db")).unwrap();

        let a = repo.upsert_title(&title("Title X", "title-x")).unwrap().id;
        let b = repo.upsert_title(&title("Title X", "title-x")).unwrap().id;
        assert_eq!(a, b);
        assert_eq!(repo.count_titles().unwrap(), 1);

        let stored = repo.get_title(a).unwrap().unwrap();
        let author = repo.author_name(stored.author_id.unwrap()).unwrap();
        assert_eq!(author.as_deref(), Some("Jane Doe"));
        assert_eq!(repo.title_categories(a).unwrap(), vec!["Action", "Drama"]);
    }

    #[test]
    fn title_falls_back_to_trimmed_name() {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.db")).unwrap();

        let a = repo.upsert_title(&title("Title X", "title-x")).unwrap().id;
        let b = repo.upsert_title(&title("  title x ", "title-x-2")).unwrap().id;
        assert_eq!(a, b);
        assert_eq!(repo.get_title(a).unwrap().unwrap().slug, "title-x");
    }

    #[test]
    fn cover_is_kept_when_not_migrated() {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.db")).unwrap();

        let id = repo.upsert_title(&title("Title X", "title-x")).unwrap().id;
        let mut again = title("Title X", "title-x");
        again.cover_path = None;
        repo.upsert_title(&again).unwrap();
        assert_eq!(
            repo.get_title(id).unwrap().unwrap().cover_path.as_deref(),
            Some("covers/20260101-a.jpg")
        );
    }

    #[test]
    fn replaced_cover_is_reported_superseded() {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.db")).unwrap();

        let first = repo.upsert_title(&title("Title X", "title-x")).unwrap();
        assert!(first.superseded.is_empty());
        let same = repo.upsert_title(&title("Title X", "title-x")).unwrap();
        assert!(same.superseded.is_empty());

        let mut recrawled = title("Title X", "title-x");
        recrawled.cover_path = Some("covers/20260202-b.jpg".to_string());
        let replaced = repo.upsert_title(&recrawled).unwrap();
        assert_eq!(replaced.id, first.id);
        assert_eq!(replaced.superseded, vec!["covers/20260101-a.jpg"]);
    }

    #[test]
    fn chapter_order_is_preserved() {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.db")).unwrap();
        let title_id = repo.upsert_title(&title("Title X", "title-x")).unwrap().id;
        let urls = vec!["chapters/1.jpg".to_string()];

        let one = repo
            .upsert_chapter(title_id, "chapter-1", "Chapter 1", None, 1, &urls)
            .unwrap()
            .id;
        let two = repo
            .upsert_chapter(title_id, "chapter-2", "Chapter 2", None, 1, &urls)
            .unwrap()
            .id;
        let again = repo
            .upsert_chapter(title_id, "chapter-1", "Chapter 1", None, 1, &urls)
            .unwrap()
            .id;
        assert_eq!(one, again);

        let chapters = repo.list_chapters(title_id).unwrap();
        assert_eq!(chapters.len(), 2);
        assert_eq!((chapters[0].id, chapters[0].order), (one, 0));
        assert_eq!((chapters[1].id, chapters[1].order), (two, 1));

        repo.upsert_chapter(title_id, "chapter-1", "Chapter 1", Some(5), 1, &urls)
            .unwrap();
        let chapters = repo.list_chapters(title_id).unwrap();
        assert_eq!(chapters[1].id, one);
        assert_eq!(chapters[1].order, 5);
    }

    #[test]
    fn content_is_replaced_per_server() {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.db")).unwrap();
        let title_id = repo.upsert_title(&title("Title X", "title-x")).unwrap().id;

        let id = repo
            .upsert_chapter(title_id, "c1", "C1", None, 1, &["a.jpg".to_string()])
            .unwrap()
            .id;
        let replaced = repo
            .upsert_chapter(title_id, "c1", "C1", None, 1, &["b.jpg".to_string()])
            .unwrap();
        assert_eq!(replaced.superseded, vec!["a.jpg"]);
        let other_server = repo
            .upsert_chapter(title_id, "c1", "C1", None, 2, &["c.jpg".to_string()])
            .unwrap();
        assert!(other_server.superseded.is_empty());

        assert_eq!(repo.chapter_content(id, 1).unwrap().unwrap().urls, vec!["b.jpg"]);
        assert_eq!(repo.chapter_content(id, 2).unwrap().unwrap().urls, vec!["c.jpg"]);
    }

    #[test]
    fn chapter_for_missing_title_fails() {
        let dir = tempdir().unwrap();
        let repo = CatalogRepository::new(&dir.path().join("catalog.db")).unwrap();
        let err = repo
            .upsert_chapter(99, "c1", "C1", None, 1, &[])
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
