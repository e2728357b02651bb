//! SQLite-backed catalog.
//!
//! Reads implement [`CatalogStore`]. The inherent write methods are what the
//! HTTP mutation handlers call; each runs in one transaction so a committed
//! result is what the sync manager is then told about.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::collections::BTreeSet;

use super::CatalogStore;
use crate::models::{Article, ArticleSummary, Author, CreatedArticle, NewArticle, RenamedTag, Tag};

/// Columns shared by every summary query; one row per (article, tag) pair.
const SUMMARY_SELECT: &str = r#"
    SELECT a.id AS id, a.title AS title, a.body AS body, au.name AS author_name, t.label AS label
    FROM articles a
    JOIN authors au ON au.id = a.author_id
    LEFT JOIN article_tags x ON x.article_id = a.id
    LEFT JOIN tags t ON t.id = x.tag_id
"#;

pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ============ Authors ============

    pub async fn create_author(&self, name: &str) -> Result<Author> {
        let mut tx = self.pool.begin().await?;
        let author = insert_author(&mut tx, name).await?;
        tx.commit().await?;
        Ok(author)
    }

    pub async fn create_authors(&self, names: &[String]) -> Result<Vec<Author>> {
        let mut tx = self.pool.begin().await?;
        let mut authors = Vec::with_capacity(names.len());
        for name in names {
            authors.push(insert_author(&mut tx, name).await?);
        }
        tx.commit().await?;
        Ok(authors)
    }

    // ============ Tags ============

    pub async fn create_tag(&self, label: &str) -> Result<Tag> {
        let mut tx = self.pool.begin().await?;
        let tag = insert_tag(&mut tx, label).await?;
        tx.commit().await?;
        Ok(tag)
    }

    pub async fn create_tags(&self, labels: &[String]) -> Result<Vec<Tag>> {
        let mut tx = self.pool.begin().await?;
        let mut tags = Vec::with_capacity(labels.len());
        for label in labels {
            tags.push(insert_tag(&mut tx, label).await?);
        }
        tx.commit().await?;
        Ok(tags)
    }

    pub async fn list_tags(&self) -> Result<Vec<Tag>> {
        let rows = sqlx::query("SELECT id, label, created_at, updated_at FROM tags ORDER BY label")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(tag_from_row).collect())
    }

    pub async fn get_tag(&self, label: &str) -> Result<Option<Tag>> {
        let row = sqlx::query("SELECT id, label, created_at, updated_at FROM tags WHERE label = ?")
            .bind(label)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(tag_from_row))
    }

    /// Rename a tag in place. Returns `None` if `old_label` does not exist.
    pub async fn rename_tag(&self, old_label: &str, new_label: &str) -> Result<Option<RenamedTag>> {
        let new_label = normalize_label(new_label)?;
        let mut tx = self.pool.begin().await?;

        let tag_id: Option<i64> = sqlx::query_scalar("SELECT id FROM tags WHERE label = ?")
            .bind(old_label)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(tag_id) = tag_id else {
            return Ok(None);
        };

        if new_label != old_label {
            let taken: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM tags WHERE label = ?")
                .bind(&new_label)
                .fetch_one(&mut *tx)
                .await?;
            if taken {
                bail!("invalid rename: tag '{}' already exists", new_label);
            }
        }

        sqlx::query("UPDATE tags SET label = ?, updated_at = ? WHERE id = ?")
            .bind(&new_label)
            .bind(chrono::Utc::now().timestamp())
            .bind(tag_id)
            .execute(&mut *tx)
            .await?;

        let article_ids: Vec<i64> = sqlx::query_scalar(
            "SELECT article_id FROM article_tags WHERE tag_id = ? ORDER BY article_id",
        )
        .bind(tag_id)
        .fetch_all(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT id, label, created_at, updated_at FROM tags WHERE id = ?")
            .bind(tag_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(Some(RenamedTag {
            tag: tag_from_row(&row),
            old_label: old_label.to_string(),
            article_ids,
        }))
    }

    // ============ Articles ============

    pub async fn create_article(&self, new: &NewArticle) -> Result<CreatedArticle> {
        let author_name = self.get_author_name(new.author_id).await?;
        let mut tx = self.pool.begin().await?;
        let created = insert_article(&mut tx, new, author_name).await?;
        tx.commit().await?;
        Ok(created)
    }

    /// Insert several articles in one transaction: all commit or none do.
    pub async fn create_articles(&self, batch: &[NewArticle]) -> Result<Vec<CreatedArticle>> {
        let mut names = Vec::with_capacity(batch.len());
        for new in batch {
            names.push(self.get_author_name(new.author_id).await?);
        }

        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(batch.len());
        for (new, author_name) in batch.iter().zip(names) {
            created.push(insert_article(&mut tx, new, author_name).await?);
        }
        tx.commit().await?;
        Ok(created)
    }
}

#[async_trait]
impl CatalogStore for SqliteCatalog {
    async fn find_articles_by_tag_label(&self, label: &str) -> Result<Vec<ArticleSummary>> {
        let sql = format!(
            "{} WHERE a.id IN (
                SELECT x2.article_id FROM article_tags x2
                JOIN tags t2 ON t2.id = x2.tag_id
                WHERE t2.label = ?
            )
            ORDER BY a.id",
            SUMMARY_SELECT
        );
        let rows = sqlx::query(&sql).bind(label).fetch_all(&self.pool).await?;
        Ok(fold_summaries(&rows))
    }

    async fn get_author_name(&self, author_id: i64) -> Result<String> {
        let name: Option<String> = sqlx::query_scalar("SELECT name FROM authors WHERE id = ?")
            .bind(author_id)
            .fetch_optional(&self.pool)
            .await?;
        name.ok_or_else(|| anyhow::anyhow!("author {} not found", author_id))
    }

    async fn get_article(&self, id: i64) -> Result<Option<ArticleSummary>> {
        let sql = format!("{} WHERE a.id = ?", SUMMARY_SELECT);
        let rows = sqlx::query(&sql).bind(id).fetch_all(&self.pool).await?;
        Ok(fold_summaries(&rows).into_iter().next())
    }

    async fn list_articles(&self, after_id: i64, limit: usize) -> Result<Vec<ArticleSummary>> {
        let sql = format!(
            "{} WHERE a.id IN (
                SELECT id FROM articles WHERE id > ? ORDER BY id LIMIT ?
            )
            ORDER BY a.id",
            SUMMARY_SELECT
        );
        let rows = sqlx::query(&sql)
            .bind(after_id)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        Ok(fold_summaries(&rows))
    }
}

// ============ Helpers ============

fn normalize_label(label: &str) -> Result<String> {
    let label = label.trim();
    if label.is_empty() {
        bail!("tag label must not be empty");
    }
    Ok(label.to_string())
}

async fn insert_author(tx: &mut Transaction<'_, Sqlite>, name: &str) -> Result<Author> {
    let name = name.trim();
    if name.is_empty() {
        bail!("author name must not be empty");
    }
    let now = chrono::Utc::now().timestamp();
    let id = sqlx::query("INSERT INTO authors (name, created_at) VALUES (?, ?)")
        .bind(name)
        .bind(now)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("invalid author: '{}' could not be inserted", name))?
        .last_insert_rowid();
    Ok(Author {
        id,
        name: name.to_string(),
        created_at: now,
    })
}

async fn insert_tag(tx: &mut Transaction<'_, Sqlite>, label: &str) -> Result<Tag> {
    let label = normalize_label(label)?;
    let now = chrono::Utc::now().timestamp();
    let id = sqlx::query("INSERT INTO tags (label, created_at) VALUES (?, ?)")
        .bind(&label)
        .bind(now)
        .execute(&mut **tx)
        .await
        .with_context(|| format!("invalid tag: '{}' could not be inserted", label))?
        .last_insert_rowid();
    Ok(Tag {
        id,
        label,
        created_at: now,
        updated_at: None,
    })
}

/// Look up a tag by label, creating it if missing.
async fn ensure_tag(tx: &mut Transaction<'_, Sqlite>, label: &str) -> Result<i64> {
    let now = chrono::Utc::now().timestamp();
    sqlx::query("INSERT OR IGNORE INTO tags (label, created_at) VALUES (?, ?)")
        .bind(label)
        .bind(now)
        .execute(&mut **tx)
        .await?;
    let id: i64 = sqlx::query_scalar("SELECT id FROM tags WHERE label = ?")
        .bind(label)
        .fetch_one(&mut **tx)
        .await?;
    Ok(id)
}

async fn insert_article(
    tx: &mut Transaction<'_, Sqlite>,
    new: &NewArticle,
    author_name: String,
) -> Result<CreatedArticle> {
    if new.title.trim().is_empty() {
        bail!("article title must not be empty");
    }
    let now = chrono::Utc::now().timestamp();
    let id = sqlx::query(
        "INSERT INTO articles (title, body, author_id, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(&new.title)
    .bind(&new.body)
    .bind(new.author_id)
    .bind(now)
    .execute(&mut **tx)
    .await?
    .last_insert_rowid();

    let labels: BTreeSet<String> = new
        .tags
        .iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    for label in &labels {
        let tag_id = ensure_tag(tx, label).await?;
        sqlx::query("INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES (?, ?)")
            .bind(id)
            .bind(tag_id)
            .execute(&mut **tx)
            .await?;
    }

    Ok(CreatedArticle {
        article: Article {
            id,
            title: new.title.clone(),
            body: new.body.clone(),
            author_id: new.author_id,
            created_at: now,
        },
        author_name,
        tags: labels.into_iter().collect(),
    })
}

fn tag_from_row(row: &SqliteRow) -> Tag {
    Tag {
        id: row.get("id"),
        label: row.get("label"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Collapse (article, tag) rows, ordered by article id, into summaries.
fn fold_summaries(rows: &[SqliteRow]) -> Vec<ArticleSummary> {
    let mut out: Vec<ArticleSummary> = Vec::new();
    for row in rows {
        let id: i64 = row.get("id");
        let label: Option<String> = row.get("label");
        match out.last_mut() {
            Some(last) if last.id == id => {
                if let Some(label) = label {
                    last.tags.insert(label);
                }
            }
            _ => out.push(ArticleSummary {
                id,
                title: row.get("title"),
                body: row.get("body"),
                author_name: row.get("author_name"),
                tags: label.into_iter().collect(),
            }),
        }
    }
    out
}
