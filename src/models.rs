//! Core data models used throughout the catalog.
//!
//! Relational rows ([`Author`], [`Tag`], [`Article`]) are owned by the
//! catalog store. [`SearchDocument`] is the denormalized projection that the
//! search engine holds; it is only ever produced by [`SearchDocument::build`]
//! from the current relational state of one article.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// An author row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
    pub created_at: i64,
}

/// A tag row. Identity is the unique `label`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub label: String,
    pub created_at: i64,
    pub updated_at: Option<i64>,
}

/// An article row as stored, without its author name or tags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub author_id: i64,
    pub created_at: i64,
}

/// An article joined with its author name and current tag labels.
///
/// This is everything needed to materialize a [`SearchDocument`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleSummary {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub author_name: String,
    pub tags: BTreeSet<String>,
}

/// Input for creating an article. Tags are created on demand.
#[derive(Debug, Clone, Deserialize)]
pub struct NewArticle {
    pub title: String,
    pub body: String,
    pub author_id: i64,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// The committed result of an article insert.
#[derive(Debug, Clone, Serialize)]
pub struct CreatedArticle {
    pub article: Article,
    pub author_name: String,
    pub tags: Vec<String>,
}

impl CreatedArticle {
    pub fn summary(&self) -> ArticleSummary {
        ArticleSummary {
            id: self.article.id,
            title: self.article.title.clone(),
            body: self.article.body.clone(),
            author_name: self.author_name.clone(),
            tags: collect_labels(&self.tags),
        }
    }
}

/// The committed result of a tag rename.
#[derive(Debug, Clone, Serialize)]
pub struct RenamedTag {
    pub tag: Tag,
    pub old_label: String,
    /// Articles linked to the tag at rename time.
    pub article_ids: Vec<i64>,
}

/// A document as held in the search index.
///
/// The engine schema is fixed: `title`, `body`, `author_name` and `tags` are
/// searchable; `author_name` and `tags` are filterable; `author_name` and
/// `title` are sortable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchDocument {
    pub id: i64,
    pub title: String,
    pub body: String,
    pub author_name: String,
    pub tags: BTreeSet<String>,
}

impl SearchDocument {
    /// Build the document for one article from its relational fields.
    ///
    /// Blank labels are dropped; duplicates collapse because the tag set is
    /// ordered and unique.
    pub fn build<I, S>(article: &Article, author_name: &str, tag_labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            id: article.id,
            title: article.title.clone(),
            body: article.body.clone(),
            author_name: author_name.to_string(),
            tags: collect_labels(tag_labels),
        }
    }
}

impl From<&ArticleSummary> for SearchDocument {
    fn from(summary: &ArticleSummary) -> Self {
        Self {
            id: summary.id,
            title: summary.title.clone(),
            body: summary.body.clone(),
            author_name: summary.author_name.clone(),
            tags: collect_labels(&summary.tags),
        }
    }
}

fn collect_labels<I, S>(labels: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    labels
        .into_iter()
        .map(|l| l.as_ref().trim().to_string())
        .filter(|l| !l.is_empty())
        .collect()
}
