//! In-memory [`CatalogStore`] for tests and embedding.
//!
//! Mirrors the write methods of [`SqliteCatalog`](super::sqlite::SqliteCatalog)
//! closely enough to drive the sync manager without a database file.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::CatalogStore;
use crate::models::{Article, ArticleSummary, Author, CreatedArticle, NewArticle, RenamedTag, Tag};

#[derive(Default)]
struct State {
    authors: BTreeMap<i64, Author>,
    tags: BTreeMap<i64, Tag>,
    articles: BTreeMap<i64, Article>,
    /// (article_id, tag_id)
    links: BTreeSet<(i64, i64)>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn tag_id(&self, label: &str) -> Option<i64> {
        self.tags.values().find(|t| t.label == label).map(|t| t.id)
    }

    fn summary(&self, article: &Article) -> ArticleSummary {
        let author_name = self
            .authors
            .get(&article.author_id)
            .map(|a| a.name.clone())
            .unwrap_or_default();
        let tags = self
            .links
            .range((article.id, i64::MIN)..=(article.id, i64::MAX))
            .filter_map(|(_, tag_id)| self.tags.get(tag_id))
            .map(|t| t.label.clone())
            .collect();
        ArticleSummary {
            id: article.id,
            title: article.title.clone(),
            body: article.body.clone(),
            author_name,
            tags,
        }
    }
}

/// In-memory catalog.
pub struct InMemoryCatalog {
    state: RwLock<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub fn create_author(&self, name: &str) -> Result<Author> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.authors.values().any(|a| a.name == name) {
            bail!("invalid author: '{}' already exists", name);
        }
        let author = Author {
            id: state.next_id(),
            name: name.to_string(),
            created_at: chrono::Utc::now().timestamp(),
        };
        state.authors.insert(author.id, author.clone());
        Ok(author)
    }

    pub fn create_tag(&self, label: &str) -> Result<Tag> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        if state.tag_id(label).is_some() {
            bail!("invalid tag: '{}' already exists", label);
        }
        let tag = Tag {
            id: state.next_id(),
            label: label.to_string(),
            created_at: chrono::Utc::now().timestamp(),
            updated_at: None,
        };
        state.tags.insert(tag.id, tag.clone());
        Ok(tag)
    }

    pub fn create_article(&self, new: &NewArticle) -> Result<CreatedArticle> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let author_name = match state.authors.get(&new.author_id) {
            Some(a) => a.name.clone(),
            None => bail!("author {} not found", new.author_id),
        };
        let article = Article {
            id: state.next_id(),
            title: new.title.clone(),
            body: new.body.clone(),
            author_id: new.author_id,
            created_at: chrono::Utc::now().timestamp(),
        };
        let labels: BTreeSet<String> = new
            .tags
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        for label in &labels {
            let tag_id = match state.tag_id(label) {
                Some(id) => id,
                None => {
                    let id = state.next_id();
                    state.tags.insert(
                        id,
                        Tag {
                            id,
                            label: label.clone(),
                            created_at: article.created_at,
                            updated_at: None,
                        },
                    );
                    id
                }
            };
            state.links.insert((article.id, tag_id));
        }
        state.articles.insert(article.id, article.clone());
        Ok(CreatedArticle {
            article,
            author_name,
            tags: labels.into_iter().collect(),
        })
    }

    /// Overwrite an article's title and body without notifying anyone.
    pub fn update_article(&self, id: i64, title: &str, body: &str) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        match state.articles.get_mut(&id) {
            Some(a) => {
                a.title = title.to_string();
                a.body = body.to_string();
                Ok(())
            }
            None => bail!("article {} not found", id),
        }
    }

    pub fn rename_tag(&self, old_label: &str, new_label: &str) -> Result<Option<RenamedTag>> {
        let mut state = self.state.write().unwrap_or_else(|e| e.into_inner());
        let Some(tag_id) = state.tag_id(old_label) else {
            return Ok(None);
        };
        if new_label != old_label && state.tag_id(new_label).is_some() {
            bail!("invalid rename: tag '{}' already exists", new_label);
        }
        let article_ids: Vec<i64> = state
            .links
            .iter()
            .filter(|(_, t)| *t == tag_id)
            .map(|(a, _)| *a)
            .collect();
        let tag = match state.tags.get_mut(&tag_id) {
            Some(tag) => {
                tag.label = new_label.to_string();
                tag.updated_at = Some(chrono::Utc::now().timestamp());
                tag.clone()
            }
            None => return Ok(None),
        };
        Ok(Some(RenamedTag {
            tag,
            old_label: old_label.to_string(),
            article_ids,
        }))
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for InMemoryCatalog {
    async fn find_articles_by_tag_label(&self, label: &str) -> Result<Vec<ArticleSummary>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        let Some(tag_id) = state.tag_id(label) else {
            return Ok(Vec::new());
        };
        Ok(state
            .articles
            .values()
            .filter(|a| state.links.contains(&(a.id, tag_id)))
            .map(|a| state.summary(a))
            .collect())
    }

    async fn get_author_name(&self, author_id: i64) -> Result<String> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        state
            .authors
            .get(&author_id)
            .map(|a| a.name.clone())
            .ok_or_else(|| anyhow::anyhow!("author {} not found", author_id))
    }

    async fn get_article(&self, id: i64) -> Result<Option<ArticleSummary>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state.articles.get(&id).map(|a| state.summary(a)))
    }

    async fn list_articles(&self, after_id: i64, limit: usize) -> Result<Vec<ArticleSummary>> {
        let state = self.state.read().unwrap_or_else(|e| e.into_inner());
        Ok(state
            .articles
            .range(after_id.saturating_add(1)..)
            .take(limit)
            .map(|(_, a)| state.summary(a))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_article(author_id: i64, title: &str, tags: &[&str]) -> NewArticle {
        NewArticle {
            title: title.to_string(),
            body: format!("{} body", title),
            author_id,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn test_find_by_label_sees_rename() {
        let catalog = InMemoryCatalog::new();
        let ada = catalog.create_author("Ada").unwrap();
        let a = catalog
            .create_article(&new_article(ada.id, "Coat", &["sale", "winter"]))
            .unwrap();
        catalog
            .create_article(&new_article(ada.id, "Hat", &["winter"]))
            .unwrap();

        let sale = catalog.find_articles_by_tag_label("sale").await.unwrap();
        assert_eq!(sale.len(), 1);
        assert_eq!(sale[0].id, a.article.id);
        assert_eq!(sale[0].author_name, "Ada");

        let renamed = catalog.rename_tag("sale", "clearance").unwrap().unwrap();
        assert_eq!(renamed.article_ids, vec![a.article.id]);
        assert!(catalog.find_articles_by_tag_label("sale").await.unwrap().is_empty());
        let clearance = catalog.find_articles_by_tag_label("clearance").await.unwrap();
        assert!(clearance[0].tags.contains("clearance"));
        assert!(clearance[0].tags.contains("winter"));
    }

    #[tokio::test]
    async fn test_list_articles_pages_by_id() {
        let catalog = InMemoryCatalog::new();
        let ada = catalog.create_author("Ada").unwrap();
        let ids: Vec<i64> = (0..5)
            .map(|i| {
                catalog
                    .create_article(&new_article(ada.id, &format!("A{}", i), &[]))
                    .unwrap()
                    .article
                    .id
            })
            .collect();

        let first = catalog.list_articles(0, 2).await.unwrap();
        assert_eq!(first.iter().map(|a| a.id).collect::<Vec<_>>(), ids[..2]);
        let rest = catalog.list_articles(first[1].id, 10).await.unwrap();
        assert_eq!(rest.len(), 3);
    }

    #[test]
    fn test_rename_to_existing_label_fails() {
        let catalog = InMemoryCatalog::new();
        catalog.create_tag("sale").unwrap();
        catalog.create_tag("clearance").unwrap();
        assert!(catalog.rename_tag("sale", "clearance").is_err());
        assert!(catalog.rename_tag("missing", "x").unwrap().is_none());
    }
}
