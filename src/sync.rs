//! Index sync manager.
//!
//! Turns committed catalog mutations into index writes so the search index
//! converges on the relational state. Every document written is a pure
//! function of the catalog at read time, and every write is an upsert keyed
//! by article id, so replaying any event leaves the index unchanged.
//!
//! Calls are synchronous with the mutating request: there is no queue, and
//! nothing waits for the engine to make a write visible to searches.
//!
//! | Event | Documents written |
//! |-------|-------------------|
//! | [`on_article_created`](IndexSyncManager::on_article_created) | one |
//! | [`on_articles_created_batch`](IndexSyncManager::on_articles_created_batch) | N in one upsert |
//! | [`on_tag_relabeled`](IndexSyncManager::on_tag_relabeled) | every article carrying the tag, re-read from the catalog |
//! | [`resync_article`](IndexSyncManager::resync_article) | one, re-read from the catalog |
//! | [`reindex_all`](IndexSyncManager::reindex_all) | all articles, paged |
//!
//! A failed write is returned as [`SyncError::IndexWrite`]. The catalog row
//! has already committed at that point; the index stays stale for those
//! articles until a later write or a reindex repairs it.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::catalog::CatalogStore;
use crate::engine::{SearchEngine, UpsertReceipt};
use crate::error::SyncError;
use crate::models::{Article, ArticleSummary, SearchDocument};

/// Totals from a full reindex.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReindexReport {
    pub documents: usize,
    pub batches: usize,
}

pub struct IndexSyncManager {
    engine: Arc<dyn SearchEngine>,
    catalog: Arc<dyn CatalogStore>,
}

impl IndexSyncManager {
    pub fn new(engine: Arc<dyn SearchEngine>, catalog: Arc<dyn CatalogStore>) -> Self {
        Self { engine, catalog }
    }

    /// Index a newly created article.
    pub async fn on_article_created(
        &self,
        article: &Article,
        author_name: &str,
        tag_labels: &[String],
    ) -> Result<UpsertReceipt, SyncError> {
        let doc = SearchDocument::build(article, author_name, tag_labels);
        self.write(vec![doc]).await
    }

    /// Index a batch of new articles with a single upsert.
    ///
    /// The engine reports success or failure for the whole call, so a failure
    /// names every article in the batch.
    pub async fn on_articles_created_batch(
        &self,
        articles: &[ArticleSummary],
    ) -> Result<UpsertReceipt, SyncError> {
        let docs = articles.iter().map(SearchDocument::from).collect();
        self.write(docs).await
    }

    /// Rewrite every document affected by a tag rename.
    ///
    /// Call after the rename has committed. The affected set is read fresh:
    /// every article carrying either label, plus any ids the caller captured
    /// while renaming. Each document is rebuilt from the article's full
    /// current state, not patched, so concurrent title or author changes are
    /// not overwritten with stale values. Rewriting an article that did not
    /// need it is harmless for the same reason.
    pub async fn on_tag_relabeled(
        &self,
        old_label: &str,
        new_label: &str,
        affected_article_ids: &[i64],
    ) -> Result<UpsertReceipt, SyncError> {
        let mut affected: BTreeMap<i64, ArticleSummary> = BTreeMap::new();
        let labels = if old_label == new_label {
            vec![new_label]
        } else {
            vec![new_label, old_label]
        };
        for label in labels {
            for article in self.catalog.find_articles_by_tag_label(label).await? {
                affected.insert(article.id, article);
            }
        }

        for id in affected_article_ids {
            if affected.contains_key(id) {
                continue;
            }
            // Gone since the rename: nothing left to project.
            if let Some(article) = self.catalog.get_article(*id).await? {
                affected.insert(article.id, article);
            }
        }

        tracing::debug!(
            old_label,
            new_label,
            documents = affected.len(),
            "tag relabel fan-out"
        );

        let docs = affected.values().map(SearchDocument::from).collect();
        self.write(docs).await
    }

    /// Rebuild one article's document from the catalog.
    pub async fn resync_article(&self, id: i64) -> Result<UpsertReceipt, SyncError> {
        let article = self
            .catalog
            .get_article(id)
            .await?
            .ok_or(SyncError::MissingArticle(id))?;
        self.write(vec![SearchDocument::from(&article)]).await
    }

    /// Recompute every document from the catalog, `batch_size` at a time.
    ///
    /// This is the repair path for drift left by failed writes. The first
    /// failing batch stops the pass; batches before it stay written.
    pub async fn reindex_all(&self, batch_size: usize) -> Result<ReindexReport, SyncError> {
        let batch_size = batch_size.max(1);
        let mut report = ReindexReport::default();
        let mut after_id = 0;

        loop {
            let page = self.catalog.list_articles(after_id, batch_size).await?;
            let Some(last) = page.last() else {
                break;
            };
            after_id = last.id;

            let receipt = self.on_articles_created_batch(&page).await?;
            report.documents += receipt.documents;
            report.batches += 1;

            if page.len() < batch_size {
                break;
            }
        }

        Ok(report)
    }

    async fn write(&self, docs: Vec<SearchDocument>) -> Result<UpsertReceipt, SyncError> {
        if docs.is_empty() {
            return Ok(UpsertReceipt {
                documents: 0,
                task_uid: None,
            });
        }
        self.engine
            .upsert(&docs)
            .await
            .map_err(|source| SyncError::IndexWrite {
                article_ids: docs.iter().map(|d| d.id).collect(),
                source,
            })
    }
}
