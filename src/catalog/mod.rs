//! Relational catalog abstraction.
//!
//! The [`CatalogStore`] trait is the read contract the index sync manager
//! needs from the relational source of truth. It never writes through this
//! trait; writes go through the concrete stores' inherent methods, called by
//! the mutation handlers before they notify the sync manager.
//!
//! | Implementation | Backing |
//! |----------------|---------|
//! | [`sqlite::SqliteCatalog`] | SQLite via `sqlx` |
//! | [`memory::InMemoryCatalog`] | `BTreeMap`s behind a `RwLock` |

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::ArticleSummary;

/// Read access to articles joined with their author name and tags.
///
/// Every method reads the current committed state; nothing is cached.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// All articles currently tagged with `label`, ordered by id.
    async fn find_articles_by_tag_label(&self, label: &str) -> Result<Vec<ArticleSummary>>;

    /// The name of an author. Errors if the author does not exist.
    async fn get_author_name(&self, author_id: i64) -> Result<String>;

    /// One article, or `None` if it does not exist.
    async fn get_article(&self, id: i64) -> Result<Option<ArticleSummary>>;

    /// Up to `limit` articles with `id > after_id`, ordered by id.
    async fn list_articles(&self, after_id: i64, limit: usize) -> Result<Vec<ArticleSummary>>;
}
