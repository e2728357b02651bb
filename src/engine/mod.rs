//! Search engine adapter abstraction.
//!
//! Defines the [`SearchEngine`] trait and its implementations:
//! - **[`MeilisearchEngine`]**: drives a Meilisearch server over HTTP.
//! - **[`InMemoryEngine`]**: in-process index for tests and single-node demos.
//!
//! Adapters carry no business logic and never retry. Every transport or
//! engine error is returned to the caller unchanged.
//!
//! # Index schema
//!
//! The schema is fixed and applied by [`SearchEngine::configure`]:
//!
//! | Role | Fields |
//! |------|--------|
//! | searchable | [`SEARCHABLE_FIELDS`] |
//! | filterable | [`FILTERABLE_FIELDS`] |
//! | sortable | [`SORTABLE_FIELDS`] |
//!
//! # Engine selection
//!
//! ```rust
//! # use catalog_search::config::EngineConfig;
//! # use catalog_search::engine::create_engine;
//! let config = EngineConfig { kind: "memory".to_string(), ..Default::default() };
//! let engine = create_engine(&config).unwrap();
//! assert_eq!(engine.name(), "memory");
//! ```

pub mod meilisearch;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::SearchDocument;

pub use self::meilisearch::MeilisearchEngine;
pub use self::memory::InMemoryEngine;

pub const PRIMARY_KEY: &str = "id";
pub const SEARCHABLE_FIELDS: [&str; 4] = ["title", "body", "author_name", "tags"];
pub const FILTERABLE_FIELDS: [&str; 2] = ["author_name", "tags"];
pub const SORTABLE_FIELDS: [&str; 2] = ["author_name", "title"];

/// A query in the shape the engine accepts verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineQuery {
    /// Free text; empty matches every document.
    pub text: String,
    /// Boolean predicate over filterable fields, e.g. `tags = "sale"`.
    pub filter: Option<String>,
    /// `field:asc` / `field:desc` pairs, most significant first.
    pub sort: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

/// Raw query result from the engine.
#[derive(Debug, Clone, Default)]
pub struct EngineHits {
    pub hits: Vec<SearchDocument>,
    pub estimated_total: u64,
}

/// Acknowledgement of a batch write.
///
/// Success is reported per call. Engines that apply writes asynchronously
/// return the task id they enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertReceipt {
    pub documents: usize,
    pub task_uid: Option<u64>,
}

/// Contract every search backend implements.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &str;

    /// Create the index if missing and apply the fixed schema. Idempotent.
    async fn configure(&self) -> Result<(), EngineError>;

    /// Insert or replace documents by id. Last write for an id wins.
    async fn upsert(&self, documents: &[SearchDocument]) -> Result<UpsertReceipt, EngineError>;

    /// Execute a read. No side effects.
    async fn query(&self, query: &EngineQuery) -> Result<EngineHits, EngineError>;
}

/// Instantiate the engine named by `config.kind`.
pub fn create_engine(config: &EngineConfig) -> anyhow::Result<Arc<dyn SearchEngine>> {
    match config.kind.as_str() {
        "meilisearch" => Ok(Arc::new(MeilisearchEngine::new(config)?)),
        "memory" => Ok(Arc::new(InMemoryEngine::new())),
        other => anyhow::bail!("Unknown engine kind: {}", other),
    }
}
