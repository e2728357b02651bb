//! Error types for the search core.
//!
//! Three families, matching the failure points of the system:
//!
//! | Type | Raised by | Meaning |
//! |------|-----------|---------|
//! | [`EngineError`] | search engine adapters | transport, API or task failure |
//! | [`SyncError`] | [`IndexSyncManager`](crate::sync::IndexSyncManager) | index write failed after the relational write committed |
//! | [`SearchError`] | [`search`](crate::search::search) | query failed; carries the response shell |
//!
//! Admission rejection is not an error and has no variant here.

use thiserror::Error;

use crate::search::SearchResponse;

/// Errors returned by a [`SearchEngine`](crate::engine::SearchEngine).
///
/// Adapters never retry; whatever the engine reports is passed through.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The HTTP request could not be sent or the response not read.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The engine answered with a non-success status.
    #[error("engine error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    /// The engine answered with a body we could not decode.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// An asynchronous engine task finished in the failed state.
    #[error("engine task {uid} failed: {message}")]
    Task { uid: u64, message: String },

    /// An asynchronous engine task did not finish in time.
    #[error("engine task {uid} did not finish within {secs}s")]
    TaskTimeout { uid: u64, secs: u64 },

    /// The filter or sort expression was rejected.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The engine is not reachable or refuses work.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// True when the failure is the caller's fault (bad filter or sort).
    pub fn is_client_error(&self) -> bool {
        match self {
            Self::InvalidQuery(_) => true,
            Self::Api { status, .. } => (400..500).contains(status),
            _ => false,
        }
    }
}

/// Errors from the index sync manager.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The relational write already committed but the index write failed.
    ///
    /// The listed articles are stale in the index until the next successful
    /// write for them or a full reindex.
    #[error("index write failed for {} article(s): {source}", article_ids.len())]
    IndexWrite {
        article_ids: Vec<i64>,
        #[source]
        source: EngineError,
    },

    /// Reading the relational state needed to build documents failed.
    #[error("catalog read failed: {0}")]
    Catalog(#[from] anyhow::Error),

    /// An article named in an event no longer exists in the catalog.
    #[error("article {0} not found in catalog")]
    MissingArticle(i64),
}

/// A failed search, still carrying a response shell for diagnostics.
#[derive(Debug, Error)]
#[error("search for {:?} failed: {source}", response.query)]
pub struct SearchError {
    /// Response with the echoed query text and requested page, but no hits.
    pub response: SearchResponse,
    #[source]
    pub source: EngineError,
}
