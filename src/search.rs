//! Query translation and response shaping.
//!
//! [`search`] passes the caller's request to the engine as-is (no query
//! language of our own) and normalizes the result into [`SearchResponse`].
//! On failure the response shell, with the echoed query text and requested
//! page but no hits, travels inside the [`SearchError`].

use serde::Serialize;

use crate::engine::{EngineQuery, SearchEngine};
use crate::error::SearchError;
use crate::models::SearchDocument;

/// A search request after HTTP binding and limit clamping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchParams {
    pub query_text: String,
    pub filter: Option<String>,
    /// `field:asc` / `field:desc` pairs.
    pub sort: Vec<String>,
    pub limit: usize,
    pub offset: usize,
}

impl SearchParams {
    pub fn new(query_text: impl Into<String>, limit: usize) -> Self {
        Self {
            query_text: query_text.into(),
            limit,
            ..Default::default()
        }
    }

    fn to_engine_query(&self) -> EngineQuery {
        EngineQuery {
            text: self.query_text.clone(),
            filter: self
                .filter
                .as_ref()
                .map(|f| f.trim().to_string())
                .filter(|f| !f.is_empty()),
            sort: self.sort.clone(),
            limit: self.limit,
            offset: self.offset,
        }
    }
}

/// Stable response contract for the search endpoint.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchResponse {
    pub hits: Vec<SearchDocument>,
    pub offset: usize,
    pub limit: usize,
    pub estimated_total: u64,
    /// The query text exactly as the caller sent it.
    pub query: String,
}

impl SearchResponse {
    /// An empty response that still echoes the request.
    pub fn shell(params: &SearchParams) -> Self {
        Self {
            hits: Vec::new(),
            offset: params.offset,
            limit: params.limit,
            estimated_total: 0,
            query: params.query_text.clone(),
        }
    }
}

/// Run one query against the engine.
pub async fn search(
    engine: &dyn SearchEngine,
    params: &SearchParams,
) -> Result<SearchResponse, SearchError> {
    match engine.query(&params.to_engine_query()).await {
        Ok(result) => Ok(SearchResponse {
            hits: result.hits,
            offset: params.offset,
            limit: params.limit,
            estimated_total: result.estimated_total,
            query: params.query_text.clone(),
        }),
        Err(source) => Err(SearchError {
            response: SearchResponse::shell(params),
            source,
        }),
    }
}

/// Split a comma-separated sort list (`title:asc,author_name:desc`).
pub fn parse_sort_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
