//! In-process [`SearchEngine`] for tests and single-node demos.
//!
//! Documents live in a `BTreeMap` behind a `RwLock`; each upsert replaces
//! whole documents under one write lock, so readers never observe a
//! half-applied batch.
//!
//! Matching is case-insensitive term containment over the searchable fields:
//! every whitespace-separated query term must appear in at least one field.
//! Filters support `field = value` and `field != value` clauses joined by
//! `AND` / `OR` (`AND` binds tighter). Values may be quoted.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::RwLock;

use async_trait::async_trait;

use super::{
    EngineHits, EngineQuery, SearchEngine, UpsertReceipt, FILTERABLE_FIELDS, SORTABLE_FIELDS,
};
use crate::error::EngineError;
use crate::models::SearchDocument;

pub struct InMemoryEngine {
    docs: RwLock<BTreeMap<i64, SearchDocument>>,
    configured: AtomicBool,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    upsert_calls: AtomicUsize,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            docs: RwLock::new(BTreeMap::new()),
            configured: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            upsert_calls: AtomicUsize::new(0),
        }
    }

    /// Make every following upsert fail with [`EngineError::Unavailable`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, AtomicOrdering::SeqCst);
    }

    /// Make every following query fail with [`EngineError::Unavailable`].
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, AtomicOrdering::SeqCst);
    }

    pub fn is_configured(&self) -> bool {
        self.configured.load(AtomicOrdering::SeqCst)
    }

    /// Number of upsert calls that reached the engine, failed or not.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(AtomicOrdering::SeqCst)
    }

    pub fn get(&self, id: i64) -> Option<SearchDocument> {
        self.read().get(&id).cloned()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<i64, SearchDocument>> {
        self.docs.read().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchEngine for InMemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    async fn configure(&self) -> Result<(), EngineError> {
        self.configured.store(true, AtomicOrdering::SeqCst);
        Ok(())
    }

    async fn upsert(&self, documents: &[SearchDocument]) -> Result<UpsertReceipt, EngineError> {
        self.upsert_calls.fetch_add(1, AtomicOrdering::SeqCst);
        if self.fail_writes.load(AtomicOrdering::SeqCst) {
            return Err(EngineError::Unavailable("writes disabled".to_string()));
        }
        let mut docs = self.docs.write().unwrap_or_else(|e| e.into_inner());
        for doc in documents {
            docs.insert(doc.id, doc.clone());
        }
        Ok(UpsertReceipt {
            documents: documents.len(),
            task_uid: None,
        })
    }

    async fn query(&self, query: &EngineQuery) -> Result<EngineHits, EngineError> {
        if self.fail_reads.load(AtomicOrdering::SeqCst) {
            return Err(EngineError::Unavailable("reads disabled".to_string()));
        }

        let filter = match query.filter.as_deref() {
            Some(expr) if !expr.trim().is_empty() => Some(Filter::parse(expr)?),
            _ => None,
        };
        let sort = parse_sort(&query.sort)?;
        let terms: Vec<String> = query
            .text
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();

        let mut matched: Vec<SearchDocument> = self
            .read()
            .values()
            .filter(|doc| terms.iter().all(|t| matches_term(doc, t)))
            .filter(|doc| filter.as_ref().map_or(true, |f| f.matches(doc)))
            .cloned()
            .collect();

        if !sort.is_empty() {
            matched.sort_by(|a, b| {
                sort.iter()
                    .map(|(field, desc)| {
                        let ord = sort_key(a, field).cmp(sort_key(b, field));
                        if *desc {
                            ord.reverse()
                        } else {
                            ord
                        }
                    })
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            });
        }

        let estimated_total = matched.len() as u64;
        let hits = matched
            .into_iter()
            .skip(query.offset)
            .take(query.limit)
            .collect();

        Ok(EngineHits {
            hits,
            estimated_total,
        })
    }
}

fn matches_term(doc: &SearchDocument, term: &str) -> bool {
    doc.title.to_lowercase().contains(term)
        || doc.body.to_lowercase().contains(term)
        || doc.author_name.to_lowercase().contains(term)
        || doc.tags.iter().any(|t| t.to_lowercase().contains(term))
}

fn sort_key<'a>(doc: &'a SearchDocument, field: &str) -> &'a str {
    match field {
        "author_name" => &doc.author_name,
        _ => &doc.title,
    }
}

fn parse_sort(sort: &[String]) -> Result<Vec<(String, bool)>, EngineError> {
    sort.iter()
        .map(|s| {
            let (field, dir) = s.split_once(':').unwrap_or((s.as_str(), "asc"));
            let field = field.trim();
            if !SORTABLE_FIELDS.contains(&field) {
                return Err(EngineError::InvalidQuery(format!(
                    "attribute `{}` is not sortable",
                    field
                )));
            }
            match dir.trim() {
                "asc" => Ok((field.to_string(), false)),
                "desc" => Ok((field.to_string(), true)),
                other => Err(EngineError::InvalidQuery(format!(
                    "invalid sort direction `{}`",
                    other
                ))),
            }
        })
        .collect()
}

/// Disjunction of conjunctions of equality clauses.
#[derive(Debug)]
struct Filter {
    any_of: Vec<Vec<Clause>>,
}

#[derive(Debug)]
struct Clause {
    field: String,
    value: String,
    negated: bool,
}

impl Filter {
    fn parse(expr: &str) -> Result<Self, EngineError> {
        let any_of = expr
            .split(" OR ")
            .map(|group| group.split(" AND ").map(Clause::parse).collect())
            .collect::<Result<Vec<Vec<Clause>>, EngineError>>()?;
        Ok(Self { any_of })
    }

    fn matches(&self, doc: &SearchDocument) -> bool {
        self.any_of
            .iter()
            .any(|all| all.iter().all(|c| c.matches(doc)))
    }
}

impl Clause {
    fn parse(raw: &str) -> Result<Self, EngineError> {
        let (field, value, negated) = if let Some((f, v)) = raw.split_once("!=") {
            (f, v, true)
        } else if let Some((f, v)) = raw.split_once('=') {
            (f, v, false)
        } else {
            return Err(EngineError::InvalidQuery(format!(
                "expected `field = value`, got `{}`",
                raw.trim()
            )));
        };

        let field = field.trim();
        if !FILTERABLE_FIELDS.contains(&field) {
            return Err(EngineError::InvalidQuery(format!(
                "attribute `{}` is not filterable",
                field
            )));
        }

        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
            .unwrap_or(value);

        Ok(Self {
            field: field.to_string(),
            value: value.to_string(),
            negated,
        })
    }

    fn matches(&self, doc: &SearchDocument) -> bool {
        let hit = match self.field.as_str() {
            "author_name" => doc.author_name == self.value,
            "tags" => doc.tags.contains(&self.value),
            _ => false,
        };
        hit != self.negated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn doc(id: i64, title: &str, author: &str, tags: &[&str]) -> SearchDocument {
        SearchDocument {
            id,
            title: title.to_string(),
            body: String::new(),
            author_name: author.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        }
    }

    fn query(text: &str) -> EngineQuery {
        EngineQuery {
            text: text.to_string(),
            limit: 20,
            ..Default::default()
        }
    }

    async fn seeded() -> InMemoryEngine {
        let engine = InMemoryEngine::new();
        engine
            .upsert(&[
                doc(1, "Red Coat", "Ada", &["sale", "winter"]),
                doc(2, "Blue Scarf", "Grace", &["winter"]),
                doc(3, "Green Coat", "Grace", &["sale"]),
            ])
            .await
            .unwrap();
        engine
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let engine = seeded().await;
        engine
            .upsert(&[doc(1, "Red Coat v2", "Ada", &[])])
            .await
            .unwrap();
        assert_eq!(engine.len(), 3);
        assert_eq!(engine.get(1).unwrap().title, "Red Coat v2");
    }

    #[tokio::test]
    async fn test_text_match_is_case_insensitive() {
        let engine = seeded().await;
        let hits = engine.query(&query("coat")).await.unwrap();
        let ids: Vec<i64> = hits.hits.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(hits.estimated_total, 2);
    }

    #[tokio::test]
    async fn test_filter_and_or() {
        let engine = seeded().await;
        let mut q = query("");
        q.filter = Some("tags = \"sale\" AND author_name = Grace".to_string());
        let hits = engine.query(&q).await.unwrap();
        assert_eq!(hits.hits.len(), 1);
        assert_eq!(hits.hits[0].id, 3);

        q.filter = Some("author_name = 'Ada' OR tags != winter".to_string());
        let ids: Vec<i64> = engine
            .query(&q)
            .await
            .unwrap()
            .hits
            .iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn test_filter_rejects_unfilterable_field() {
        let engine = seeded().await;
        let mut q = query("");
        q.filter = Some("title = Coat".to_string());
        let err = engine.query(&q).await.unwrap_err();
        assert!(err.is_client_error());
    }

    #[tokio::test]
    async fn test_sort_and_paginate() {
        let engine = seeded().await;
        let mut q = query("");
        q.sort = vec!["title:desc".to_string()];
        q.limit = 2;
        q.offset = 1;
        let hits = engine.query(&q).await.unwrap();
        let titles: Vec<&str> = hits.hits.iter().map(|d| d.title.as_str()).collect();
        assert_eq!(titles, vec!["Green Coat", "Blue Scarf"]);
        assert_eq!(hits.estimated_total, 3);

        q.sort = vec!["body:asc".to_string()];
        assert!(engine.query(&q).await.is_err());
    }

    #[tokio::test]
    async fn test_failure_switches() {
        let engine = seeded().await;
        engine.set_fail_reads(true);
        assert!(matches!(
            engine.query(&query("")).await,
            Err(EngineError::Unavailable(_))
        ));
        engine.set_fail_writes(true);
        assert!(engine.upsert(&[doc(9, "x", "y", &[])]).await.is_err());
        assert!(engine.get(9).is_none());
        assert_eq!(engine.upsert_calls(), 2);
    }
}
