//! Meilisearch adapter.
//!
//! Talks to the Meilisearch HTTP API with `reqwest`:
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | index lookup | `GET /indexes/{uid}` |
//! | index create | `POST /indexes` |
//! | schema | `PATCH /indexes/{uid}/settings` |
//! | upsert | `POST /indexes/{uid}/documents?primaryKey=id` |
//! | query | `POST /indexes/{uid}/search` |
//! | task status | `GET /tasks/{uid}` |
//!
//! Writes in Meilisearch are asynchronous tasks. `configure` waits for its
//! tasks because startup must fail if the schema cannot be applied. `upsert`
//! returns as soon as the task is enqueued unless `wait_for_writes` is set.
//! Task failures are reported for the whole batch; Meilisearch has no
//! per-document result.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{
    EngineHits, EngineQuery, SearchEngine, UpsertReceipt, FILTERABLE_FIELDS, PRIMARY_KEY,
    SEARCHABLE_FIELDS, SORTABLE_FIELDS,
};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::models::SearchDocument;

/// Poll interval bounds for task status.
const TASK_POLL_START: Duration = Duration::from_millis(25);
const TASK_POLL_MAX: Duration = Duration::from_millis(500);

pub struct MeilisearchEngine {
    client: reqwest::Client,
    host: String,
    index: String,
    api_key: Option<String>,
    task_timeout: Duration,
    wait_for_writes: bool,
}

/// Body returned when a task is enqueued.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TaskInfo {
    task_uid: u64,
}

#[derive(Debug, Deserialize)]
struct Task {
    uid: u64,
    status: String,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchResult {
    hits: Vec<SearchDocument>,
    #[serde(default)]
    estimated_total_hits: Option<u64>,
    #[serde(default)]
    total_hits: Option<u64>,
}

impl MeilisearchEngine {
    /// Build the adapter. No request is made until [`SearchEngine::configure`].
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            host: config.host.trim_end_matches('/').to_string(),
            index: config.index.clone(),
            api_key: config.resolved_api_key(),
            task_timeout: Duration::from_secs(config.task_timeout_secs),
            wait_for_writes: config.wait_for_writes,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.host, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let rb = self.client.request(method, self.url(path));
        match &self.api_key {
            Some(key) => rb.bearer_auth(key),
            None => rb,
        }
    }

    async fn send<T: DeserializeOwned>(&self, rb: RequestBuilder) -> Result<T, EngineError> {
        let response = rb.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(api_error(status, &bytes));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Poll a task until it leaves the queue.
    async fn wait_for_task(&self, uid: u64) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + self.task_timeout;
        let mut delay = TASK_POLL_START;

        loop {
            let task: Task = self
                .send(self.request(Method::GET, &format!("/tasks/{}", uid)))
                .await?;

            match task.status.as_str() {
                "succeeded" => return Ok(()),
                "failed" | "canceled" => {
                    let message = task
                        .error
                        .map(|e| format!("{} ({})", e.message, e.code))
                        .unwrap_or_else(|| task.status.clone());
                    return Err(EngineError::Task {
                        uid: task.uid,
                        message,
                    });
                }
                _ => {}
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(EngineError::TaskTimeout {
                    uid,
                    secs: self.task_timeout.as_secs(),
                });
            }
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(TASK_POLL_MAX);
        }
    }

    async fn ensure_index(&self) -> Result<(), EngineError> {
        let path = format!("/indexes/{}", self.index);
        let response = self.request(Method::GET, &path).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status != StatusCode::NOT_FOUND {
            let bytes = response.bytes().await?;
            return Err(api_error(status, &bytes));
        }

        let info: TaskInfo = self
            .send(self.request(Method::POST, "/indexes").json(&serde_json::json!({
                "uid": self.index,
                "primaryKey": PRIMARY_KEY,
            })))
            .await?;

        match self.wait_for_task(info.task_uid).await {
            // Another process created it between our GET and POST.
            Err(EngineError::Task { message, .. }) if message.contains("index_already_exists") => {
                Ok(())
            }
            other => other,
        }
    }
}

#[async_trait]
impl SearchEngine for MeilisearchEngine {
    fn name(&self) -> &str {
        "meilisearch"
    }

    async fn configure(&self) -> Result<(), EngineError> {
        self.ensure_index().await?;

        let info: TaskInfo = self
            .send(
                self.request(Method::PATCH, &format!("/indexes/{}/settings", self.index))
                    .json(&serde_json::json!({
                        "searchableAttributes": SEARCHABLE_FIELDS,
                        "filterableAttributes": FILTERABLE_FIELDS,
                        "sortableAttributes": SORTABLE_FIELDS,
                    })),
            )
            .await?;
        self.wait_for_task(info.task_uid).await
    }

    async fn upsert(&self, documents: &[SearchDocument]) -> Result<UpsertReceipt, EngineError> {
        if documents.is_empty() {
            return Ok(UpsertReceipt {
                documents: 0,
                task_uid: None,
            });
        }

        let info: TaskInfo = self
            .send(
                self.request(
                    Method::POST,
                    &format!("/indexes/{}/documents?primaryKey={}", self.index, PRIMARY_KEY),
                )
                .json(documents),
            )
            .await?;

        if self.wait_for_writes {
            self.wait_for_task(info.task_uid).await?;
        }

        Ok(UpsertReceipt {
            documents: documents.len(),
            task_uid: Some(info.task_uid),
        })
    }

    async fn query(&self, query: &EngineQuery) -> Result<EngineHits, EngineError> {
        let body = search_body(query);
        let result: SearchResult = self
            .send(
                self.request(Method::POST, &format!("/indexes/{}/search", self.index))
                    .json(&body),
            )
            .await?;

        let estimated_total = result
            .estimated_total_hits
            .or(result.total_hits)
            .unwrap_or(result.hits.len() as u64);

        Ok(EngineHits {
            hits: result.hits,
            estimated_total,
        })
    }
}

fn search_body(query: &EngineQuery) -> serde_json::Value {
    let mut body = serde_json::json!({
        "q": query.text,
        "limit": query.limit,
        "offset": query.offset,
    });
    if let Some(filter) = query.filter.as_deref().filter(|f| !f.trim().is_empty()) {
        body["filter"] = serde_json::Value::String(filter.to_string());
    }
    if !query.sort.is_empty() {
        body["sort"] = serde_json::json!(query.sort);
    }
    body
}

fn api_error(status: StatusCode, bytes: &[u8]) -> EngineError {
    match serde_json::from_slice::<ApiErrorBody>(bytes) {
        Ok(body) => EngineError::Api {
            status: status.as_u16(),
            code: body.code,
            message: body.message,
        },
        Err(_) => EngineError::Api {
            status: status.as_u16(),
            code: String::new(),
            message: String::from_utf8_lossy(bytes).into_owned(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_body_omits_empty_options() {
        let body = search_body(&EngineQuery {
            text: "coat".to_string(),
            filter: Some("  ".to_string()),
            sort: vec![],
            limit: 20,
            offset: 0,
        });
        assert_eq!(body["q"], "coat");
        assert_eq!(body["limit"], 20);
        assert!(body.get("filter").is_none());
        assert!(body.get("sort").is_none());
    }

    #[test]
    fn test_search_body_carries_filter_and_sort() {
        let body = search_body(&EngineQuery {
            text: String::new(),
            filter: Some("tags = \"sale\"".to_string()),
            sort: vec!["title:asc".to_string()],
            limit: 5,
            offset: 10,
        });
        assert_eq!(body["filter"], "tags = \"sale\"");
        assert_eq!(body["sort"], serde_json::json!(["title:asc"]));
        assert_eq!(body["offset"], 10);
    }

    #[test]
    fn test_api_error_parses_engine_body() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            br#"{"message":"Attribute `price` is not filterable","code":"invalid_search_filter","type":"invalid_request"}"#,
        );
        match err {
            EngineError::Api {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "invalid_search_filter");
                assert!(message.contains("price"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_api_error_keeps_raw_body() {
        let err = api_error(StatusCode::BAD_GATEWAY, b"upstream down");
        match err {
            EngineError::Api {
                status, message, ..
            } => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream down");
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!api_error(StatusCode::BAD_GATEWAY, b"").is_client_error());
    }

    #[test]
    fn test_new_trims_host() {
        let engine = MeilisearchEngine::new(&EngineConfig {
            host: "http://search:7700/".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(engine.url("/indexes"), "http://search:7700/indexes");
    }
}
