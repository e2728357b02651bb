//! End-to-end tests for the HTTP server.
//!
//! Each test starts the real axum server on a free port against a temporary
//! SQLite database and the in-process engine, then drives it with `reqwest`.

use catalog_search::config::Config;
use catalog_search::engine::InMemoryEngine;
use catalog_search::server::run_server_with_engine;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;

// ─── Helpers ────────────────────────────────────────────────────────

fn test_config(tmp: &TempDir, port: u16, capacity: u32, refill_per_sec: f64) -> Config {
    let db_path = tmp.path().join("catalog.sqlite");
    let config_content = format!(
        r#"
[db]
path = "{}"

[server]
bind = "127.0.0.1:{}"

[engine]
kind = "memory"

[rate_limit]
capacity = {}
refill_per_sec = {}
"#,
        db_path.display(),
        port,
        capacity,
        refill_per_sec
    );
    toml::from_str(&config_content).unwrap()
}

fn find_free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

async fn wait_for_server(port: u16) {
    let client = reqwest::Client::new();
    let url = format!("http://127.0.0.1:{}/health", port);
    for _ in 0..50 {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return;
            }
        }
    }
    panic!("Server did not become ready within 5 seconds");
}

struct TestServer {
    _tmp: TempDir,
    base: String,
    client: reqwest::Client,
    engine: Arc<InMemoryEngine>,
}

impl TestServer {
    async fn start(capacity: u32, refill_per_sec: f64) -> Self {
        let port = find_free_port();
        let tmp = TempDir::new().unwrap();
        let cfg = test_config(&tmp, port, capacity, refill_per_sec);
        let engine = Arc::new(InMemoryEngine::new());

        let server_engine = engine.clone();
        tokio::spawn(async move {
            run_server_with_engine(&cfg, server_engine).await.unwrap();
        });
        wait_for_server(port).await;

        Self {
            _tmp: tmp,
            base: format!("http://127.0.0.1:{}", port),
            client: reqwest::Client::new(),
            engine,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .post(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn patch(&self, path: &str, body: Value) -> (u16, Value) {
        let resp = self
            .client
            .patch(format!("{}{}", self.base, path))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}{}", self.base, path))
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn search(&self, params: &[(&str, &str)]) -> (u16, Value) {
        let resp = self
            .client
            .get(format!("{}/search", self.base))
            .query(params)
            .send()
            .await
            .unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn create_author(&self, name: &str) -> i64 {
        let (status, body) = self.post("/authors", json!({ "name": name })).await;
        assert_eq!(status, 201, "{}", body);
        body["id"].as_i64().unwrap()
    }
}

fn hit_titles(body: &Value) -> Vec<String> {
    let mut titles: Vec<String> = body["hits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["title"].as_str().unwrap().to_string())
        .collect();
    titles.sort();
    titles
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_create_search_and_rename() {
    let server = TestServer::start(1000, 100.0).await;
    let ada = server.create_author("Ada").await;

    let (status, article) = server
        .post(
            "/articles",
            json!({
                "title": "Red Coat",
                "body": "Warm wool coat",
                "author_id": ada,
                "tags": ["sale", "winter"]
            }),
        )
        .await;
    assert_eq!(status, 201, "{}", article);
    assert_eq!(article["author_name"], "Ada");

    let (status, batch) = server
        .post(
            "/articles/batch",
            json!([
                { "title": "Blue Scarf", "body": "Knitted", "author_id": ada, "tags": ["sale"] },
                { "title": "Green Hat", "body": "Felt hat", "author_id": ada }
            ]),
        )
        .await;
    assert_eq!(status, 201, "{}", batch);
    assert_eq!(batch.as_array().unwrap().len(), 2);

    let (status, body) = server.search(&[("q", "coat")]).await;
    assert_eq!(status, 200);
    assert_eq!(body["query"], "coat");
    assert_eq!(hit_titles(&body), vec!["Red Coat"]);

    let (_, body) = server.search(&[("filter", "tags = \"sale\"")]).await;
    assert_eq!(hit_titles(&body), vec!["Blue Scarf", "Red Coat"]);

    let (status, tag) = server
        .patch("/tags/sale", json!({ "label": "clearance" }))
        .await;
    assert_eq!(status, 200, "{}", tag);
    assert_eq!(tag["label"], "clearance");

    let (_, body) = server.search(&[("filter", "tags = \"clearance\"")]).await;
    assert_eq!(hit_titles(&body), vec!["Blue Scarf", "Red Coat"]);
    let (_, body) = server.search(&[("filter", "tags = \"sale\"")]).await;
    assert_eq!(body["estimated_total"], 0);

    // Untouched tags survive the rename.
    let (_, body) = server.search(&[("filter", "tags = winter")]).await;
    assert_eq!(hit_titles(&body), vec!["Red Coat"]);

    let (status, articles) = server.get("/tags/clearance/articles").await;
    assert_eq!(status, 200);
    assert_eq!(articles.as_array().unwrap().len(), 2);

    let (status, err) = server.get("/tags/sale").await;
    assert_eq!(status, 404);
    assert_eq!(err["error"]["code"], "not_found");
}

#[tokio::test]
async fn test_search_paging_sort_and_limit_clamp() {
    let server = TestServer::start(1000, 100.0).await;
    let ada = server.create_author("Ada").await;
    let batch: Vec<Value> = ["Delta", "Alpha", "Charlie", "Bravo"]
        .iter()
        .map(|t| json!({ "title": t, "body": "", "author_id": ada }))
        .collect();
    let (status, _) = server.post("/articles/batch", Value::Array(batch)).await;
    assert_eq!(status, 201);

    let (status, body) = server
        .search(&[("sort", "title:asc"), ("limit", "2"), ("offset", "1")])
        .await;
    assert_eq!(status, 200);
    let titles: Vec<&str> = body["hits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|h| h["title"].as_str().unwrap())
        .collect();
    assert_eq!(titles, vec!["Bravo", "Charlie"]);
    assert_eq!(body["offset"], 1);
    assert_eq!(body["estimated_total"], 4);

    let (_, body) = server.search(&[("limit", "5000")]).await;
    assert_eq!(body["limit"], 100);

    let (_, body) = server.search(&[]).await;
    assert_eq!(body["limit"], 20);
    assert_eq!(body["query"], "");
}

#[tokio::test]
async fn test_invalid_input_is_rejected() {
    let server = TestServer::start(1000, 100.0).await;
    let ada = server.create_author("Ada").await;

    let (status, err) = server
        .post("/articles", json!({ "title": "Orphan", "body": "", "author_id": 999 }))
        .await;
    assert_eq!(status, 404);
    assert_eq!(err["error"]["code"], "not_found");

    let (status, err) = server
        .post("/articles", json!({ "title": "  ", "body": "", "author_id": ada }))
        .await;
    assert_eq!(status, 400);
    assert_eq!(err["error"]["code"], "bad_request");

    let (status, _) = server.post("/authors", json!({ "name": "Ada" })).await;
    assert_eq!(status, 400);

    let (status, _) = server.post("/tags", json!({ "label": "sale" })).await;
    assert_eq!(status, 201);
    let (status, _) = server.post("/tags", json!({ "label": "clearance" })).await;
    assert_eq!(status, 201);
    let (status, err) = server
        .patch("/tags/sale", json!({ "label": "clearance" }))
        .await;
    assert_eq!(status, 400, "{}", err);

    let (status, _) = server
        .patch("/tags/missing", json!({ "label": "other" }))
        .await;
    assert_eq!(status, 404);

    let (status, err) = server.search(&[("filter", "title = Coat")]).await;
    assert_eq!(status, 400);
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_index_write_failure_then_reindex() {
    let server = TestServer::start(1000, 100.0).await;
    let ada = server.create_author("Ada").await;

    server.engine.set_fail_writes(true);
    let (status, err) = server
        .post(
            "/articles",
            json!({ "title": "Red Coat", "body": "", "author_id": ada, "tags": ["sale"] }),
        )
        .await;
    assert_eq!(status, 502);
    assert_eq!(err["error"]["code"], "index_write_failed");
    let stale = err["error"]["article_ids"].as_array().unwrap();
    assert_eq!(stale.len(), 1);
    let id = stale[0].as_i64().unwrap();

    // The relational write committed anyway.
    let (_, articles) = server.get("/tags/sale/articles").await;
    assert_eq!(articles[0]["id"].as_i64(), Some(id));
    assert!(server.engine.is_empty());

    server.engine.set_fail_writes(false);
    let (status, report) = server.post("/admin/reindex", json!({})).await;
    assert_eq!(status, 200);
    assert_eq!(report["documents"], 1);
    assert_eq!(report["batches"], 1);

    let (_, body) = server.search(&[("q", "coat")]).await;
    assert_eq!(hit_titles(&body), vec!["Red Coat"]);

    let (status, receipt) = server
        .post(&format!("/admin/reindex/{}", id), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(receipt["documents"], 1);

    let (status, _) = server.post("/admin/reindex/9999", json!({})).await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_search_unavailable() {
    let server = TestServer::start(1000, 100.0).await;
    server.engine.set_fail_reads(true);

    let (status, err) = server.search(&[("q", "coat")]).await;
    assert_eq!(status, 502);
    assert_eq!(err["error"]["code"], "search_unavailable");
    assert!(err["error"]["message"].as_str().unwrap().contains("coat"));
}

#[tokio::test]
async fn test_search_is_rate_limited() {
    let server = TestServer::start(2, 0.01).await;

    for _ in 0..2 {
        let (status, _) = server.search(&[("q", "x")]).await;
        assert_eq!(status, 200);
    }

    // A rejected search never reaches the engine.
    server.engine.set_fail_reads(true);
    let resp = server
        .client
        .get(format!("{}/search", server.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 429);
    let retry_after: u64 = resp
        .headers()
        .get("retry-after")
        .unwrap()
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "rate_limited");

    // Only search is gated.
    let (status, _) = server.get("/tags").await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_glacial_refill_still_answers_429() {
    let server = TestServer::start(1, 1e-20).await;

    let (status, _) = server.search(&[("q", "x")]).await;
    assert_eq!(status, 200);

    for _ in 0..2 {
        let resp = server
            .client
            .get(format!("{}/search?q=x", server.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 429);
        assert!(resp.headers().contains_key("retry-after"));
    }
}

#[tokio::test]
async fn test_health_and_api_listing() {
    let server = TestServer::start(10, 1.0).await;

    let (status, health) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["engine"], "memory");
    assert!(server.engine.is_configured());

    let (status, api) = server.get("/api").await;
    assert_eq!(status, 200);
    let paths: Vec<&str> = api["endpoints"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["path"].as_str().unwrap())
        .collect();
    assert!(paths.contains(&"/search"));
    assert!(paths.contains(&"/tags/{label}"));
}
