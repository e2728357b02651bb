//! HTTP server.
//!
//! Mutation handlers write the catalog first, then tell the
//! [`IndexSyncManager`] what committed. Search requests pass the admission
//! gate before reaching the engine.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/articles` | Create one article and index it |
//! | `POST` | `/articles/batch` | Create articles in one transaction and index them in one upsert |
//! | `POST` | `/authors` | Create one author |
//! | `POST` | `/authors/batch` | Create several authors |
//! | `POST` | `/tags` | Create one tag |
//! | `POST` | `/tags/batch` | Create several tags |
//! | `GET`  | `/tags` | List tags |
//! | `GET`  | `/tags/{label}` | Get one tag |
//! | `PATCH`| `/tags/{label}` | Rename a tag and reindex its articles |
//! | `GET`  | `/tags/{label}/articles` | Articles carrying a tag (from the catalog) |
//! | `GET`  | `/search` | Full-text search, rate limited |
//! | `POST` | `/admin/reindex` | Rebuild every document from the catalog |
//! | `POST` | `/admin/reindex/{id}` | Rebuild one document |
//! | `GET`  | `/health` | Health check (returns version and engine) |
//! | `GET`  | `/api` | This table as JSON |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "article title must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `rate_limited` (429),
//! `index_write_failed` (502), `search_unavailable` (502), `internal` (500).
//!
//! `index_write_failed` means the catalog write committed but the index did
//! not take it. Retrying the create would duplicate the row; use
//! `/admin/reindex` instead. The body lists the affected ids:
//!
//! ```json
//! { "error": { "code": "index_write_failed", "message": "...", "article_ids": [7] } }
//! ```

use axum::{
    extract::{Path, Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::admission::{Admission, KeyExtractor, RateLimiter};
use crate::catalog::sqlite::SqliteCatalog;
use crate::catalog::CatalogStore;
use crate::config::Config;
use crate::engine::{create_engine, SearchEngine, UpsertReceipt};
use crate::error::{SearchError, SyncError};
use crate::models::{ArticleSummary, Author, NewArticle, Tag};
use crate::search::{parse_sort_list, search, SearchParams, SearchResponse};
use crate::sync::{IndexSyncManager, ReindexReport};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    catalog: Arc<SqliteCatalog>,
    engine: Arc<dyn SearchEngine>,
    sync: Arc<IndexSyncManager>,
    limiter: Arc<RateLimiter>,
    keys: KeyExtractor,
}

/// Starts the HTTP server with the engine named in `[engine].kind`.
///
/// Applies the index schema, ensures the relational schema exists, then
/// serves until the process is terminated. Fails before binding if the
/// engine cannot be configured.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let engine = create_engine(&config.engine)?;
    run_server_with_engine(config, engine).await
}

/// Starts the HTTP server against a caller-supplied engine.
///
/// # Example
///
/// ```rust,no_run
/// use catalog_search::engine::InMemoryEngine;
/// use catalog_search::server::run_server_with_engine;
/// use std::sync::Arc;
///
/// # async fn example(config: &catalog_search::config::Config) -> anyhow::Result<()> {
/// run_server_with_engine(config, Arc::new(InMemoryEngine::new())).await?;
/// # Ok(())
/// # }
/// ```
pub async fn run_server_with_engine(
    config: &Config,
    engine: Arc<dyn SearchEngine>,
) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();

    engine.configure().await.map_err(|e| {
        anyhow::anyhow!("failed to configure {} index: {}", engine.name(), e)
    })?;

    let pool = crate::db::connect(config).await?;
    crate::migrate::create_schema(&pool).await?;
    let catalog = Arc::new(SqliteCatalog::new(pool));

    let limiter = Arc::new(RateLimiter::from_config(&config.rate_limit));
    let _sweeper = limiter.spawn_sweeper(
        config.rate_limit.sweep_interval(),
        config.rate_limit.idle_ttl(),
    );

    let state = AppState {
        config: Arc::new(config.clone()),
        sync: Arc::new(IndexSyncManager::new(engine.clone(), catalog.clone())),
        catalog,
        engine,
        limiter,
        keys: KeyExtractor::from_config(&config.rate_limit)?,
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/articles", post(handle_create_article))
        .route("/articles/batch", post(handle_create_articles))
        .route("/authors", post(handle_create_author))
        .route("/authors/batch", post(handle_create_authors))
        .route("/tags", post(handle_create_tag).get(handle_list_tags))
        .route("/tags/batch", post(handle_create_tags))
        .route("/tags/{label}", get(handle_get_tag).patch(handle_rename_tag))
        .route("/tags/{label}/articles", get(handle_tag_articles))
        .route(
            "/search",
            get(handle_search).route_layer(middleware::from_fn_with_state(state.clone(), admit)),
        )
        .route("/admin/reindex", post(handle_reindex))
        .route("/admin/reindex/{id}", post(handle_reindex_article))
        .route("/health", get(handle_health))
        .route("/api", get(handle_api))
        .layer(cors)
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!("catalog server listening on http://{}", bind_addr);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`, `"rate_limited"`).
    code: String,
    message: String,
    /// Articles whose catalog write committed but whose documents are stale.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    article_ids: Vec<i64>,
}

/// Internal error type that converts into an Axum HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    article_ids: Vec<i64>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                article_ids: self.article_ids,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn app_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        code: code.to_string(),
        message: message.into(),
        article_ids: Vec::new(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    app_error(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn not_found(message: impl Into<String>) -> AppError {
    app_error(StatusCode::NOT_FOUND, "not_found", message)
}

fn internal(message: impl Into<String>) -> AppError {
    app_error(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

/// Maps catalog write failures by message, the same way for every resource:
/// missing references are 404, rejected input is 400.
fn classify_catalog_error(err: anyhow::Error) -> AppError {
    let msg = format!("{:#}", err);
    if msg.contains("not found") {
        not_found(msg)
    } else if msg.contains("invalid")
        || msg.contains("must not be empty")
        || msg.contains("already exists")
    {
        bad_request(msg)
    } else {
        tracing::warn!(error = %msg, "catalog write failed");
        internal(msg)
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::IndexWrite {
                ref article_ids, ..
            } => {
                tracing::warn!(articles = ?article_ids, error = %err, "index write failed");
                AppError {
                    article_ids: article_ids.clone(),
                    ..app_error(StatusCode::BAD_GATEWAY, "index_write_failed", err.to_string())
                }
            }
            SyncError::MissingArticle(_) => not_found(err.to_string()),
            SyncError::Catalog(_) => {
                tracing::warn!(error = %err, "catalog read failed during sync");
                internal(err.to_string())
            }
        }
    }
}

impl From<SearchError> for AppError {
    fn from(err: SearchError) -> Self {
        if err.source.is_client_error() {
            bad_request(err.source.to_string())
        } else {
            tracing::warn!(query = %err.response.query, error = %err.source, "search failed");
            app_error(StatusCode::BAD_GATEWAY, "search_unavailable", err.to_string())
        }
    }
}

// ============ Admission ============

/// Rejects a search with `429` when the caller's bucket is empty.
async fn admit(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let key = state.keys.key_for(&req);
    match state.limiter.check(&key) {
        Admission::Allowed { .. } => next.run(req).await,
        Admission::Limited { retry_after } => {
            let secs = retry_after.as_secs_f64().ceil().max(1.0) as u64;
            let mut resp = app_error(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("rate limit exceeded, retry in {}s", secs),
            )
            .into_response();
            resp.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            resp
        }
    }
}

// ============ Articles ============

async fn handle_create_article(
    State(state): State<AppState>,
    Json(new): Json<NewArticle>,
) -> Result<(StatusCode, Json<ArticleSummary>), AppError> {
    let created = state
        .catalog
        .create_article(&new)
        .await
        .map_err(classify_catalog_error)?;

    state
        .sync
        .on_article_created(&created.article, &created.author_name, &created.tags)
        .await?;

    Ok((StatusCode::CREATED, Json(created.summary())))
}

async fn handle_create_articles(
    State(state): State<AppState>,
    Json(batch): Json<Vec<NewArticle>>,
) -> Result<(StatusCode, Json<Vec<ArticleSummary>>), AppError> {
    if batch.is_empty() {
        return Err(bad_request("batch must not be empty"));
    }
    let created = state
        .catalog
        .create_articles(&batch)
        .await
        .map_err(classify_catalog_error)?;

    let summaries: Vec<ArticleSummary> = created.iter().map(|c| c.summary()).collect();
    state.sync.on_articles_created_batch(&summaries).await?;

    Ok((StatusCode::CREATED, Json(summaries)))
}

// ============ Authors ============

#[derive(Deserialize)]
struct NewAuthor {
    name: String,
}

async fn handle_create_author(
    State(state): State<AppState>,
    Json(new): Json<NewAuthor>,
) -> Result<(StatusCode, Json<Author>), AppError> {
    let author = state
        .catalog
        .create_author(&new.name)
        .await
        .map_err(classify_catalog_error)?;
    Ok((StatusCode::CREATED, Json(author)))
}

async fn handle_create_authors(
    State(state): State<AppState>,
    Json(batch): Json<Vec<NewAuthor>>,
) -> Result<(StatusCode, Json<Vec<Author>>), AppError> {
    let names: Vec<String> = batch.into_iter().map(|a| a.name).collect();
    let authors = state
        .catalog
        .create_authors(&names)
        .await
        .map_err(classify_catalog_error)?;
    Ok((StatusCode::CREATED, Json(authors)))
}

// ============ Tags ============

#[derive(Deserialize)]
struct TagLabel {
    label: String,
}

async fn handle_create_tag(
    State(state): State<AppState>,
    Json(new): Json<TagLabel>,
) -> Result<(StatusCode, Json<Tag>), AppError> {
    let tag = state
        .catalog
        .create_tag(&new.label)
        .await
        .map_err(classify_catalog_error)?;
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn handle_create_tags(
    State(state): State<AppState>,
    Json(batch): Json<Vec<TagLabel>>,
) -> Result<(StatusCode, Json<Vec<Tag>>), AppError> {
    let labels: Vec<String> = batch.into_iter().map(|t| t.label).collect();
    let tags = state
        .catalog
        .create_tags(&labels)
        .await
        .map_err(classify_catalog_error)?;
    Ok((StatusCode::CREATED, Json(tags)))
}

async fn handle_list_tags(State(state): State<AppState>) -> Result<Json<Vec<Tag>>, AppError> {
    let tags = state
        .catalog
        .list_tags()
        .await
        .map_err(classify_catalog_error)?;
    Ok(Json(tags))
}

async fn handle_get_tag(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<Json<Tag>, AppError> {
    state
        .catalog
        .get_tag(&label)
        .await
        .map_err(classify_catalog_error)?
        .map(Json)
        .ok_or_else(|| not_found(format!("tag '{}' not found", label)))
}

/// Handler for `PATCH /tags/{label}`.
///
/// Body: `{ "label": "<new label>" }`. Every article carrying the tag is
/// re-indexed before the response is sent.
async fn handle_rename_tag(
    State(state): State<AppState>,
    Path(label): Path<String>,
    Json(body): Json<TagLabel>,
) -> Result<Json<Tag>, AppError> {
    let renamed = state
        .catalog
        .rename_tag(&label, &body.label)
        .await
        .map_err(classify_catalog_error)?
        .ok_or_else(|| not_found(format!("tag '{}' not found", label)))?;

    state
        .sync
        .on_tag_relabeled(&renamed.old_label, &renamed.tag.label, &renamed.article_ids)
        .await?;

    Ok(Json(renamed.tag))
}

async fn handle_tag_articles(
    State(state): State<AppState>,
    Path(label): Path<String>,
) -> Result<Json<Vec<ArticleSummary>>, AppError> {
    if state
        .catalog
        .get_tag(&label)
        .await
        .map_err(classify_catalog_error)?
        .is_none()
    {
        return Err(not_found(format!("tag '{}' not found", label)));
    }
    let articles = state
        .catalog
        .find_articles_by_tag_label(&label)
        .await
        .map_err(classify_catalog_error)?;
    Ok(Json(articles))
}

// ============ GET /search ============

#[derive(Deserialize)]
struct SearchQuery {
    #[serde(default)]
    q: String,
    filter: Option<String>,
    /// Comma-separated `field:dir` list.
    sort: Option<String>,
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
}

/// Handler for `GET /search`.
///
/// `limit` defaults to `[search].default_limit` and is clamped to
/// `[search].max_limit`. Filter and sort expressions go to the engine as-is;
/// the engine rejecting them is a `400`.
async fn handle_search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<SearchResponse>, AppError> {
    let limits = &state.config.search;
    let params = SearchParams {
        query_text: query.q,
        filter: query.filter,
        sort: query
            .sort
            .as_deref()
            .map(parse_sort_list)
            .unwrap_or_default(),
        limit: query
            .limit
            .unwrap_or(limits.default_limit)
            .min(limits.max_limit),
        offset: query.offset,
    };

    let response = search(state.engine.as_ref(), &params).await?;
    Ok(Json(response))
}

// ============ Admin ============

async fn handle_reindex(State(state): State<AppState>) -> Result<Json<ReindexReport>, AppError> {
    let report = state
        .sync
        .reindex_all(state.config.reindex.batch_size)
        .await?;
    tracing::info!(
        documents = report.documents,
        batches = report.batches,
        "reindex complete"
    );
    Ok(Json(report))
}

async fn handle_reindex_article(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<UpsertReceipt>, AppError> {
    Ok(Json(state.sync.resync_article(id).await?))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    /// The crate version from `Cargo.toml`.
    version: String,
    engine: String,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        engine: state.engine.name().to_string(),
    })
}

// ============ GET /api ============

#[derive(Serialize)]
struct Endpoint {
    method: &'static str,
    path: &'static str,
    description: &'static str,
}

const ENDPOINTS: &[Endpoint] = &[
    Endpoint {
        method: "POST",
        path: "/articles",
        description: "Create an article",
    },
    Endpoint {
        method: "POST",
        path: "/articles/batch",
        description: "Create several articles",
    },
    Endpoint {
        method: "POST",
        path: "/authors",
        description: "Create an author",
    },
    Endpoint {
        method: "POST",
        path: "/authors/batch",
        description: "Create several authors",
    },
    Endpoint {
        method: "POST",
        path: "/tags",
        description: "Create a tag",
    },
    Endpoint {
        method: "POST",
        path: "/tags/batch",
        description: "Create several tags",
    },
    Endpoint {
        method: "GET",
        path: "/tags",
        description: "List tags",
    },
    Endpoint {
        method: "GET",
        path: "/tags/{label}",
        description: "Get a tag",
    },
    Endpoint {
        method: "PATCH",
        path: "/tags/{label}",
        description: "Rename a tag",
    },
    Endpoint {
        method: "GET",
        path: "/tags/{label}/articles",
        description: "Articles carrying a tag",
    },
    Endpoint {
        method: "GET",
        path: "/search",
        description: "Search articles (q, filter, sort, limit, offset)",
    },
    Endpoint {
        method: "POST",
        path: "/admin/reindex",
        description: "Rebuild the search index from the catalog",
    },
    Endpoint {
        method: "POST",
        path: "/admin/reindex/{id}",
        description: "Rebuild one article's document",
    },
    Endpoint {
        method: "GET",
        path: "/health",
        description: "Health check",
    },
];

#[derive(Serialize)]
struct ApiListing {
    endpoints: &'static [Endpoint],
}

async fn handle_api() -> Json<ApiListing> {
    Json(ApiListing {
        endpoints: ENDPOINTS,
    })
}
