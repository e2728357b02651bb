//! # Catalog Search CLI (`catalog`)
//!
//! ## Usage
//!
//! ```bash
//! catalog --config ./config/catalog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catalog init` | Create the SQLite schema and configure the search index |
//! | `catalog serve` | Start the HTTP server |
//! | `catalog search "<query>"` | Query the search index |
//! | `catalog reindex` | Rebuild every search document from the catalog |
//!
//! ## Examples
//!
//! ```bash
//! # Filter and sort go to the engine unchanged
//! catalog search "coat" --filter 'tags = "sale"' --sort title:asc
//!
//! # Repair the index after failed writes
//! catalog reindex --batch-size 200
//! ```

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use catalog_search::catalog::sqlite::SqliteCatalog;
use catalog_search::engine::create_engine;
use catalog_search::search::{parse_sort_list, search, SearchParams};
use catalog_search::sync::IndexSyncManager;
use catalog_search::{config, db, migrate, server};

/// Catalog Search: keeps a search index in step with an article catalog.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/catalog.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "catalog", about = "Article catalog with a synchronized search index", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog.toml")]
    config: PathBuf,

    /// Log at debug level (ignored when `RUST_LOG` is set).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema and configure the search index.
    ///
    /// Idempotent. Fails if the engine rejects the index settings.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Query the search index directly.
    Search {
        /// Free-text query. Empty matches everything.
        #[arg(default_value = "")]
        query: String,

        /// Engine filter expression, e.g. `tags = "sale"`.
        #[arg(long)]
        filter: Option<String>,

        /// Comma-separated sort list, e.g. `title:asc,author_name:desc`.
        #[arg(long)]
        sort: Option<String>,

        /// Maximum hits to return. Defaults to `[search].default_limit`.
        #[arg(long)]
        limit: Option<usize>,

        #[arg(long, default_value_t = 0)]
        offset: usize,
    },

    /// Rebuild every search document from the catalog.
    Reindex {
        /// Articles per upsert. Defaults to `[reindex].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,
    },
}

fn init_logging(verbose: bool) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            let engine = create_engine(&cfg.engine)?;
            engine
                .configure()
                .await
                .with_context(|| format!("failed to configure {} index", engine.name()))?;
            println!("Database and search index initialized.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Search {
            query,
            filter,
            sort,
            limit,
            offset,
        } => {
            let engine = create_engine(&cfg.engine)?;
            let params = SearchParams {
                query_text: query,
                filter,
                sort: sort.as_deref().map(parse_sort_list).unwrap_or_default(),
                limit: limit
                    .unwrap_or(cfg.search.default_limit)
                    .min(cfg.search.max_limit),
                offset,
            };
            let response = search(engine.as_ref(), &params).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Commands::Reindex { batch_size } => {
            let engine = create_engine(&cfg.engine)?;
            let pool = db::connect(&cfg).await?;
            let sync = IndexSyncManager::new(engine, Arc::new(SqliteCatalog::new(pool.clone())));
            let report = sync
                .reindex_all(batch_size.unwrap_or(cfg.reindex.batch_size))
                .await?;
            pool.close().await;
            println!(
                "Reindexed {} documents in {} batches.",
                report.documents, report.batches
            );
        }
    }

    Ok(())
}
