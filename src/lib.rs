//! # Catalog Search
//!
//! Keeps a full-text search index in step with a relational article catalog
//! and serves rate-limited search over it.
//!
//! Authors, articles and tags live in SQLite. Every committed mutation that
//! changes what an article looks like in search is projected into a flat
//! [`SearchDocument`](models::SearchDocument) and upserted into the engine
//! (Meilisearch, or an in-process engine for tests).
//!
//! ## Architecture
//!
//! ```text
//!  mutation ──▶ ┌──────────┐ commit ┌──────────────────┐ upsert ┌──────────┐
//!  handlers     │  SQLite  │───────▶│ IndexSyncManager │───────▶│  Engine  │
//!               │ catalog  │◀───────│  (re-reads rows) │        │          │
//!               └──────────┘  read  └──────────────────┘        └────▲─────┘
//!                                                                    │ query
//!  GET /search ──▶ ┌──────────────┐ admitted ┌──────────────────┐    │
//!                  │ RateLimiter  │─────────▶│ search()         │────┘
//!                  └──────────────┘          └──────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! catalog init                          # create tables, configure the index
//! catalog serve                         # start the HTTP server
//! catalog search "coat" --filter 'tags = "sale"'
//! catalog reindex                       # rebuild every document
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Engine, sync and search error types |
//! | [`models`] | Catalog rows and the search document |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`catalog`] | Relational store trait and implementations |
//! | [`engine`] | Search engine adapters |
//! | [`sync`] | Index sync manager |
//! | [`admission`] | Per-client token-bucket rate limiting |
//! | [`search`] | Query translation and response shaping |
//! | [`server`] | HTTP server |

pub mod admission;
pub mod catalog;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod migrate;
pub mod models;
pub mod search;
pub mod server;
pub mod sync;
