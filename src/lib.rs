//! # Syncdex
//!
//! An incremental multi-source sync pipeline feeding a unified search index.
//!
//! Syncdex watches a wiki, an issue tracker, and a code host for changes,
//! detects deltas with per-source watermarks (or signed webhooks for the code
//! host), fans the changes out through a durable at-least-once queue, and
//! normalizes every change into one unified document schema before embedding
//! and upserting it into a search index.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Connectors    │──▶│ Ingest queue │──▶│   Worker    │
//! │ wiki/issues/  │   │ SQLite,      │   │ normalize + │
//! │ code webhook  │   │ at-least-once│   │ embed       │
//! └──────┬───────┘   └──────────────┘   └──────┬──────┘
//!        │ watermarks                          ▼
//!        ▼                               ┌──────────┐
//!   ┌──────────┐                         │  Search   │
//!   │  SQLite  │                         │  index    │
//!   └──────────┘                         └────┬─────┘
//!                                             │
//!                             ┌───────────────┤
//!                             ▼               ▼
//!                        ┌─────────┐    ┌──────────┐
//!                        │   CLI   │    │   HTTP   │
//!                        │  (sdx)  │    │ (axum)   │
//!                        └─────────┘    └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sdx init                  # create database
//! sdx sync all              # run the wiki + issues delta connectors
//! sdx work --once           # drain one queue batch into the index
//! sdx serve                 # webhooks, chat commands, query API
//! sdx query "deploy"        # search from the command line
//! sdx status                # watermarks and queue depth
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration with defaults and load-time validation |
//! | [`secrets`] | Named credential sets from a secrets file, env override |
//! | [`models`] | Sources, change events, the unified document schema |
//! | [`db`] / [`migrate`] | SQLite pool and idempotent schema creation |
//! | [`checkpoint`] | Per-source watermark store |
//! | [`queue`] | Durable at-least-once ingest queue |
//! | [`connector_wiki`] | Wiki delta connector |
//! | [`connector_issues`] | Issue tracker delta connector |
//! | [`connector_code`] | Code host webhook processing |
//! | [`normalize`] | Event parsing and document normalization |
//! | [`embedding`] | Embedding client with retry/backoff |
//! | [`index`] | Search index seam: HTTP and in-memory backends |
//! | [`worker`] | Queue consumer driving normalize → embed → upsert |
//! | [`server`] | axum surface: webhooks, commands, query, health |
//! | [`query`] / [`status`] | CLI query and operational snapshot |

pub mod checkpoint;
pub mod config;
pub mod connector_code;
pub mod connector_issues;
pub mod connector_wiki;
pub mod db;
pub mod embedding;
pub mod index;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod query;
pub mod queue;
pub mod secrets;
pub mod server;
pub mod status;
pub mod worker;
