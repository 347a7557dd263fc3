//! # memohub
//!
//! Backend for a personal notes ("memos") application: an HTTP API in the
//! `{code, msg, data}` envelope style, two SQLite stores, object storage for
//! attachments and backups, and optional LLM features (embeddings, semantic
//! recommendations, annotation, OCR, chat).
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Client  │──▶│  HTTP (axum) │──▶│  Services          │
//! └──────────┘   │  envelopes   │   │  memos, tags, ...  │
//!                └──────────────┘   └─────────┬──────────┘
//!                                             │
//!              ┌───────────────┬──────────────┼──────────────┐
//!              ▼               ▼              ▼              ▼
//!        ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//!        │relational│   │  vector  │   │  object  │   │   LLM    │
//!        │  SQLite  │   │  SQLite  │   │ storage  │   │ provider │
//!        └──────────┘   └──────────┘   └──────────┘   └──────────┘
//! ```
//!
//! Both stores are brought up to date at boot by the per-table migration
//! runner in [`migrate`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment overrides |
//! | [`db`] | Store connections |
//! | [`schema`] | Canonical schema and backend type maps |
//! | [`migrate`] | Migration steps, registry, and runner |
//! | [`response`] | Response envelope and error codes |
//! | [`error`] | Domain error type |
//! | [`context`] | Shared application context |
//! | [`auth`] | Users, JWT sessions, BA tokens |
//! | [`memos`] | Memo CRUD, tags, recommendations |
//! | [`tags`] / [`categories`] | Tag and category management |
//! | [`push`] | Push rules and webhooks |
//! | [`storage`] | Local and S3-compatible object storage |
//! | [`attachments`] / [`ocr`] | Files and text recognition |
//! | [`embedding`] | AI provider, embeddings, vector utilities |
//! | [`conversations`] | AI chat history |
//! | [`backup`] / [`maintenance`] | Backups and scheduled jobs |
//! | [`system`] | Server info and statistics |
//! | [`server`] | Router, layers, and serving |

pub mod api;
pub mod attachments;
pub mod auth;
pub mod backup;
pub mod categories;
pub mod config;
pub mod context;
pub mod conversations;
pub mod db;
pub mod embedding;
pub mod error;
pub mod maintenance;
pub mod memos;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod push;
pub mod response;
pub mod schema;
pub mod server;
pub mod storage;
pub mod system;
pub mod tags;
